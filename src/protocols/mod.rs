//! Protocol engines.
//!
//! Each engine plugs a per-connection (or per-datagram) handler into the
//! shared listener machinery in [`crate::server`].
//!
//! ## Stream protocols
//! - `tcp`: raw echo with per-read delay and forced close
//! - `http`: HTTP/1.1 responder with slow, status-override and chunked faults
//! - `mqtt`: MQTT 3.1.1 session handler with optional message retention
//!
//! ## Datagram protocols
//! - `udp`: echo with packet loss and delay

pub mod http;
pub mod mqtt;
pub mod tcp;
pub mod udp;

/// Lowercase hex rendering for trace-level payload dumps.
pub(crate) fn hex(data: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

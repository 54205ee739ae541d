//! netfault: a multi-protocol network fault-injection test server
//!
//! Exposes endpoints whose behavior under adverse conditions is configurable,
//! so clients can be exercised without a real backend:
//! - TCP echo with per-read delay and forced close
//! - UDP echo with packet loss and delay
//! - HTTP/1.1 responder with slow responses, status override and chunked bodies
//! - MQTT 3.1.1 session handler with optional message retention
//!
//! Every stream listener is also offered TLS-wrapped. The engines can be
//! embedded in other test suites with custom HTTP handlers or MQTT hooks.

pub mod config;
pub mod fault;
pub mod harness;
pub mod protocols;
pub mod server;
pub mod tls;

#[cfg(test)]
mod test_support;

//! UDP echo engine.

pub mod handler;
pub mod scenarios;

pub use handler::{DatagramHandler, Echo, UdpEchoServer, DEFAULT_MAX_INFLIGHT};

//! TCP echo engine.

pub mod handler;
pub mod scenarios;

pub use handler::{ByteStream, EchoServer, HandlerFuture, StreamHandler};

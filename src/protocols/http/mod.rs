//! HTTP/1.1 responder.
//!
//! One request at a time per connection, `Content-Length` request bodies
//! only. Faults: slow responses, status override, chunked response bodies.

pub mod handler;
pub mod parser;
pub mod scenarios;

pub use handler::{BuiltinResponder, HttpFaults, HttpServer, RequestHandler};
pub use parser::{Headers, Request, Response};

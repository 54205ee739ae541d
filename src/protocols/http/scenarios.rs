//! Canned responders for common failure scenarios.
//!
//! Each function has the [`RequestHandler`](super::RequestHandler) shape and
//! can be installed with [`HttpServer::with_handler`](super::HttpServer::with_handler).

use super::parser::{Request, Response};

pub fn not_found(_request: &Request) -> Response {
    Response::text(404, "404 Not Found")
}

pub fn server_error(_request: &Request) -> Response {
    Response::text(500, "500 Internal Server Error")
}

pub fn no_content(_request: &Request) -> Response {
    Response::new(204)
}

pub fn redirect(_request: &Request) -> Response {
    Response::new(301).with_header("Location", "/new-location")
}

/// JSON body with extra headers; echoes the caller's `X-Request-ID`.
pub fn custom_headers(request: &Request) -> Response {
    Response::new(200)
        .with_header("X-Custom-Header", "custom-value")
        .with_header("X-Another-Header", "another-value")
        .with_header("Content-Type", "application/json")
        .with_header("X-Request-ID", request.header("x-request-id").unwrap_or_default())
        .with_body(r#"{"status":"ok"}"#)
}

/// Declares chunked transfer encoding. Unless the listener runs in chunked
/// mode the body goes out unframed, which clients see as a broken response.
pub fn chunked_hello(_request: &Request) -> Response {
    Response::new(200)
        .with_header("Transfer-Encoding", "chunked")
        .with_body("Hello World")
}

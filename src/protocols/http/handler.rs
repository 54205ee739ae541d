//! HTTP connection handler.
//!
//! Reads requests off a connection one at a time, hands each fully framed
//! request to a [`RequestHandler`], shapes the response with the configured
//! faults and writes it back. Connections are kept alive until the client
//! sends `Connection: close`, closes its side, or goes idle.

use super::parser::{parse_request, ParseResult, Request, Response};
use crate::fault;
use crate::server::{self, is_disconnect, StopSignal};
use bytes::{Buf, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, trace, warn};

/// Read buffer size
const BUFFER_SIZE: usize = 8 * 1024;

/// A connection with no complete request for this long is closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Produces a response for a fully framed request.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: &Request) -> Response;
}

impl<F> RequestHandler for F
where
    F: Fn(&Request) -> Response + Send + Sync + 'static,
{
    fn handle(&self, request: &Request) -> Response {
        self(request)
    }
}

/// Default responder: `/healthz` answers `ok`, everything else gets a
/// plain-text summary of the request.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinResponder;

impl RequestHandler for BuiltinResponder {
    fn handle(&self, request: &Request) -> Response {
        if request.path == "/healthz" {
            return Response::text(200, "ok\n");
        }

        let mut body = format!(
            "Method: {}\nPath: {}\nVersion: {}\n",
            request.method, request.path, request.version
        );
        for (name, value) in request.headers.iter() {
            body.push_str(name);
            body.push_str(": ");
            body.push_str(value);
            body.push('\n');
        }
        Response::text(200, body)
    }
}

/// Response shaping faults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HttpFaults {
    /// Sleep `slow_duration` before sending each response
    pub slow_response: bool,
    pub slow_duration: Duration,
    /// Replace the status of every response; 0 and 200 leave it alone
    pub error_code: u16,
    /// Send bodies with chunked transfer encoding
    pub chunked: bool,
}

/// HTTP/1.1 responder engine.
pub struct HttpServer {
    faults: HttpFaults,
    handler: Arc<dyn RequestHandler>,
}

impl HttpServer {
    pub fn new(faults: HttpFaults) -> Self {
        Self {
            faults,
            handler: Arc::new(BuiltinResponder),
        }
    }

    /// Replace the built-in responder.
    pub fn with_handler(mut self, handler: impl RequestHandler) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    pub fn faults(&self) -> &HttpFaults {
        &self.faults
    }

    /// Run the accept loop on `listener` until `stop` is set.
    pub async fn serve(
        self,
        listener: TcpListener,
        tls: Option<TlsAcceptor>,
        stop: StopSignal,
    ) -> io::Result<()> {
        info!(
            address = %listener.local_addr()?,
            tls = tls.is_some(),
            chunked = self.faults.chunked,
            error_code = self.faults.error_code,
            "HTTP server listening"
        );
        let this = Arc::new(self);
        server::serve(listener, tls, stop, move |conn| {
            let this = Arc::clone(&this);
            async move {
                let peer = conn.peer_addr();
                this.handle_connection(conn, peer).await
            }
        })
        .await
    }

    /// Serve requests on one connection until it closes.
    pub async fn handle_connection<S>(&self, mut stream: S, peer: SocketAddr) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

        loop {
            match parse_request(&buffer) {
                ParseResult::Complete(request, consumed) => {
                    buffer.advance(consumed);
                    info!(
                        peer = %peer,
                        method = %request.method,
                        path = %request.path,
                        version = %request.version,
                        "HTTP request"
                    );

                    let response = self.respond(&request).await;
                    trace!(peer = %peer, status = response.status, "Sending response");
                    if let Err(e) = send(&mut stream, &response, self.faults.chunked).await {
                        return disconnect_or(e);
                    }

                    if request.wants_close() {
                        let _ = stream.shutdown().await;
                        return Ok(());
                    }
                }

                ParseResult::Incomplete => {
                    match time::timeout(IDLE_TIMEOUT, stream.read_buf(&mut buffer)).await {
                        Err(_) => {
                            debug!(peer = %peer, "Idle timeout, closing connection");
                            return Ok(());
                        }
                        Ok(Ok(0)) => {
                            if !buffer.is_empty() {
                                debug!(peer = %peer, "Connection closed with incomplete request");
                            }
                            return Ok(());
                        }
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => return disconnect_or(e),
                    }
                }

                ParseResult::Error(e) => {
                    warn!(peer = %peer, error = %e, "HTTP parse error");
                    let response = Response::text(400, "Bad Request");
                    if let Err(e) = send(&mut stream, &response, self.faults.chunked).await {
                        return disconnect_or(e);
                    }
                    let _ = stream.shutdown().await;
                    return Ok(());
                }
            }
        }
    }

    /// Build the response for a request and apply the response faults.
    async fn respond(&self, request: &Request) -> Response {
        let mut response = self.handler.handle(request);

        if self.faults.slow_response {
            fault::pause(self.faults.slow_duration).await;
        }

        if self.faults.error_code != 0 && self.faults.error_code != 200 {
            response.status = self.faults.error_code;
        }

        response
    }
}

impl Default for HttpServer {
    fn default() -> Self {
        Self::new(HttpFaults::default())
    }
}

async fn send<S>(stream: &mut S, response: &Response, chunked: bool) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&response.encode(chunked)).await?;
    stream.flush().await
}

fn disconnect_or(e: io::Error) -> io::Result<()> {
    if is_disconnect(&e) {
        Ok(())
    } else {
        Err(e)
    }
}

//! Canned connection handlers for common failure scenarios.
//!
//! Install one with [`EchoServer::with_handler`](super::EchoServer::with_handler).

use super::handler::{echo, ByteStream, HandlerFuture, StreamHandler, IDLE_TIMEOUT};
use crate::fault::{self, Faults};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time;
use tracing::debug;

/// Line written by [`ErrorResponse`].
pub const ERROR_LINE: &[u8] = b"ERROR: simulated error response\n";

const CHUNK_SIZE: usize = 4096;

/// Echoes the first chunk, then closes the write side. Whatever the client
/// sends afterwards is read and discarded until it closes too.
#[derive(Debug, Clone, Copy, Default)]
pub struct HalfClose;

impl StreamHandler for HalfClose {
    fn handle<'a>(
        &'a self,
        stream: &'a mut dyn ByteStream,
        peer: SocketAddr,
    ) -> HandlerFuture<'a> {
        Box::pin(async move {
            let mut buf = vec![0u8; CHUNK_SIZE];
            let n = stream.read(&mut buf).await?;
            stream.write_all(&buf[..n]).await?;
            stream.shutdown().await?;
            debug!(peer = %peer, "Write side closed (half-close)");

            loop {
                match time::timeout(IDLE_TIMEOUT, stream.read(&mut buf)).await {
                    Ok(Ok(0)) | Err(_) => return Ok(()),
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => return Err(e),
                }
            }
        })
    }
}

/// Writes [`ERROR_LINE`] without reading anything, then closes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorResponse;

impl StreamHandler for ErrorResponse {
    fn handle<'a>(
        &'a self,
        stream: &'a mut dyn ByteStream,
        _peer: SocketAddr,
    ) -> HandlerFuture<'a> {
        Box::pin(async move {
            stream.write_all(ERROR_LINE).await?;
            stream.shutdown().await
        })
    }
}

/// Echoes the first chunk one byte at a time with `delay` between bytes,
/// then closes.
#[derive(Debug, Clone, Copy)]
pub struct SlowSend {
    pub delay: Duration,
}

impl StreamHandler for SlowSend {
    fn handle<'a>(
        &'a self,
        stream: &'a mut dyn ByteStream,
        _peer: SocketAddr,
    ) -> HandlerFuture<'a> {
        Box::pin(async move {
            let mut buf = vec![0u8; CHUNK_SIZE];
            let n = stream.read(&mut buf).await?;
            for (i, byte) in buf[..n].iter().enumerate() {
                if i > 0 {
                    fault::pause(self.delay).await;
                }
                stream.write_all(&[*byte]).await?;
                stream.flush().await?;
            }
            stream.shutdown().await
        })
    }
}

/// Closes the connection as soon as it is accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct DropConnection;

impl StreamHandler for DropConnection {
    fn handle<'a>(
        &'a self,
        _stream: &'a mut dyn ByteStream,
        peer: SocketAddr,
    ) -> HandlerFuture<'a> {
        Box::pin(async move {
            debug!(peer = %peer, "Dropping connection");
            Ok(())
        })
    }
}

/// Plain echo held open until the client closes or goes idle, ignoring
/// the server's delay fault.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepAlive;

impl StreamHandler for KeepAlive {
    fn handle<'a>(
        &'a self,
        stream: &'a mut dyn ByteStream,
        peer: SocketAddr,
    ) -> HandlerFuture<'a> {
        Box::pin(async move { echo(stream, peer, &Faults::none()).await })
    }
}

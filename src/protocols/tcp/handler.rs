//! TCP echo connection handler.

use crate::fault::{self, Faults};
use crate::protocols::hex;
use crate::server::{self, is_disconnect, StopSignal};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, trace};

/// Read buffer size
const BUFFER_SIZE: usize = 4096;

/// A connection that sends nothing for this long is closed.
pub(crate) const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// An accepted connection as seen by a [`StreamHandler`]: a plain or TLS
/// socket.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>>;

/// Takes over a connection in place of the echo loop.
///
/// The close-after fault still fires first; the delay fault belongs to the
/// echo loop and is not applied. The connection is closed when the
/// returned future completes.
pub trait StreamHandler: Send + Sync + 'static {
    fn handle<'a>(
        &'a self,
        stream: &'a mut dyn ByteStream,
        peer: SocketAddr,
    ) -> HandlerFuture<'a>;
}

/// Echoes every byte back to the sender, subject to `delay` and
/// `close_after` faults.
#[derive(Clone, Default)]
pub struct EchoServer {
    faults: Faults,
    handler: Option<Arc<dyn StreamHandler>>,
}

impl EchoServer {
    pub fn new(faults: Faults) -> Self {
        Self {
            faults,
            handler: None,
        }
    }

    /// Replace the echo loop.
    pub fn with_handler(mut self, handler: impl StreamHandler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn faults(&self) -> &Faults {
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
            delay = ?self.faults.delay(),
            close_after = ?self.faults.close_after(),
            "TCP server listening"
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

    /// Serve one connection until the peer closes, it goes idle, or the
    /// close-after fault fires.
    pub async fn handle_connection<S>(&self, mut stream: S, peer: SocketAddr) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        info!(peer = %peer, "TCP connection");

        if let Some(close_after) = self.faults.close_after() {
            fault::pause(close_after).await;
            let _ = stream.shutdown().await;
            info!(peer = %peer, ?close_after, "TCP connection closed (close-after)");
            return Ok(());
        }

        let result = match &self.handler {
            Some(handler) => handler.handle(&mut stream, peer).await,
            None => echo(&mut stream, peer, &self.faults).await,
        };
        match result {
            Err(e) if is_disconnect(&e) => Ok(()),
            other => other,
        }
    }
}

/// Echo loop shared by the server default and the keep-alive scenario.
pub(crate) async fn echo<S>(stream: &mut S, peer: SocketAddr, faults: &Faults) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        faults.apply_delay().await;

        let n = match time::timeout(IDLE_TIMEOUT, stream.read(&mut buf)).await {
            Err(_) => {
                debug!(peer = %peer, "Idle timeout, closing connection");
                return Ok(());
            }
            Ok(Ok(0)) => {
                debug!(peer = %peer, "TCP connection closed by client");
                return Ok(());
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(e),
        };

        trace!(peer = %peer, data = %hex(&buf[..n]), "TCP received");

        stream.write_all(&buf[..n]).await?;
        stream.flush().await?;
    }
}

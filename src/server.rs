//! Connection lifecycle shared by every stream listener.
//!
//! A listener runs a single accept loop:
//! 1. `accept()` is polled with a [`POLL_INTERVAL`] timeout so the
//!    [`StopSignal`] is observed even when no client connects.
//! 2. Each accepted socket is handed to its own task. When the listener is
//!    TLS-wrapped, that task first completes the server-side handshake
//!    (bounded by [`HANDSHAKE_TIMEOUT`]); a failed handshake only discards
//!    that connection.
//! 3. The per-connection handler runs to completion in the task. Its errors
//!    are logged and never reach the accept loop.
//!
//! Once the stop signal is observed the listening socket is dropped and the
//! loop returns. Workers that are still running are left to finish on their
//! own.

use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Semaphore;
use tokio::time;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// How often blocking accept/receive calls wake up to check the stop signal.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on a TLS server handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum number of concurrently served connections per listener.
const MAX_CONNECTIONS: usize = 10000;

const LISTEN_BACKLOG: i32 = 128;

/// Cooperative stop flag shared by every listener of a harness.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every listener holding this signal to stop.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// An accepted client connection, plain or TLS-wrapped.
///
/// Owned by exactly one worker; dropping it closes the socket.
pub struct Connection {
    peer: SocketAddr,
    transport: Transport,
}

impl Connection {
    pub fn plain(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            peer,
            transport: Transport::Plain(stream),
        }
    }

    pub fn tls(stream: TlsStream<TcpStream>, peer: SocketAddr) -> Self {
        Self {
            peer,
            transport: Transport::Tls(Box::new(stream)),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.transport, Transport::Tls(_))
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().transport {
            Transport::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Transport::Tls(stream) => Pin::new(&mut **stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().transport {
            Transport::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Transport::Tls(stream) => Pin::new(&mut **stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().transport {
            Transport::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Transport::Tls(stream) => Pin::new(&mut **stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().transport {
            Transport::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Transport::Tls(stream) => Pin::new(&mut **stream).poll_shutdown(cx),
        }
    }
}

/// Resolve a bind host and port into a socket address.
pub async fn resolve(bind: &str, port: u16) -> io::Result<SocketAddr> {
    tokio::net::lookup_host((bind, port))
        .await?
        .next()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("cannot resolve bind address {bind}:{port}"),
            )
        })
}

/// Bind a listening TCP socket with `SO_REUSEADDR` set.
///
/// Must be called from within a Tokio runtime.
pub fn bind_tcp(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    TcpListener::from_std(socket.into())
}

/// Bind a UDP socket with `SO_REUSEADDR` set.
///
/// Must be called from within a Tokio runtime.
pub fn bind_udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

/// Run the accept loop until `stop` is observed.
///
/// `handler` is invoked once per connection on its own task. Only errors
/// from the listening socket itself are returned.
pub async fn serve<H, Fut>(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    stop: StopSignal,
    handler: H,
) -> io::Result<()>
where
    H: Fn(Connection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = io::Result<()>> + Send + 'static,
{
    let local = listener.local_addr()?;
    let handler = Arc::new(handler);
    let connection_limit = Arc::new(Semaphore::new(MAX_CONNECTIONS));

    while !stop.is_stopped() {
        let accepted = match time::timeout(POLL_INTERVAL, listener.accept()).await {
            Ok(accepted) => accepted,
            Err(_) => continue,
        };

        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) if is_per_connection_error(&e) => {
                debug!(address = %local, error = %e, "Accept failed for one connection");
                continue;
            }
            Err(e) => {
                error!(address = %local, error = %e, "Accept loop failed");
                return Err(e);
            }
        };

        let permit = match Arc::clone(&connection_limit).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(peer = %peer, "Connection limit reached, refusing connection");
                continue;
            }
        };

        debug!(peer = %peer, "New connection");

        let handler = Arc::clone(&handler);
        let tls = tls.clone();
        tokio::spawn(async move {
            let connection = match tls {
                None => Connection::plain(stream, peer),
                Some(acceptor) => match handshake(acceptor, stream, peer).await {
                    Ok(connection) => connection,
                    Err(e) => {
                        debug!(peer = %peer, error = %e, "TLS handshake failed");
                        return;
                    }
                },
            };

            if let Err(e) = handler(connection).await {
                debug!(peer = %peer, error = %e, "Connection error");
            }
            drop(permit);
        });
    }

    info!(address = %local, "Listener stopped");
    Ok(())
}

/// Complete a server-side TLS handshake on an accepted socket.
pub async fn handshake(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    peer: SocketAddr,
) -> io::Result<Connection> {
    match time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
        Ok(Ok(stream)) => Ok(Connection::tls(stream, peer)),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "TLS handshake timed out",
        )),
    }
}

/// Errors from `accept()` that concern a single pending connection rather
/// than the listening socket.
fn is_per_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Returns true for errors that simply mean the peer went away.
pub(crate) fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

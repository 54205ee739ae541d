//! UDP echo datagram handler.
//!
//! The receive loop owns the socket; every datagram is answered from its own
//! task through a shared handle. A semaphore caps how many of those tasks
//! may be alive at once. While the cap is reached the loop stops reading,
//! so bursts queue in the kernel socket buffer instead of being lost.

use crate::fault::Faults;
use crate::protocols::hex;
use crate::server::{StopSignal, POLL_INTERVAL};
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time;
use tracing::{debug, error, info, trace};

/// Largest datagram payload accepted.
const DATAGRAM_SIZE: usize = 65535;

/// Default cap on concurrently handled datagrams.
pub const DEFAULT_MAX_INFLIGHT: usize = 1024;

/// Produces the reply to one datagram. `None` sends nothing back.
///
/// Runs after the drop and delay faults, once per surviving datagram.
pub trait DatagramHandler: Send + Sync + 'static {
    fn handle(&self, peer: SocketAddr, data: &Bytes) -> Option<Bytes>;
}

impl<F> DatagramHandler for F
where
    F: Fn(SocketAddr, &Bytes) -> Option<Bytes> + Send + Sync + 'static,
{
    fn handle(&self, peer: SocketAddr, data: &Bytes) -> Option<Bytes> {
        self(peer, data)
    }
}

/// Default handler: the reply is the datagram itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

impl DatagramHandler for Echo {
    fn handle(&self, _peer: SocketAddr, data: &Bytes) -> Option<Bytes> {
        Some(data.clone())
    }
}

/// Echoes every datagram back to its sender, subject to `drop_rate` and
/// `delay` faults.
#[derive(Clone)]
pub struct UdpEchoServer {
    faults: Faults,
    max_inflight: usize,
    handler: Arc<dyn DatagramHandler>,
}

impl UdpEchoServer {
    pub fn new(faults: Faults) -> Self {
        Self {
            faults,
            max_inflight: DEFAULT_MAX_INFLIGHT,
            handler: Arc::new(Echo),
        }
    }

    /// Replace the echo reply.
    pub fn with_handler(mut self, handler: impl DatagramHandler) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Bound the number of datagrams being handled at once (minimum 1).
    pub fn with_max_inflight(mut self, max_inflight: usize) -> Self {
        self.max_inflight = max_inflight.max(1);
        self
    }

    pub fn faults(&self) -> &Faults {
        &self.faults
    }

    /// Run the receive loop on `socket` until `stop` is set.
    pub async fn serve(self, socket: UdpSocket, stop: StopSignal) -> io::Result<()> {
        let local = socket.local_addr()?;
        info!(
            address = %local,
            drop_rate = self.faults.drop_rate(),
            delay = ?self.faults.delay(),
            max_inflight = self.max_inflight,
            "UDP server listening"
        );

        let socket = Arc::new(socket);
        let inflight = Arc::new(Semaphore::new(self.max_inflight));
        let mut buf = vec![0u8; DATAGRAM_SIZE];
        let mut permit: Option<OwnedSemaphorePermit> = None;

        while !stop.is_stopped() {
            // Take a worker slot before reading so a full cap leaves the
            // next datagram queued in the socket.
            let held = match permit.take() {
                Some(held) => held,
                None => {
                    match time::timeout(POLL_INTERVAL, Arc::clone(&inflight).acquire_owned())
                        .await
                    {
                        Ok(Ok(held)) => held,
                        Ok(Err(_)) => break,
                        Err(_) => {
                            debug!(address = %local, "All datagram workers busy");
                            continue;
                        }
                    }
                }
            };

            let received = match time::timeout(POLL_INTERVAL, socket.recv_from(&mut buf)).await {
                Ok(received) => received,
                Err(_) => {
                    permit = Some(held);
                    continue;
                }
            };

            let (n, peer) = match received {
                Ok(pair) => pair,
                // ICMP errors from earlier replies surface here on some
                // platforms; they say nothing about the socket itself.
                Err(e) if is_transient(&e) => {
                    debug!(address = %local, error = %e, "UDP receive error");
                    permit = Some(held);
                    continue;
                }
                Err(e) => {
                    error!(address = %local, error = %e, "UDP receive loop failed");
                    return Err(e);
                }
            };

            let data = Bytes::copy_from_slice(&buf[..n]);
            let socket = Arc::clone(&socket);
            let faults = self.faults;
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                handle_datagram(&socket, faults, handler.as_ref(), peer, data).await;
                drop(held);
            });
        }

        info!(address = %local, "Listener stopped");
        Ok(())
    }
}

impl Default for UdpEchoServer {
    fn default() -> Self {
        Self::new(Faults::none())
    }
}

/// Answer one datagram.
async fn handle_datagram(
    socket: &UdpSocket,
    faults: Faults,
    handler: &dyn DatagramHandler,
    peer: SocketAddr,
    data: Bytes,
) {
    if faults.should_drop() {
        info!(peer = %peer, bytes = data.len(), "UDP datagram dropped");
        return;
    }

    faults.apply_delay().await;
    trace!(peer = %peer, data = %hex(&data), "UDP received");

    let Some(reply) = handler.handle(peer, &data) else {
        debug!(peer = %peer, "No reply for datagram");
        return;
    };

    match time::timeout(POLL_INTERVAL, socket.send_to(&reply, peer)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => debug!(peer = %peer, error = %e, "UDP send failed"),
        Err(_) => debug!(peer = %peer, "UDP send timed out"),
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::bind_udp;
    use std::time::{Duration, Instant};

    async fn start(server: UdpEchoServer) -> (SocketAddr, StopSignal) {
        let socket = bind_udp("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = socket.local_addr().unwrap();
        let stop = StopSignal::new();
        tokio::spawn(server.serve(socket, stop.clone()));
        (addr, stop)
    }

    async fn client() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").await.unwrap()
    }

    #[tokio::test]
    async fn test_every_datagram_echoed_once() {
        let (addr, stop) = start(UdpEchoServer::default()).await;
        let client = client().await;

        let mut buf = [0u8; 64];
        for i in 0..10u8 {
            let payload = [b'x', i, 0xff];
            client.send_to(&payload, addr).await.unwrap();
            let (n, from) = time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(from, addr);
            assert_eq!(&buf[..n], &payload);
        }

        // No extra replies are pending.
        let extra = time::timeout(Duration::from_millis(200), client.recv_from(&mut buf)).await;
        assert!(extra.is_err());
        stop.stop();
    }

    #[tokio::test]
    async fn test_empty_datagram_echoed() {
        let (addr, stop) = start(UdpEchoServer::default()).await;
        let client = client().await;

        client.send_to(&[], addr).await.unwrap();
        let mut buf = [0u8; 8];
        let (n, _) = time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
        stop.stop();
    }

    #[tokio::test]
    async fn test_drop_everything() {
        let faults = Faults::none().with_drop_rate(1.0);
        let (addr, stop) = start(UdpEchoServer::new(faults)).await;
        let client = client().await;

        for _ in 0..20 {
            client.send_to(b"lost", addr).await.unwrap();
        }
        let mut buf = [0u8; 8];
        let reply = time::timeout(Duration::from_millis(500), client.recv_from(&mut buf)).await;
        assert!(reply.is_err(), "got a reply with drop_rate 1.0");
        stop.stop();
    }

    #[tokio::test]
    async fn test_delay() {
        let faults = Faults::none().with_delay(Duration::from_millis(150));
        let (addr, stop) = start(UdpEchoServer::new(faults)).await;
        let client = client().await;

        let started = Instant::now();
        client.send_to(b"slow", addr).await.unwrap();
        let mut buf = [0u8; 8];
        let (n, _) = time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"slow");
        assert!(started.elapsed() >= Duration::from_millis(150));
        stop.stop();
    }

    #[tokio::test]
    async fn test_delayed_datagram_does_not_block_others() {
        let faults = Faults::none().with_delay(Duration::from_millis(300));
        let (addr, stop) = start(UdpEchoServer::new(faults)).await;
        let client = client().await;

        let started = Instant::now();
        for payload in [&b"a"[..], b"b", b"c"] {
            client.send_to(payload, addr).await.unwrap();
        }
        let mut seen = Vec::new();
        let mut buf = [0u8; 8];
        for _ in 0..3 {
            let (n, _) = time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
                .await
                .unwrap()
                .unwrap();
            seen.push(buf[..n].to_vec());
        }
        seen.sort();
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        // Handled concurrently, so well under three back-to-back delays.
        assert!(started.elapsed() < Duration::from_millis(850));
        stop.stop();
    }

    #[tokio::test]
    async fn test_full_worker_cap_delays_instead_of_dropping() {
        let faults = Faults::none().with_delay(Duration::from_millis(200));
        let server = UdpEchoServer::new(faults).with_max_inflight(2);
        let (addr, stop) = start(server).await;
        let client = client().await;

        let started = Instant::now();
        for i in 0..6u8 {
            client.send_to(&[i], addr).await.unwrap();
        }

        let mut seen = Vec::new();
        let mut buf = [0u8; 8];
        for _ in 0..6 {
            let (n, _) = time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
                .await
                .expect("datagram went unanswered")
                .unwrap();
            seen.extend_from_slice(&buf[..n]);
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
        // Two workers, three rounds of the delay.
        assert!(started.elapsed() >= Duration::from_millis(550));
        stop.stop();
    }

    #[tokio::test]
    async fn test_custom_handler() {
        let server = UdpEchoServer::default().with_handler(|_peer: SocketAddr, data: &Bytes| {
            if data.as_ref() == b"quiet" {
                None
            } else {
                Some(Bytes::from(data.to_ascii_uppercase()))
            }
        });
        let (addr, stop) = start(server).await;
        let client = client().await;

        let mut buf = [0u8; 16];
        client.send_to(b"quiet", addr).await.unwrap();
        client.send_to(b"shout", addr).await.unwrap();
        let (n, _) = time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"SHOUT");

        let extra = time::timeout(Duration::from_millis(200), client.recv_from(&mut buf)).await;
        assert!(extra.is_err());
        stop.stop();
    }

    #[test]
    fn test_max_inflight_at_least_one() {
        let server = UdpEchoServer::default().with_max_inflight(0);
        assert_eq!(server.max_inflight, 1);
    }
}

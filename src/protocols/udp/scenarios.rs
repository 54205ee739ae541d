//! Canned datagram handlers for common failure scenarios.
//!
//! Each type implements [`DatagramHandler`] and can be installed with
//! [`UdpEchoServer::with_handler`](super::UdpEchoServer::with_handler). Drop
//! rate and delay still apply before any of them runs.

use super::handler::DatagramHandler;
use bytes::Bytes;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Mutex;

/// Reply sent by [`ErrorResponse`].
pub const ERROR_REPLY: &[u8] = b"ERROR\n";

/// Echoes at most `size` bytes of each datagram.
#[derive(Debug, Clone, Copy)]
pub struct Truncate {
    pub size: usize,
}

impl DatagramHandler for Truncate {
    fn handle(&self, _peer: SocketAddr, data: &Bytes) -> Option<Bytes> {
        Some(data.slice(..data.len().min(self.size)))
    }
}

/// Swallows every datagram.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResponse;

impl DatagramHandler for NoResponse {
    fn handle(&self, _peer: SocketAddr, _data: &Bytes) -> Option<Bytes> {
        None
    }
}

/// Answers every datagram with [`ERROR_REPLY`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorResponse;

impl DatagramHandler for ErrorResponse {
    fn handle(&self, _peer: SocketAddr, _data: &Bytes) -> Option<Bytes> {
        Some(Bytes::from_static(ERROR_REPLY))
    }
}

/// Answers each datagram with the payload received `lag` datagrams
/// earlier. The first `lag` datagrams get no reply. The backlog is shared
/// by all peers.
#[derive(Debug, Default)]
pub struct OutOfOrder {
    lag: usize,
    backlog: Mutex<VecDeque<Bytes>>,
}

impl OutOfOrder {
    pub fn new(lag: usize) -> Self {
        Self {
            lag,
            backlog: Mutex::new(VecDeque::with_capacity(lag + 1)),
        }
    }
}

impl DatagramHandler for OutOfOrder {
    fn handle(&self, _peer: SocketAddr, data: &Bytes) -> Option<Bytes> {
        let mut backlog = self.backlog.lock().unwrap_or_else(|e| e.into_inner());
        backlog.push_back(data.clone());
        if backlog.len() > self.lag {
            backlog.pop_front()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::Faults;
    use crate::protocols::udp::UdpEchoServer;
    use crate::server::{bind_udp, StopSignal};
    use std::time::Duration;
    use tokio::net::UdpSocket;
    use tokio::time;

    fn peer() -> SocketAddr {
        "127.0.0.1:45000".parse().unwrap()
    }

    fn reply(handler: &dyn DatagramHandler, data: &'static [u8]) -> Option<Bytes> {
        handler.handle(peer(), &Bytes::from_static(data))
    }

    #[test]
    fn test_truncate() {
        let handler = Truncate { size: 3 };
        assert_eq!(reply(&handler, b"abcdef").unwrap(), &b"abc"[..]);
        assert_eq!(reply(&handler, b"ab").unwrap(), &b"ab"[..]);
        assert_eq!(reply(&Truncate { size: 0 }, b"abc").unwrap(), &b""[..]);
    }

    #[test]
    fn test_no_response_and_error() {
        assert_eq!(reply(&NoResponse, b"hello"), None);
        assert_eq!(reply(&ErrorResponse, b"hello").unwrap(), ERROR_REPLY);
    }

    #[test]
    fn test_out_of_order_lags_replies() {
        let handler = OutOfOrder::new(2);
        assert_eq!(reply(&handler, b"1"), None);
        assert_eq!(reply(&handler, b"2"), None);
        assert_eq!(reply(&handler, b"3").unwrap(), &b"1"[..]);
        assert_eq!(reply(&handler, b"4").unwrap(), &b"2"[..]);
        assert_eq!(reply(&handler, b"5").unwrap(), &b"3"[..]);
    }

    #[test]
    fn test_out_of_order_without_lag_echoes() {
        let handler = OutOfOrder::new(0);
        assert_eq!(reply(&handler, b"a").unwrap(), &b"a"[..]);
        assert_eq!(reply(&handler, b"b").unwrap(), &b"b"[..]);
    }

    #[tokio::test]
    async fn test_truncate_over_socket() {
        let socket = bind_udp("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = socket.local_addr().unwrap();
        let stop = StopSignal::new();
        let server = UdpEchoServer::new(Faults::none()).with_handler(Truncate { size: 4 });
        tokio::spawn(server.serve(socket, stop.clone()));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"truncated", addr).await.unwrap();
        let mut buf = [0u8; 16];
        let (n, _) = time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"trun");
        stop.stop();
    }
}

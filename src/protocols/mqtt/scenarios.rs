//! Canned [`MqttHooks`] for misbehaving-broker scenarios.
//!
//! Install one with [`MqttServer::with_hooks`](super::MqttServer::with_hooks).

use super::handler::MqttHooks;
use super::parser::Publish;
use bytes::Bytes;
use std::net::SocketAddr;
use tracing::warn;

/// CONNACK code 1: unacceptable protocol version.
pub const UNACCEPTABLE_PROTOCOL_VERSION: u8 = 1;
/// CONNACK code 4: bad user name or password.
pub const BAD_CREDENTIALS: u8 = 4;
/// CONNACK code 5: not authorized.
pub const NOT_AUTHORIZED: u8 = 5;

/// Bytes sent by [`MalformedPacket`]: reserved packet type 15 followed by
/// an unterminated remaining length.
pub const MALFORMED: &[u8] = &[0xFF, 0xFF];

/// Refuses every CONNECT with `return_code` and closes the connection.
#[derive(Debug, Clone, Copy)]
pub struct RefuseConnect {
    pub return_code: u8,
}

impl Default for RefuseConnect {
    fn default() -> Self {
        Self {
            return_code: UNACCEPTABLE_PROTOCOL_VERSION,
        }
    }
}

impl MqttHooks for RefuseConnect {
    fn connack_code(&self, _peer: SocketAddr, _client_id: &str) -> u8 {
        self.return_code
    }
}

/// Follows the CONNACK with [`MALFORMED`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MalformedPacket;

impl MqttHooks for MalformedPacket {
    fn after_connack(&self, _peer: SocketAddr, _client_id: &str) -> Vec<Bytes> {
        vec![Bytes::from_static(MALFORMED)]
    }
}

/// Pushes one PUBLISH to every client right after its CONNACK. QoS 1 and 2
/// messages carry packet identifier 1.
#[derive(Debug, Clone)]
pub struct PublishOnConnect {
    pub topic: String,
    pub qos: u8,
    pub payload: Bytes,
}

impl PublishOnConnect {
    pub fn new(topic: impl Into<String>, qos: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            qos,
            payload: payload.into(),
        }
    }
}

impl MqttHooks for PublishOnConnect {
    fn after_connack(&self, _peer: SocketAddr, client_id: &str) -> Vec<Bytes> {
        let packet_id = if self.qos > 0 { 1 } else { 0 };
        let publish = Publish::new(self.topic.clone(), self.qos, packet_id, self.payload.clone());
        match publish.encode() {
            Ok(packet) => vec![packet.freeze()],
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "Cannot encode scripted PUBLISH");
                Vec::new()
            }
        }
    }
}

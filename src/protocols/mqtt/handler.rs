//! MQTT connection handler.
//!
//! Each connection moves from awaiting CONNECT to connected and ends on
//! DISCONNECT, EOF, idle timeout, a framing error, or when another
//! connection takes over its client id. Acknowledgments are written in the
//! order packets were framed.

use super::parser::{
    ack, connack, decode_packet_id, parse_packet, pingresp, suback, Connect, Packet, PacketType,
    ParseResult, Publish, Subscribe, Unsubscribe,
};
use super::session::{SessionHandle, SessionTable};
use crate::protocols::hex;
use crate::server::{self, is_disconnect, StopSignal};
use bytes::{Buf, Bytes, BytesMut};
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
const BUFFER_SIZE: usize = 4 * 1024;

/// A connection that sends nothing for this long is closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Callbacks invoked as clients connect and publish.
///
/// Every method defaults to doing nothing, so implementors only override
/// the events they care about.
pub trait MqttHooks: Send + Sync + 'static {
    /// CONNACK return code for a CONNECT. Anything but 0 refuses the client
    /// and closes the connection.
    fn connack_code(&self, _peer: SocketAddr, _client_id: &str) -> u8 {
        0
    }

    /// Raw packets written right after an accepted CONNACK.
    fn after_connack(&self, _peer: SocketAddr, _client_id: &str) -> Vec<Bytes> {
        Vec::new()
    }

    /// Called after the CONNACK has been sent.
    fn on_connect(&self, _peer: SocketAddr, _client_id: &str, _clean_session: bool) {}

    /// Called for every decoded PUBLISH, before it is acknowledged.
    /// `packet_id` is 0 for QoS 0.
    fn on_publish(&self, _topic: &str, _qos: u8, _payload: &[u8], _packet_id: u16) {}

    /// Called for every decoded SUBSCRIBE, before the SUBACK.
    fn on_subscribe(&self, _packet_id: u16, _topics: &[(String, u8)]) {}
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl MqttHooks for NoHooks {}

enum Flow {
    Continue,
    Close,
}

/// MQTT session engine.
pub struct MqttServer {
    retain: bool,
    sessions: Arc<SessionTable>,
    hooks: Arc<dyn MqttHooks>,
}

impl MqttServer {
    /// With `retain` set, the last non-empty payload per topic is kept.
    pub fn new(retain: bool) -> Self {
        Self {
            retain,
            sessions: Arc::new(SessionTable::new()),
            hooks: Arc::new(NoHooks),
        }
    }

    pub fn with_hooks(mut self, hooks: impl MqttHooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Use an existing session table, e.g. one shared with another listener.
    pub fn with_sessions(mut self, sessions: Arc<SessionTable>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionTable> {
        &self.sessions
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
            retain = self.retain,
            "MQTT server listening"
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

    /// Serve one client until its connection ends.
    pub async fn handle_connection<S>(&self, mut stream: S, peer: SocketAddr) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut session = None;
        let result = self.session_loop(&mut stream, peer, &mut session).await;

        if let Some(handle) = session {
            if self.sessions.unregister(&handle) {
                debug!(peer = %peer, client_id = %handle.client_id(), "Session removed");
            }
        }
        info!(peer = %peer, "MQTT client disconnected");

        match result {
            Err(e) if is_disconnect(&e) => Ok(()),
            other => other,
        }
    }

    async fn session_loop<S>(
        &self,
        stream: &mut S,
        peer: SocketAddr,
        session: &mut Option<SessionHandle>,
    ) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

        loop {
            loop {
                match parse_packet(&buffer) {
                    ParseResult::Complete(packet, consumed) => {
                        buffer.advance(consumed);
                        if let Flow::Close = self.handle_packet(stream, peer, packet, session).await? {
                            return Ok(());
                        }
                    }
                    ParseResult::Incomplete => break,
                    ParseResult::Error(e) => {
                        warn!(peer = %peer, error = %e, "MQTT framing error, closing connection");
                        return Ok(());
                    }
                }
            }

            let evicted = async {
                match session.as_ref() {
                    Some(handle) => handle.evicted().await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = evicted => {
                    info!(peer = %peer, "Client id taken over by a new connection");
                    return Ok(());
                }
                read = time::timeout(IDLE_TIMEOUT, stream.read_buf(&mut buffer)) => match read {
                    Err(_) => {
                        debug!(peer = %peer, "Idle timeout, closing connection");
                        return Ok(());
                    }
                    Ok(Ok(0)) => return Ok(()),
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => return Err(e),
                },
            }
        }
    }

    async fn handle_packet<S>(
        &self,
        stream: &mut S,
        peer: SocketAddr,
        packet: Packet,
        session: &mut Option<SessionHandle>,
    ) -> io::Result<Flow>
    where
        S: AsyncWrite + Unpin,
    {
        trace!(
            peer = %peer,
            packet_type = ?packet.packet_type,
            flags = packet.flags,
            payload = %hex(&packet.payload),
            "MQTT packet"
        );

        match packet.packet_type {
            PacketType::Connect => {
                if session.is_some() {
                    warn!(peer = %peer, "Second CONNECT on a connection, closing");
                    return Ok(Flow::Close);
                }
                return self.handle_connect(stream, peer, &packet, session).await;
            }

            PacketType::Disconnect => {
                info!(peer = %peer, "MQTT DISCONNECT");
                return Ok(Flow::Close);
            }

            other => {
                if session.is_none() {
                    debug!(peer = %peer, packet_type = ?other, "Packet before CONNECT");
                }
                self.handle_connected(stream, peer, &packet).await?;
            }
        }

        Ok(Flow::Continue)
    }

    async fn handle_connect<S>(
        &self,
        stream: &mut S,
        peer: SocketAddr,
        packet: &Packet,
        session: &mut Option<SessionHandle>,
    ) -> io::Result<Flow>
    where
        S: AsyncWrite + Unpin,
    {
        let connect = match Connect::decode(&packet.payload) {
            Ok(connect) => connect,
            Err(e) => {
                debug!(peer = %peer, error = %e, "Malformed CONNECT ignored");
                return Ok(Flow::Continue);
            }
        };

        let code = self.hooks.connack_code(peer, &connect.client_id);
        if code != 0 {
            info!(peer = %peer, client_id = %connect.client_id, code, "MQTT CONNECT refused");
            write_packet(stream, &connack(false, code)).await?;
            return Ok(Flow::Close);
        }

        let handle = self
            .sessions
            .register(&connect.client_id, peer, connect.clean_session);
        info!(
            peer = %peer,
            client_id = %handle.client_id(),
            clean_session = connect.clean_session,
            keep_alive = connect.keep_alive,
            protocol = %connect.protocol_name,
            level = connect.protocol_level,
            "MQTT CONNECT"
        );
        if let Some(will) = &connect.will {
            debug!(peer = %peer, topic = %will.topic, qos = will.qos, "Will registered");
        }
        if let Some(username) = &connect.username {
            debug!(peer = %peer, username = %username, "Credentials supplied");
        }

        // Stored before any write so a failed write still unregisters it.
        let client_id = handle.client_id().to_string();
        *session = Some(handle);

        write_packet(stream, &connack(false, 0)).await?;
        for extra in self.hooks.after_connack(peer, &client_id) {
            trace!(peer = %peer, data = %hex(&extra), "MQTT extra packet");
            write_packet(stream, &extra).await?;
        }
        self.hooks.on_connect(peer, &client_id, connect.clean_session);
        Ok(Flow::Continue)
    }

    async fn handle_connected<S>(
        &self,
        stream: &mut S,
        peer: SocketAddr,
        packet: &Packet,
    ) -> io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        match packet.packet_type {
            PacketType::Publish => {
                let publish = match Publish::decode(packet.flags, &packet.payload) {
                    Ok(publish) => publish,
                    Err(e) => {
                        debug!(peer = %peer, error = %e, "Malformed PUBLISH ignored");
                        return Ok(());
                    }
                };
                self.handle_publish(stream, peer, publish).await
            }

            PacketType::PubAck | PacketType::PubComp => {
                match decode_packet_id(&packet.payload) {
                    Ok(packet_id) => {
                        debug!(peer = %peer, packet_type = ?packet.packet_type, packet_id, "Acknowledged")
                    }
                    Err(e) => debug!(peer = %peer, error = %e, "Malformed acknowledgment ignored"),
                }
                Ok(())
            }

            PacketType::PubRec => match decode_packet_id(&packet.payload) {
                Ok(packet_id) => {
                    debug!(peer = %peer, packet_id, "MQTT PUBREC");
                    write_packet(stream, &ack(PacketType::PubRel, 0b0010, packet_id)).await
                }
                Err(e) => {
                    debug!(peer = %peer, error = %e, "Malformed PUBREC ignored");
                    Ok(())
                }
            },

            PacketType::PubRel => match decode_packet_id(&packet.payload) {
                Ok(packet_id) => {
                    debug!(peer = %peer, packet_id, "MQTT PUBREL");
                    write_packet(stream, &ack(PacketType::PubComp, 0, packet_id)).await
                }
                Err(e) => {
                    debug!(peer = %peer, error = %e, "Malformed PUBREL ignored");
                    Ok(())
                }
            },

            PacketType::Subscribe => {
                let subscribe = match Subscribe::decode(&packet.payload) {
                    Ok(subscribe) => subscribe,
                    Err(e) => {
                        debug!(peer = %peer, error = %e, "Malformed SUBSCRIBE ignored");
                        return Ok(());
                    }
                };
                for (topic, qos) in &subscribe.topics {
                    info!(peer = %peer, packet_id = subscribe.packet_id, topic = %topic, qos, "MQTT SUBSCRIBE");
                }
                self.hooks
                    .on_subscribe(subscribe.packet_id, &subscribe.topics);

                let granted: Vec<u8> = subscribe.topics.iter().map(|(_, qos)| *qos).collect();
                match suback(subscribe.packet_id, &granted) {
                    Ok(reply) => write_packet(stream, &reply).await,
                    Err(e) => {
                        warn!(peer = %peer, error = %e, "Cannot encode SUBACK");
                        Ok(())
                    }
                }
            }

            PacketType::Unsubscribe => {
                let unsubscribe = match Unsubscribe::decode(&packet.payload) {
                    Ok(unsubscribe) => unsubscribe,
                    Err(e) => {
                        debug!(peer = %peer, error = %e, "Malformed UNSUBSCRIBE ignored");
                        return Ok(());
                    }
                };
                for topic in &unsubscribe.topics {
                    info!(peer = %peer, packet_id = unsubscribe.packet_id, topic = %topic, "MQTT UNSUBSCRIBE");
                }
                write_packet(stream, &ack(PacketType::UnsubAck, 0, unsubscribe.packet_id)).await
            }

            PacketType::PingReq => write_packet(stream, &pingresp()).await,

            other => {
                debug!(peer = %peer, packet_type = ?other, "Unexpected packet ignored");
                Ok(())
            }
        }
    }

    async fn handle_publish<S>(
        &self,
        stream: &mut S,
        peer: SocketAddr,
        publish: Publish,
    ) -> io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        info!(
            peer = %peer,
            topic = %publish.topic,
            qos = publish.qos,
            packet_id = publish.packet_id,
            bytes = publish.payload.len(),
            "MQTT PUBLISH"
        );
        trace!(peer = %peer, payload = %hex(&publish.payload), "PUBLISH payload");

        if self.retain && !publish.payload.is_empty() {
            self.sessions.retain(&publish.topic, publish.payload.clone());
        }

        self.hooks
            .on_publish(&publish.topic, publish.qos, &publish.payload, publish.packet_id);

        match publish.qos {
            1 => write_packet(stream, &ack(PacketType::PubAck, 0, publish.packet_id)).await,
            2 => write_packet(stream, &ack(PacketType::PubRec, 0, publish.packet_id)).await,
            _ => Ok(()),
        }
    }
}

impl Default for MqttServer {
    fn default() -> Self {
        Self::new(false)
    }
}

async fn write_packet<S>(stream: &mut S, packet: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(packet).await?;
    stream.flush().await
}

//! MQTT 3.1.1 control packet codec.
//!
//! Every packet starts with a fixed header:
//!
//! ```text
//! byte 0      packet type (high nibble) | flags (low nibble)
//! byte 1..=4  remaining length, base-128 with a continuation bit
//! ```
//!
//! followed by exactly `remaining length` bytes of variable header and
//! payload. Strings are a big-endian u16 length followed by UTF-8 bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Largest value the four-byte remaining length can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Control packet types, numbered as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => PacketType::Connect,
            2 => PacketType::ConnAck,
            3 => PacketType::Publish,
            4 => PacketType::PubAck,
            5 => PacketType::PubRec,
            6 => PacketType::PubRel,
            7 => PacketType::PubComp,
            8 => PacketType::Subscribe,
            9 => PacketType::SubAck,
            10 => PacketType::Unsubscribe,
            11 => PacketType::UnsubAck,
            12 => PacketType::PingReq,
            13 => PacketType::PingResp,
            14 => PacketType::Disconnect,
            _ => return None,
        })
    }
}

/// A framed control packet whose body has not been decoded yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: PacketType,
    pub flags: u8,
    pub payload: Bytes,
}

/// Codec errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Remaining length used a fifth byte
    MalformedRemainingLength,
    /// Value does not fit in four remaining-length bytes
    RemainingLengthTooLarge(usize),
    /// Packet type 0 or 15
    InvalidPacketType(u8),
    /// Body ended before the named field
    Truncated(&'static str),
    /// PUBLISH with both QoS bits set
    InvalidQos(u8),
    /// String or binary field longer than a u16 length prefix allows
    FieldTooLong(usize),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::MalformedRemainingLength => write!(f, "Malformed remaining length"),
            DecodeError::RemainingLengthTooLarge(len) => {
                write!(f, "Remaining length {} exceeds {}", len, MAX_REMAINING_LENGTH)
            }
            DecodeError::InvalidPacketType(t) => write!(f, "Invalid packet type: {}", t),
            DecodeError::Truncated(field) => write!(f, "Packet truncated at {}", field),
            DecodeError::InvalidQos(qos) => write!(f, "Invalid QoS: {}", qos),
            DecodeError::FieldTooLong(len) => {
                write!(f, "Field of {} bytes exceeds {}", len, u16::MAX)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Result of framing a packet
#[derive(Debug)]
pub enum ParseResult {
    /// A complete packet and the number of bytes it occupied
    Complete(Packet, usize),
    /// Need more data
    Incomplete,
    /// The stream cannot be framed any further
    Error(DecodeError),
}

/// Frame one packet from the front of `buffer`.
pub fn parse_packet(buffer: &[u8]) -> ParseResult {
    let first = match buffer.first() {
        Some(&b) => b,
        None => return ParseResult::Incomplete,
    };

    let (remaining, len_bytes) = match decode_remaining_length(&buffer[1..]) {
        Ok(Some(decoded)) => decoded,
        Ok(None) => return ParseResult::Incomplete,
        Err(e) => return ParseResult::Error(e),
    };

    let packet_type = match PacketType::from_u8(first >> 4) {
        Some(t) => t,
        None => return ParseResult::Error(DecodeError::InvalidPacketType(first >> 4)),
    };

    let start = 1 + len_bytes;
    let total = start + remaining;
    if buffer.len() < total {
        return ParseResult::Incomplete;
    }

    let packet = Packet {
        packet_type,
        flags: first & 0x0F,
        payload: Bytes::copy_from_slice(&buffer[start..total]),
    };
    ParseResult::Complete(packet, total)
}

/// Decode a remaining length.
///
/// Returns the value and the number of bytes it occupied, or `None` if the
/// buffer ends before the last length byte.
pub fn decode_remaining_length(buffer: &[u8]) -> Result<Option<(usize, usize)>, DecodeError> {
    let mut value = 0usize;
    for (i, &byte) in buffer.iter().enumerate() {
        if i == 4 {
            return Err(DecodeError::MalformedRemainingLength);
        }
        value |= ((byte & 0x7F) as usize) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    if buffer.len() >= 4 {
        // Four continuation bits in a row.
        return Err(DecodeError::MalformedRemainingLength);
    }
    Ok(None)
}

/// Append the remaining-length encoding of `len` to `buf`.
pub fn encode_remaining_length(len: usize, buf: &mut BytesMut) -> Result<(), DecodeError> {
    if len > MAX_REMAINING_LENGTH {
        return Err(DecodeError::RemainingLengthTooLarge(len));
    }
    let mut value = len;
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            return Ok(());
        }
    }
}

/// Serialize a packet from its type, flags and body.
pub fn encode_packet(
    packet_type: PacketType,
    flags: u8,
    body: &[u8],
) -> Result<BytesMut, DecodeError> {
    let mut buf = BytesMut::with_capacity(5 + body.len());
    buf.put_u8(((packet_type as u8) << 4) | (flags & 0x0F));
    encode_remaining_length(body.len(), &mut buf)?;
    buf.put_slice(body);
    Ok(buf)
}

/// CONNACK with the given session-present flag and return code.
pub fn connack(session_present: bool, return_code: u8) -> Bytes {
    Bytes::copy_from_slice(&[
        (PacketType::ConnAck as u8) << 4,
        2,
        session_present as u8,
        return_code,
    ])
}

/// A two-byte acknowledgment (PUBACK, PUBREC, PUBREL, PUBCOMP, UNSUBACK).
pub fn ack(packet_type: PacketType, flags: u8, packet_id: u16) -> Bytes {
    let [hi, lo] = packet_id.to_be_bytes();
    Bytes::copy_from_slice(&[((packet_type as u8) << 4) | (flags & 0x0F), 2, hi, lo])
}

/// SUBACK carrying one granted QoS byte per requested topic.
pub fn suback(packet_id: u16, granted: &[u8]) -> Result<Bytes, DecodeError> {
    let mut body = Vec::with_capacity(2 + granted.len());
    body.extend_from_slice(&packet_id.to_be_bytes());
    body.extend_from_slice(granted);
    Ok(encode_packet(PacketType::SubAck, 0, &body)?.freeze())
}

pub fn pingresp() -> Bytes {
    Bytes::from_static(&[(PacketType::PingResp as u8) << 4, 0])
}

/// Last-will settings from a CONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub message: Bytes,
    pub qos: u8,
    pub retain: bool,
}

/// CONNECT body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub protocol_name: String,
    pub protocol_level: u8,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<Will>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
}

impl Connect {
    /// A minimal MQTT 3.1.1 CONNECT for `client_id`.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            protocol_name: "MQTT".to_string(),
            protocol_level: 4,
            clean_session: true,
            keep_alive: 60,
            client_id: client_id.into(),
            will: None,
            username: None,
            password: None,
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = payload;
        let protocol_name = read_string(&mut buf, "protocol name")?;
        let protocol_level = read_u8(&mut buf, "protocol level")?;
        let flags = read_u8(&mut buf, "connect flags")?;
        let keep_alive = read_u16(&mut buf, "keep alive")?;
        let client_id = read_string(&mut buf, "client identifier")?;

        let will = if flags & 0x04 != 0 {
            let topic = read_string(&mut buf, "will topic")?;
            let message = read_binary(&mut buf, "will message")?;
            Some(Will {
                topic,
                message,
                qos: (flags >> 3) & 0x03,
                retain: flags & 0x20 != 0,
            })
        } else {
            None
        };

        let username = if flags & 0x80 != 0 {
            Some(read_string(&mut buf, "username")?)
        } else {
            None
        };
        let password = if flags & 0x40 != 0 {
            Some(read_binary(&mut buf, "password")?)
        } else {
            None
        };

        Ok(Self {
            protocol_name,
            protocol_level,
            clean_session: flags & 0x02 != 0,
            keep_alive,
            client_id,
            will,
            username,
            password,
        })
    }

    pub fn encode(&self) -> Result<BytesMut, DecodeError> {
        let mut flags = 0u8;
        if self.clean_session {
            flags |= 0x02;
        }
        if let Some(will) = &self.will {
            flags |= 0x04 | ((will.qos & 0x03) << 3);
            if will.retain {
                flags |= 0x20;
            }
        }
        if self.username.is_some() {
            flags |= 0x80;
        }
        if self.password.is_some() {
            flags |= 0x40;
        }

        let mut body = BytesMut::new();
        put_string(&mut body, self.protocol_name.as_bytes())?;
        body.put_u8(self.protocol_level);
        body.put_u8(flags);
        body.put_u16(self.keep_alive);
        put_string(&mut body, self.client_id.as_bytes())?;
        if let Some(will) = &self.will {
            put_string(&mut body, will.topic.as_bytes())?;
            put_string(&mut body, &will.message)?;
        }
        if let Some(username) = &self.username {
            put_string(&mut body, username.as_bytes())?;
        }
        if let Some(password) = &self.password {
            put_string(&mut body, password)?;
        }
        encode_packet(PacketType::Connect, 0, &body)
    }
}

/// PUBLISH body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub qos: u8,
    pub retain: bool,
    pub dup: bool,
    /// Zero for QoS 0
    pub packet_id: u16,
    pub payload: Bytes,
}

impl Publish {
    pub fn new(topic: impl Into<String>, qos: u8, packet_id: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            qos,
            retain: false,
            dup: false,
            packet_id,
            payload: payload.into(),
        }
    }

    pub fn decode(flags: u8, payload: &Bytes) -> Result<Self, DecodeError> {
        let qos = (flags >> 1) & 0x03;
        if qos == 3 {
            return Err(DecodeError::InvalidQos(qos));
        }

        let mut buf = payload.clone();
        let topic = read_string(&mut buf, "topic")?;
        let packet_id = if qos > 0 {
            read_u16(&mut buf, "packet identifier")?
        } else {
            0
        };

        Ok(Self {
            topic,
            qos,
            retain: flags & 0x01 != 0,
            dup: flags & 0x08 != 0,
            packet_id,
            payload: buf,
        })
    }

    pub fn encode(&self) -> Result<BytesMut, DecodeError> {
        let mut flags = (self.qos & 0x03) << 1;
        if self.retain {
            flags |= 0x01;
        }
        if self.dup {
            flags |= 0x08;
        }

        let mut body = BytesMut::with_capacity(4 + self.topic.len() + self.payload.len());
        put_string(&mut body, self.topic.as_bytes())?;
        if self.qos > 0 {
            body.put_u16(self.packet_id);
        }
        body.put_slice(&self.payload);
        encode_packet(PacketType::Publish, flags, &body)
    }
}

/// SUBSCRIBE body: packet identifier and (topic filter, requested QoS) pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub topics: Vec<(String, u8)>,
}

impl Subscribe {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = payload;
        let packet_id = read_u16(&mut buf, "packet identifier")?;
        let mut topics = Vec::new();
        while buf.has_remaining() {
            let topic = read_string(&mut buf, "topic filter")?;
            let qos = read_u8(&mut buf, "requested QoS")?;
            topics.push((topic, qos));
        }
        Ok(Self { packet_id, topics })
    }

    pub fn encode(&self) -> Result<BytesMut, DecodeError> {
        let mut body = BytesMut::new();
        body.put_u16(self.packet_id);
        for (topic, qos) in &self.topics {
            put_string(&mut body, topic.as_bytes())?;
            body.put_u8(*qos);
        }
        // SUBSCRIBE carries fixed flags 0b0010.
        encode_packet(PacketType::Subscribe, 0x02, &body)
    }
}

/// UNSUBSCRIBE body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub packet_id: u16,
    pub topics: Vec<String>,
}

impl Unsubscribe {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = payload;
        let packet_id = read_u16(&mut buf, "packet identifier")?;
        let mut topics = Vec::new();
        while buf.has_remaining() {
            topics.push(read_string(&mut buf, "topic filter")?);
        }
        Ok(Self { packet_id, topics })
    }

    pub fn encode(&self) -> Result<BytesMut, DecodeError> {
        let mut body = BytesMut::new();
        body.put_u16(self.packet_id);
        for topic in &self.topics {
            put_string(&mut body, topic.as_bytes())?;
        }
        encode_packet(PacketType::Unsubscribe, 0x02, &body)
    }
}

/// Packet identifier of a PUBACK, PUBREC, PUBREL or PUBCOMP.
pub fn decode_packet_id(payload: &[u8]) -> Result<u16, DecodeError> {
    let mut buf = payload;
    read_u16(&mut buf, "packet identifier")
}

fn read_u8<B: Buf>(buf: &mut B, field: &'static str) -> Result<u8, DecodeError> {
    if buf.remaining() < 1 {
        return Err(DecodeError::Truncated(field));
    }
    Ok(buf.get_u8())
}

fn read_u16<B: Buf>(buf: &mut B, field: &'static str) -> Result<u16, DecodeError> {
    if buf.remaining() < 2 {
        return Err(DecodeError::Truncated(field));
    }
    Ok(buf.get_u16())
}

fn read_binary<B: Buf>(buf: &mut B, field: &'static str) -> Result<Bytes, DecodeError> {
    let len = read_u16(buf, field)? as usize;
    if buf.remaining() < len {
        return Err(DecodeError::Truncated(field));
    }
    Ok(buf.copy_to_bytes(len))
}

fn read_string<B: Buf>(buf: &mut B, field: &'static str) -> Result<String, DecodeError> {
    let raw = read_binary(buf, field)?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

fn put_string(buf: &mut BytesMut, value: &[u8]) -> Result<(), DecodeError> {
    let len = u16::try_from(value.len()).map_err(|_| DecodeError::FieldTooLong(value.len()))?;
    buf.put_u16(len);
    buf.put_slice(value);
    Ok(())
}

//! Binary broker wire codec.
//!
//! Records published through the broker are encoded with this codec and
//! must decode bit-exactly on every peer node, whatever the platform. The
//! layout is one kind byte, a flags byte where optional fields are
//! recorded, then length-prefixed UTF-8 fields in a fixed order. All
//! integers are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::value::RawValue;

use crate::error::CodecError;
use crate::message::{AdminMessage, ClientInfo, ControlMessage, JoinMessage, LeaveMessage, Message};

type Result<T> = std::result::Result<T, CodecError>;

/// Record kind codes.
pub mod kind {
    pub const MESSAGE: u8 = 0x01;
    pub const JOIN: u8 = 0x02;
    pub const LEAVE: u8 = 0x03;
    pub const CONTROL: u8 = 0x10;
    pub const ADMIN: u8 = 0x11;
}

/// A decoded broker record.
#[derive(Debug, Clone)]
pub enum Payload {
    Message(Message),
    Join(JoinMessage),
    Leave(LeaveMessage),
    Control(ControlMessage),
    Admin(AdminMessage),
}

// ============================================================================
// ENCODING
// ============================================================================

pub fn encode_message(msg: &Message) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(64 + msg.data.get().len());
    buf.put_u8(kind::MESSAGE);

    let mut flags: u8 = 0;
    if msg.client.is_some() {
        flags |= 0x01;
    }
    if msg.info.is_some() {
        flags |= 0x02;
    }
    buf.put_u8(flags);

    put_str(&mut buf, &msg.uid)?;
    buf.put_u64(msg.timestamp);
    put_str(&mut buf, &msg.channel)?;
    put_str(&mut buf, msg.data.get())?;
    if let Some(ref client) = msg.client {
        put_str(&mut buf, client)?;
    }
    if let Some(ref info) = msg.info {
        put_client_info(&mut buf, info)?;
    }

    Ok(buf.freeze())
}

pub fn encode_join(msg: &JoinMessage) -> Result<Bytes> {
    encode_presence_record(kind::JOIN, &msg.channel, &msg.data)
}

pub fn encode_leave(msg: &LeaveMessage) -> Result<Bytes> {
    encode_presence_record(kind::LEAVE, &msg.channel, &msg.data)
}

fn encode_presence_record(k: u8, channel: &str, info: &ClientInfo) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(64);
    buf.put_u8(k);
    put_str(&mut buf, channel)?;
    put_client_info(&mut buf, info)?;
    Ok(buf.freeze())
}

pub fn encode_control(msg: &ControlMessage) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(64 + msg.params.get().len());
    buf.put_u8(kind::CONTROL);
    put_str(&mut buf, &msg.uid)?;
    put_str(&mut buf, &msg.method)?;
    put_str(&mut buf, msg.params.get())?;
    Ok(buf.freeze())
}

pub fn encode_admin(msg: &AdminMessage) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(32 + msg.params.get().len());
    buf.put_u8(kind::ADMIN);
    put_str(&mut buf, &msg.kind)?;
    put_str(&mut buf, msg.params.get())?;
    Ok(buf.freeze())
}

fn put_client_info(buf: &mut BytesMut, info: &ClientInfo) -> Result<()> {
    let mut flags: u8 = 0;
    if info.default_info.is_some() {
        flags |= 0x01;
    }
    if info.channel_info.is_some() {
        flags |= 0x02;
    }
    buf.put_u8(flags);
    put_str(buf, &info.user)?;
    put_str(buf, &info.client)?;
    if let Some(ref di) = info.default_info {
        put_str(buf, di.get())?;
    }
    if let Some(ref ci) = info.channel_info {
        put_str(buf, ci.get())?;
    }
    Ok(())
}

#[inline]
fn put_str(buf: &mut BytesMut, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    if bytes.len() > u32::MAX as usize {
        return Err(CodecError::FieldTooLarge(bytes.len()));
    }
    buf.put_u32(bytes.len() as u32);
    buf.extend_from_slice(bytes);
    Ok(())
}

// ============================================================================
// DECODING
// ============================================================================

/// Decode any broker record by its kind byte.
pub fn decode(bytes: &[u8]) -> Result<Payload> {
    if bytes.is_empty() {
        return Err(CodecError::BufferTooSmall { needed: 1, have: 0 });
    }
    let mut buf = bytes;
    let k = buf.get_u8();
    match k {
        kind::MESSAGE => decode_message_body(&mut buf).map(Payload::Message),
        kind::JOIN => {
            let (channel, data) = decode_presence_body(&mut buf)?;
            Ok(Payload::Join(JoinMessage { channel, data }))
        }
        kind::LEAVE => {
            let (channel, data) = decode_presence_body(&mut buf)?;
            Ok(Payload::Leave(LeaveMessage { channel, data }))
        }
        kind::CONTROL => decode_control_body(&mut buf).map(Payload::Control),
        kind::ADMIN => decode_admin_body(&mut buf).map(Payload::Admin),
        other => Err(CodecError::UnknownKind(other)),
    }
}

/// Decode a record known to be a publication, e.g. read back from history
/// storage.
pub fn decode_message(bytes: &[u8]) -> Result<Message> {
    match decode(bytes)? {
        Payload::Message(m) => Ok(m),
        _ => Err(CodecError::UnknownKind(bytes[0])),
    }
}

fn decode_message_body(buf: &mut &[u8]) -> Result<Message> {
    let flags = get_u8(buf)?;
    let uid = get_str(buf)?;
    let timestamp = get_u64(buf)?;
    let channel = get_str(buf)?;
    let data = get_raw(buf)?;
    let client = if flags & 0x01 != 0 {
        Some(get_str(buf)?)
    } else {
        None
    };
    let info = if flags & 0x02 != 0 {
        Some(get_client_info(buf)?)
    } else {
        None
    };
    Ok(Message {
        uid,
        timestamp,
        channel,
        data,
        client,
        info,
    })
}

fn decode_presence_body(buf: &mut &[u8]) -> Result<(String, ClientInfo)> {
    let channel = get_str(buf)?;
    let data = get_client_info(buf)?;
    Ok((channel, data))
}

fn decode_control_body(buf: &mut &[u8]) -> Result<ControlMessage> {
    let uid = get_str(buf)?;
    let method = get_str(buf)?;
    let params = get_raw(buf)?;
    Ok(ControlMessage { uid, method, params })
}

fn decode_admin_body(buf: &mut &[u8]) -> Result<AdminMessage> {
    let kind = get_str(buf)?;
    let params = get_raw(buf)?;
    Ok(AdminMessage { kind, params })
}

fn get_client_info(buf: &mut &[u8]) -> Result<ClientInfo> {
    let flags = get_u8(buf)?;
    let user = get_str(buf)?;
    let client = get_str(buf)?;
    let default_info = if flags & 0x01 != 0 {
        Some(get_raw(buf)?)
    } else {
        None
    };
    let channel_info = if flags & 0x02 != 0 {
        Some(get_raw(buf)?)
    } else {
        None
    };
    Ok(ClientInfo {
        user,
        client,
        default_info,
        channel_info,
    })
}

#[inline]
fn get_u8(buf: &mut &[u8]) -> Result<u8> {
    if buf.remaining() < 1 {
        return Err(CodecError::BufferTooSmall { needed: 1, have: 0 });
    }
    Ok(buf.get_u8())
}

#[inline]
fn get_u64(buf: &mut &[u8]) -> Result<u64> {
    if buf.remaining() < 8 {
        return Err(CodecError::BufferTooSmall {
            needed: 8,
            have: buf.remaining(),
        });
    }
    Ok(buf.get_u64())
}

#[inline]
fn get_str(buf: &mut &[u8]) -> Result<String> {
    if buf.remaining() < 4 {
        return Err(CodecError::BufferTooSmall {
            needed: 4,
            have: buf.remaining(),
        });
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(CodecError::BufferTooSmall {
            needed: len,
            have: buf.remaining(),
        });
    }
    let bytes = buf[..len].to_vec();
    buf.advance(len);
    Ok(String::from_utf8(bytes)?)
}

#[inline]
fn get_raw(buf: &mut &[u8]) -> Result<Box<RawValue>> {
    let s = get_str(buf)?;
    Ok(RawValue::from_string(s)?)
}

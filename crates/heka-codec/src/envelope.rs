//! The pack envelope wire format (§6 "Pack envelope wire format"): a
//! self-describing binary form made of length-prefixed tag/value pairs.
//!
//! Every top-level entry is `tag:u8, len:u32 (LE), payload:[u8; len]`, so a
//! reader that doesn't recognise a tag can skip it without understanding
//! its contents — the property "self-describing" names. Header scalars
//! each get their own tag; every field is carried as one `FIELD` entry
//! whose payload is itself a small nested encoding, so skipping a field is
//! a single skip of its outer length rather than a per-sub-value one.
//!
//! Field order is insertion order (§3, §6): fields are encoded in
//! `message.fields` order and decoded by appending each `FIELD` entry as
//! it is encountered, so round-tripping reproduces the original order.

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::io::{Cursor, Read, Write};
use thiserror::Error;
use uuid::Uuid;

use heka_core::{Field, FieldValue, Message};

const VERSION: u8 = 1;

const TAG_UUID: u8 = 0x01;
const TAG_TIMESTAMP: u8 = 0x02;
const TAG_TYPE: u8 = 0x03;
const TAG_LOGGER: u8 = 0x04;
const TAG_SEVERITY: u8 = 0x05;
const TAG_PAYLOAD: u8 = 0x06;
const TAG_ENV_VERSION: u8 = 0x07;
const TAG_PID: u8 = 0x08;
const TAG_HOSTNAME: u8 = 0x09;
const TAG_FIELD: u8 = 0x10;

const KIND_STRING: u8 = 1;
const KIND_BYTES: u8 = 2;
const KIND_INT64: u8 = 3;
const KIND_FLOAT64: u8 = 4;
const KIND_BOOL: u8 = 5;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),
    #[error("truncated envelope: {0}")]
    Truncated(#[from] std::io::Error),
    #[error("invalid uuid bytes")]
    InvalidUuid,
    #[error("invalid utf-8 string: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("unknown field value kind {0}")]
    UnknownKind(u8),
}

fn write_tlv(out: &mut Vec<u8>, tag: u8, payload: &[u8]) {
    out.write_u8(tag).expect("writing to Vec never fails");
    out.write_u32::<LE>(payload.len() as u32).expect("writing to Vec never fails");
    out.extend_from_slice(payload);
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    out.write_u32::<LE>(s.len() as u32).expect("writing to Vec never fails");
    out.extend_from_slice(s.as_bytes());
}

fn write_bytes(out: &mut Vec<u8>, b: &[u8]) {
    out.write_u32::<LE>(b.len() as u32).expect("writing to Vec never fails");
    out.extend_from_slice(b);
}

fn encode_field(field: &Field) -> Vec<u8> {
    let mut payload = Vec::new();
    write_str(&mut payload, &field.name);
    match &field.representation {
        Some(rep) => {
            payload.write_u8(1).unwrap();
            write_str(&mut payload, rep);
        }
        None => payload.write_u8(0).unwrap(),
    }
    payload.write_u32::<LE>(field.values.len() as u32).unwrap();
    for value in &field.values {
        match value {
            FieldValue::String(s) => {
                payload.write_u8(KIND_STRING).unwrap();
                write_str(&mut payload, s);
            }
            FieldValue::Bytes(b) => {
                payload.write_u8(KIND_BYTES).unwrap();
                write_bytes(&mut payload, b);
            }
            FieldValue::Int64(i) => {
                payload.write_u8(KIND_INT64).unwrap();
                payload.write_i64::<LE>(*i).unwrap();
            }
            FieldValue::Float64(f) => {
                payload.write_u8(KIND_FLOAT64).unwrap();
                payload.write_f64::<LE>(*f).unwrap();
            }
            FieldValue::Bool(b) => {
                payload.write_u8(KIND_BOOL).unwrap();
                payload.write_u8(u8::from(*b)).unwrap();
            }
        }
    }
    payload
}

/// Encode `message` into its canonical binary form (§6).
pub fn encode_message(message: &Message) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_u8(VERSION).unwrap();

    write_tlv(&mut out, TAG_UUID, message.uuid.as_bytes());

    let mut ts = Vec::new();
    ts.write_i64::<LE>(message.timestamp).unwrap();
    write_tlv(&mut out, TAG_TIMESTAMP, &ts);

    write_tlv(&mut out, TAG_TYPE, message.r#type.as_bytes());
    write_tlv(&mut out, TAG_LOGGER, message.logger.as_bytes());

    let mut sev = Vec::new();
    sev.write_i32::<LE>(message.severity).unwrap();
    write_tlv(&mut out, TAG_SEVERITY, &sev);

    write_tlv(&mut out, TAG_PAYLOAD, message.payload.as_bytes());
    write_tlv(&mut out, TAG_ENV_VERSION, message.env_version.as_bytes());

    let mut pid = Vec::new();
    pid.write_i32::<LE>(message.pid).unwrap();
    write_tlv(&mut out, TAG_PID, &pid);

    write_tlv(&mut out, TAG_HOSTNAME, message.hostname.as_bytes());

    for field in &message.fields {
        let encoded = encode_field(field);
        write_tlv(&mut out, TAG_FIELD, &encoded);
    }

    out
}

fn read_str(cursor: &mut Cursor<&[u8]>) -> Result<String, EnvelopeError> {
    let len = cursor.read_u32::<LE>()? as usize;
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf)?;
    Ok(String::from_utf8(buf)?)
}

fn read_bytes(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>, EnvelopeError> {
    let len = cursor.read_u32::<LE>()? as usize;
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

fn decode_field(payload: &[u8]) -> Result<Field, EnvelopeError> {
    let mut cursor = Cursor::new(payload);
    let name = read_str(&mut cursor)?;
    let has_rep = cursor.read_u8()?;
    let representation = if has_rep == 1 { Some(read_str(&mut cursor)?) } else { None };

    let count = cursor.read_u32::<LE>()?;
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let kind = cursor.read_u8()?;
        let value = match kind {
            KIND_STRING => FieldValue::String(read_str(&mut cursor)?),
            KIND_BYTES => FieldValue::Bytes(read_bytes(&mut cursor)?),
            KIND_INT64 => FieldValue::Int64(cursor.read_i64::<LE>()?),
            KIND_FLOAT64 => FieldValue::Float64(cursor.read_f64::<LE>()?),
            KIND_BOOL => FieldValue::Bool(cursor.read_u8()? != 0),
            other => return Err(EnvelopeError::UnknownKind(other)),
        };
        values.push(value);
    }

    Ok(Field {
        name,
        representation,
        values,
    })
}

/// Decode a canonical binary envelope back into a [`Message`] (§6, §8
/// round-trip law: `decode(encode(m)) == m` under field-insertion-order
/// equality).
pub fn decode_message(bytes: &[u8]) -> Result<Message, EnvelopeError> {
    let mut cursor = Cursor::new(bytes);
    let version = cursor.read_u8()?;
    if version != VERSION {
        return Err(EnvelopeError::UnsupportedVersion(version));
    }

    let mut message = Message::new();

    loop {
        let tag = match cursor.read_u8() {
            Ok(t) => t,
            Err(_) => break,
        };
        let len = cursor.read_u32::<LE>()? as usize;
        let mut payload = vec![0u8; len];
        cursor.read_exact(&mut payload)?;

        match tag {
            TAG_UUID => {
                let bytes: [u8; 16] = payload.try_into().map_err(|_| EnvelopeError::InvalidUuid)?;
                message.uuid = Uuid::from_bytes(bytes);
            }
            TAG_TIMESTAMP => {
                message.timestamp = Cursor::new(&payload).read_i64::<LE>()?;
            }
            TAG_TYPE => message.r#type = String::from_utf8(payload)?,
            TAG_LOGGER => message.logger = String::from_utf8(payload)?,
            TAG_SEVERITY => {
                message.severity = Cursor::new(&payload).read_i32::<LE>()?;
            }
            TAG_PAYLOAD => message.payload = String::from_utf8(payload)?,
            TAG_ENV_VERSION => message.env_version = String::from_utf8(payload)?,
            TAG_PID => {
                message.pid = Cursor::new(&payload).read_i32::<LE>()?;
            }
            TAG_HOSTNAME => message.hostname = String::from_utf8(payload)?,
            TAG_FIELD => message.fields.push(decode_field(&payload)?),
            // An unrecognised tag is skipped: the length prefix already
            // consumed its payload above, so there is nothing more to do.
            _ => {}
        }
    }

    Ok(message)
}

/// Writes `encode_message` output, prefixed by its own length — the shape
/// a splitter's `find_record` expects when reading this codec's output
/// back off a byte stream that has no external length framing.
pub fn write_length_prefixed<W: Write>(writer: &mut W, message: &Message) -> std::io::Result<()> {
    let encoded = encode_message(message);
    writer.write_u32::<LE>(encoded.len() as u32)?;
    writer.write_all(&encoded)
}

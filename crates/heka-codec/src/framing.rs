//! Stream framing (§6 "Stream framing"): an optional record-boundary and
//! signing layer in front of the envelope.
//!
//! Layout, following a frame after the introducer byte:
//!
//! ```text
//! 0x1E  payload_len:u32LE  flags:u8  [signing block]  payload:[u8; payload_len]
//! ```
//!
//! The signing block is present iff `flags & 0x01 != 0`:
//!
//! ```text
//! alg:u8  signer_len:u16LE  signer:[u8]  key_version:u32LE  mac_len:u16LE  mac:[u8]
//! ```
//!
//! Unframing splitters verify the MAC against the per-consumer signer
//! allowlist (§4.5, §6); mismatched or missing signatures cause the record
//! to be rejected and the pack recycled (§8 scenario 6).

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::io::{Cursor, Read};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Record-boundary introducer byte (ASCII record separator).
pub const DELIMITER: u8 = 0x1E;

const FLAG_SIGNED: u8 = 0x01;
const ALG_HMAC_SHA256: u8 = 1;

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("frame is missing a required signature")]
    MissingSignature,
    #[error("frame signature does not match any allowlisted signer")]
    SignatureMismatch,
    #[error("unsupported signing algorithm id {0}")]
    UnsupportedAlgorithm(u8),
    #[error("malformed frame header: {0}")]
    Malformed(#[from] std::io::Error),
    #[error("invalid hmac key length")]
    InvalidKeyLength,
}

/// One entry in a consumer's signer allowlist (§4.5, §6).
#[derive(Debug, Clone)]
pub struct Signer {
    pub name: String,
    pub key_version: u32,
    pub key: Vec<u8>,
}

/// A parsed, not-yet-verified frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub payload: Vec<u8>,
    signature: Option<SignatureBlock>,
}

#[derive(Debug, Clone)]
struct SignatureBlock {
    signer_name: String,
    key_version: u32,
    mac: Vec<u8>,
}

impl Frame {
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }
}

/// Encode `payload` as one frame, optionally signed with `signer`.
pub fn encode_frame(payload: &[u8], signer: Option<&Signer>) -> Result<Vec<u8>, FramingError> {
    let mut out = Vec::new();
    out.write_u8(DELIMITER).unwrap();
    out.write_u32::<LE>(payload.len() as u32).unwrap();

    match signer {
        None => {
            out.write_u8(0).unwrap();
        }
        Some(signer) => {
            out.write_u8(FLAG_SIGNED).unwrap();
            out.write_u8(ALG_HMAC_SHA256).unwrap();
            out.write_u16::<LE>(signer.name.len() as u16).unwrap();
            out.extend_from_slice(signer.name.as_bytes());
            out.write_u32::<LE>(signer.key_version).unwrap();

            let mut mac = HmacSha256::new_from_slice(&signer.key).map_err(|_| FramingError::InvalidKeyLength)?;
            mac.update(payload);
            let tag = mac.finalize().into_bytes();
            out.write_u16::<LE>(tag.len() as u16).unwrap();
            out.extend_from_slice(&tag);
        }
    }

    out.extend_from_slice(payload);
    Ok(out)
}

/// Parse one complete frame from the front of `buf`, the shape a
/// splitter's `find_record` needs: returns `(bytes_consumed, frame)` if a
/// full frame is present, or `None` if `buf` doesn't yet hold a complete
/// frame (the caller should wait for more bytes) — matching §4.3's
/// "pure function over a byte window" contract.
pub fn parse_frame(buf: &[u8]) -> Result<Option<(usize, Frame)>, FramingError> {
    if buf.is_empty() || buf[0] != DELIMITER {
        return Ok(None);
    }

    let mut cursor = Cursor::new(&buf[1..]);
    let Ok(payload_len) = cursor.read_u32::<LE>() else {
        return Ok(None);
    };
    let Ok(flags) = cursor.read_u8() else {
        return Ok(None);
    };

    let signature = if flags & FLAG_SIGNED != 0 {
        let Some(sig) = try_read_signature_block(&mut cursor)? else {
            return Ok(None);
        };
        Some(sig)
    } else {
        None
    };

    let header_len = 1 + cursor.position() as usize;
    let total_len = header_len + payload_len as usize;
    if buf.len() < total_len {
        return Ok(None);
    }

    let payload = buf[header_len..total_len].to_vec();
    Ok(Some((total_len, Frame { payload, signature })))
}

fn try_read_signature_block(cursor: &mut Cursor<&[u8]>) -> Result<Option<SignatureBlock>, FramingError> {
    let Ok(alg) = cursor.read_u8() else { return Ok(None) };
    if alg != ALG_HMAC_SHA256 {
        return Err(FramingError::UnsupportedAlgorithm(alg));
    }
    let Ok(name_len) = cursor.read_u16::<LE>() else { return Ok(None) };
    let mut name_buf = vec![0u8; name_len as usize];
    if cursor.read_exact(&mut name_buf).is_err() {
        return Ok(None);
    }
    let Ok(key_version) = cursor.read_u32::<LE>() else { return Ok(None) };
    let Ok(mac_len) = cursor.read_u16::<LE>() else { return Ok(None) };
    let mut mac = vec![0u8; mac_len as usize];
    if cursor.read_exact(&mut mac).is_err() {
        return Ok(None);
    }

    Ok(Some(SignatureBlock {
        signer_name: String::from_utf8_lossy(&name_buf).into_owned(),
        key_version,
        mac,
    }))
}

/// Verify `frame`'s signature against `allowlist`, returning the unwrapped
/// payload and the verified signer's name on success (§4.5, §8 scenario
/// 6). An unsigned frame, or one signed by a key the allowlist doesn't
/// hold, is rejected rather than silently accepted.
pub fn unframe(frame: &Frame, allowlist: &[Signer]) -> Result<(Vec<u8>, String), FramingError> {
    let signature = frame.signature.as_ref().ok_or(FramingError::MissingSignature)?;

    let candidate = allowlist
        .iter()
        .find(|s| s.name == signature.signer_name && s.key_version == signature.key_version)
        .ok_or(FramingError::SignatureMismatch)?;

    let mut mac = HmacSha256::new_from_slice(&candidate.key).map_err(|_| FramingError::InvalidKeyLength)?;
    mac.update(&frame.payload);
    mac.verify_slice(&signature.mac).map_err(|_| FramingError::SignatureMismatch)?;

    Ok((frame.payload.clone(), candidate.name.clone()))
}

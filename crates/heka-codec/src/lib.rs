//! Reference implementations of the two external wire contracts §6
//! describes: the length-prefixed tag/value envelope format ([`envelope`])
//! and the optional delimiter+header+HMAC stream framing ([`framing`]).
//!
//! `heka-core` treats `msg_bytes` as opaque and never depends on this
//! crate; it exists so the round-trip testable properties in §8 have a
//! concrete codec to run against, and so `hekad` has a working default
//! encoder/decoder/splitter pair.

pub mod envelope;
pub mod framing;

pub use envelope::{decode_message, encode_message, EnvelopeError};
pub use framing::{unframe, Frame, FramingError, Signer};

//! Error types for the protocol layer.
//!
//! Decoding has three outcomes that callers must tell apart:
//!
//! - `Ok(None)`: the buffer is empty, nothing has started yet.
//! - [`DecodeError::Incomplete`]: a frame has started but fewer bytes are
//!   buffered than its headers declare. Not a real failure: retry the same
//!   call once more bytes arrive.
//! - Every other [`DecodeError`]: the bytes can never decode, no matter
//!   how many more arrive.

use crate::ResolveError;

/// Errors that can occur while turning bytes into values or messages.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Fewer bytes are available than a length field declares.
    ///
    /// `needed` is how many more bytes the field that ran short wants.
    /// It is a lower bound for the whole frame, not an exact figure.
    #[error("insufficient data: {needed} more bytes required")]
    Incomplete { needed: usize },

    /// The bytes violate the frame grammar (bad payload width, odd map
    /// length, truncated child inside a complete payload, ...).
    #[error("malformed data: {0}")]
    Malformed(String),

    /// The value section names a tag no variant is registered for.
    #[error("unknown wire tag {0:?}")]
    UnknownTag(String),

    /// A command name, string payload, or entity id was not valid UTF-8.
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),

    /// The resolution context refused a reference.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

impl DecodeError {
    /// Returns `true` for the back-pressure signal, `false` for real failures.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Incomplete { .. })
    }
}

/// Errors that can occur while turning values or messages into bytes.
///
/// Every length on the wire has a fixed width, so oversized inputs are
/// rejected up front instead of being silently truncated.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// Command names are prefixed with a `u16` length.
    #[error("command name is {0} bytes, limit is 65535")]
    NameTooLong(usize),

    /// The value count is a `u16`.
    #[error("message carries {0} values, limit is 65535")]
    TooManyValues(usize),

    /// Value payloads are prefixed with a `u32` length.
    #[error("value payload is {0} bytes, limit is 4294967295")]
    PayloadTooLarge(usize),
}

/// A native value did not have the shape a handler asked for.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected}, found {found}")]
pub struct ValueTypeError {
    /// What the caller asked for.
    pub expected: &'static str,
    /// The variant that was actually present.
    pub found: &'static str,
}

/// Umbrella error for the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[error("encode failed: {0}")]
    Encode(#[from] EncodeError),

    /// Deserialization failed.
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// A value decoded fine but had the wrong type for its position.
    #[error("invalid argument: {0}")]
    Argument(#[from] ValueTypeError),

    /// The message is well-formed but violates protocol rules.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

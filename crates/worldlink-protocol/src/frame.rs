//! Message framing.
//!
//! ## Frame layout
//!
//! ```text
//! message       := header body trailer
//! header        := u16(len(name)) name_bytes
//! body          := u16(value_count) value_section*
//! trailer       := 2 reserved bytes (written as zero, never interpreted)
//! value_section := u32(len(payload)) u16(len(tag)) tag_bytes payload_bytes
//! ```
//!
//! ## Partial input
//!
//! Bytes arrive from the network in arbitrary chunks, so a decode call may
//! see half a frame. Decoding runs in two passes:
//!
//! 1. **Scan**: walk the length fields using only the bytes. If any
//!    declared length runs past the end of the buffer, stop with
//!    [`DecodeError::Incomplete`]. Nothing has been resolved yet.
//! 2. **Resolve**: every byte of the frame is present; interpret each
//!    value section against the [`Resolver`].
//!
//! The input slice is borrowed immutably throughout, so a failed call
//! leaves the caller free to retry with the same (or a longer) buffer.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{RawValue, WireReader, decode_raw, encode_value, read_raw};
use crate::{CommandName, DecodeError, EncodeError, Message, Resolver};

/// The two reserved bytes closing every frame.
pub const TRAILER: [u8; 2] = [0, 0];

/// A frame whose structure has been validated but whose values are still raw.
struct RawMessage<'a> {
    name: &'a [u8],
    values: Vec<RawValue<'a>>,
    len: usize,
}

/// Walks the frame at the front of `buf` without interpreting values.
fn scan(buf: &[u8]) -> Result<Option<RawMessage<'_>>, DecodeError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let mut reader = WireReader::new(buf);
    let name_len = reader.u16()? as usize;
    let name = reader.take(name_len)?;
    let count = reader.u16()? as usize;

    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        match read_raw(&mut reader)? {
            Some(raw) => values.push(raw),
            // The declared count runs past the bytes we have.
            None => return Err(DecodeError::Incomplete { needed: 1 }),
        }
    }

    reader.take(TRAILER.len())?;
    Ok(Some(RawMessage {
        name,
        values,
        len: reader.position(),
    }))
}

/// Length of the complete frame at the front of `buf`, if there is one.
///
/// `Ok(None)` for an empty buffer, `Err(Incomplete)` for a partial frame.
/// Never touches a resolver.
pub fn frame_len(buf: &[u8]) -> Result<Option<usize>, DecodeError> {
    Ok(scan(buf)?.map(|raw| raw.len))
}

/// Decodes the frame starting at `offset` in `buf`.
///
/// On success returns the message and the unconsumed remainder of the
/// buffer, which may already hold the start of the next frame.
/// `Ok(None)` means there was nothing to decode (no frame started).
///
/// # Errors
/// - [`DecodeError::Incomplete`]: retry once more bytes have arrived.
/// - Any other [`DecodeError`]: the stream is corrupt.
///
/// # Example
///
/// ```rust
/// use worldlink_protocol::{decode_message, encode_message, values, Message, Unresolved};
///
/// let bytes = encode_message(&Message::new("join", values!["local-1", "Alice"])).unwrap();
///
/// let (message, rest) = decode_message(&mut Unresolved, &bytes, 0).unwrap().unwrap();
/// assert_eq!(message.command, "JOIN");
/// assert!(rest.is_empty());
///
/// // One byte short: nothing is consumed, try again later.
/// let err = decode_message(&mut Unresolved, &bytes[..bytes.len() - 1], 0).unwrap_err();
/// assert!(err.is_incomplete());
/// ```
pub fn decode_message<'a, R: Resolver + ?Sized>(
    resolver: &mut R,
    buf: &'a [u8],
    offset: usize,
) -> Result<Option<(Message, &'a [u8])>, DecodeError> {
    let buf = buf.get(offset..).unwrap_or_default();
    let Some(raw) = scan(buf)? else {
        return Ok(None);
    };

    let name = std::str::from_utf8(raw.name)
        .map_err(|_| DecodeError::InvalidUtf8("command name"))?;
    let mut args = Vec::with_capacity(raw.values.len());
    for value in raw.values {
        args.push(decode_raw(resolver, value)?);
    }

    let message = Message {
        command: CommandName::new(name),
        args,
    };
    Ok(Some((message, &buf[raw.len..])))
}

/// Encodes a message into one complete frame.
///
/// # Errors
/// Returns [`EncodeError`] if the name, value count, or any payload is
/// too long for its length field.
pub fn encode_message(message: &Message) -> Result<Bytes, EncodeError> {
    let name = message.command.as_str().as_bytes();
    let name_len = u16::try_from(name.len())
        .map_err(|_| EncodeError::NameTooLong(name.len()))?;
    let count = u16::try_from(message.args.len())
        .map_err(|_| EncodeError::TooManyValues(message.args.len()))?;

    let mut out = BytesMut::with_capacity(2 + name.len() + 2 + TRAILER.len());
    out.put_u16(name_len);
    out.put_slice(name);
    out.put_u16(count);
    for value in &message.args {
        encode_value(value, &mut out)?;
    }
    out.put_slice(&TRAILER);
    Ok(out.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Unresolved, Value, values};

    #[test]
    fn test_encode_message_bare_layout() {
        let bytes = encode_message(&Message::bare("leave")).unwrap();
        assert_eq!(
            &bytes[..],
            [0, 5, b'L', b'E', b'A', b'V', b'E', 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_encode_message_too_many_values_fails() {
        let message = Message::new("X", vec![Value::Int32(0); 70_000]);
        assert!(matches!(
            encode_message(&message),
            Err(EncodeError::TooManyValues(70_000))
        ));
    }

    #[test]
    fn test_decode_message_empty_buffer_returns_none() {
        assert!(decode_message(&mut Unresolved, &[], 0).unwrap().is_none());
    }

    #[test]
    fn test_decode_message_respects_offset() {
        let first = encode_message(&Message::bare("SNAPSHOT")).unwrap();
        let second = encode_message(&Message::new("RNG", values![7_u32])).unwrap();
        let mut buf = first.to_vec();
        buf.extend_from_slice(&second);

        let (message, rest) =
            decode_message(&mut Unresolved, &buf, first.len()).unwrap().unwrap();
        assert_eq!(message, Message::new("RNG", values![7_u32]));
        assert!(rest.is_empty());
    }

    #[test]
    fn test_decode_message_returns_remainder() {
        let first = encode_message(&Message::bare("LEAVE")).unwrap();
        let mut buf = first.to_vec();
        buf.extend_from_slice(&[0, 3]);

        let (_, rest) = decode_message(&mut Unresolved, &buf, 0).unwrap().unwrap();
        assert_eq!(rest, &[0, 3]);
    }

    #[test]
    fn test_decode_message_ignores_trailer_contents() {
        let mut buf = encode_message(&Message::bare("LEAVE")).unwrap().to_vec();
        let n = buf.len();
        buf[n - 2..].copy_from_slice(&[0xab, 0xcd]);
        let (message, _) = decode_message(&mut Unresolved, &buf, 0).unwrap().unwrap();
        assert_eq!(message.command, "LEAVE");
    }

    #[test]
    fn test_frame_len_matches_encoded_length() {
        let bytes = encode_message(&Message::new("EVENT", values![1.5, "boom"])).unwrap();
        assert_eq!(frame_len(&bytes).unwrap(), Some(bytes.len()));
        assert!(frame_len(&bytes[..3]).unwrap_err().is_incomplete());
    }
}

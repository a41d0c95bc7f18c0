//! Tagged encode/decode for single values.
//!
//! ## Value section layout
//!
//! ```text
//! ┌────────────────┬─────────────┬───────────┬──────────────────┐
//! │ payload len u32│ tag len u16 │ tag bytes │  payload bytes   │
//! └────────────────┴─────────────┴───────────┴──────────────────┘
//! ```
//!
//! All integers are big-endian. Scalar payloads are fixed width;
//! strings, byte blobs, and entity ids use the whole payload. Composite
//! payloads (`list`, `tup`, `map`, `comp`) are a plain concatenation of
//! framed children with no count: the payload's end is the terminator.

use bytes::{BufMut, Bytes, BytesMut};
use glam::DVec2;

use crate::{
    ComponentRef, DecodeError, EncodeError, EntityId, ResolveError, Resolver,
    Value, WireTag,
};

/// Bytes in a value section before the tag: `u32` payload length + `u16` tag length.
pub(crate) const SECTION_HEADER: usize = 4 + 2;

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// A bounds-checked cursor over a borrowed byte slice.
///
/// Every read either succeeds or reports how many more bytes it wanted;
/// the slice itself is never modified.
#[derive(Debug, Clone)]
pub(crate) struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let available = self.remaining();
        if available < n {
            return Err(DecodeError::Incomplete {
                needed: n - available,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// A value section whose bytes are all present but not yet interpreted.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawValue<'a> {
    pub(crate) tag: WireTag,
    pub(crate) payload: &'a [u8],
}

/// Reads one framed value section.
///
/// `Ok(None)` means the reader was already empty, the clean end of a
/// composite payload or of a stream. A section that has started but is
/// cut short is `Err(Incomplete)`.
pub(crate) fn read_raw<'a>(
    reader: &mut WireReader<'a>,
) -> Result<Option<RawValue<'a>>, DecodeError> {
    if reader.is_empty() {
        return Ok(None);
    }
    let payload_len = reader.u32()? as usize;
    let tag_len = reader.u16()? as usize;
    let tag_bytes = reader.take(tag_len)?;
    let tag = WireTag::from_bytes(tag_bytes).ok_or_else(|| {
        DecodeError::UnknownTag(String::from_utf8_lossy(tag_bytes).into_owned())
    })?;
    let payload = reader.take(payload_len)?;
    Ok(Some(RawValue { tag, payload }))
}

/// Decodes one framed value from the front of `bytes`.
///
/// Returns the value and how many bytes it occupied, or `Ok(None)` if
/// `bytes` is empty.
///
/// # Errors
/// - [`DecodeError::Incomplete`] if the section is truncated.
/// - Any other [`DecodeError`] if the section can never decode.
pub fn decode_value<R: Resolver + ?Sized>(
    resolver: &mut R,
    bytes: &[u8],
) -> Result<Option<(Value, usize)>, DecodeError> {
    let mut reader = WireReader::new(bytes);
    let Some(raw) = read_raw(&mut reader)? else {
        return Ok(None);
    };
    let value = decode_raw(resolver, raw)?;
    Ok(Some((value, reader.position())))
}

/// Interprets a complete value section.
pub(crate) fn decode_raw<R: Resolver + ?Sized>(
    resolver: &mut R,
    raw: RawValue<'_>,
) -> Result<Value, DecodeError> {
    let payload = raw.payload;
    let value = match raw.tag {
        WireTag::Int32 => Value::Int32(i32::from_be_bytes(fixed(payload, "int32")?)),
        WireTag::UInt32 => Value::UInt32(u32::from_be_bytes(fixed(payload, "uint32")?)),
        WireTag::Float64 => {
            Value::Float64(f64::from_be_bytes(fixed(payload, "float64")?))
        }
        WireTag::String => Value::String(utf8(payload, "string payload")?),
        WireTag::Bytes => Value::Bytes(Bytes::copy_from_slice(payload)),
        WireTag::Vector2 => {
            let raw: [u8; 16] = fixed(payload, "vector2")?;
            let mut x = [0u8; 8];
            let mut y = [0u8; 8];
            x.copy_from_slice(&raw[..8]);
            y.copy_from_slice(&raw[8..]);
            Value::Vector2(DVec2::new(f64::from_be_bytes(x), f64::from_be_bytes(y)))
        }
        WireTag::EntityRef => {
            let id = utf8(payload, "entity id")?;
            let entity = resolver
                .find_entity(&id)
                .ok_or(ResolveError::UnknownEntity(EntityId(id)))?;
            Value::Entity(entity)
        }
        WireTag::ComponentRef => decode_component(resolver, payload)?,
        WireTag::GlobalWindowRef => {
            if !payload.is_empty() {
                return Err(DecodeError::Malformed(format!(
                    "global window carries {} payload bytes",
                    payload.len()
                )));
            }
            if !resolver.has_global_window() {
                return Err(ResolveError::NoGlobalWindow.into());
            }
            Value::GlobalWindow
        }
        WireTag::List => Value::List(decode_children(resolver, payload)?),
        WireTag::Tuple => Value::Tuple(decode_children(resolver, payload)?),
        WireTag::Map => {
            let flat = decode_children(resolver, payload)?;
            if flat.len() % 2 != 0 {
                return Err(DecodeError::Malformed(format!(
                    "map holds {} items, expected key/value pairs",
                    flat.len()
                )));
            }
            let mut pairs = Vec::with_capacity(flat.len() / 2);
            let mut items = flat.into_iter();
            while let (Some(k), Some(v)) = (items.next(), items.next()) {
                pairs.push((k, v));
            }
            Value::Map(pairs)
        }
    };
    Ok(value)
}

/// Reads framed children until the payload runs out.
///
/// The payload is already complete, so a child cut short here is
/// malformed data rather than a reason to wait for more bytes.
fn decode_children<R: Resolver + ?Sized>(
    resolver: &mut R,
    payload: &[u8],
) -> Result<Vec<Value>, DecodeError> {
    let mut reader = WireReader::new(payload);
    let mut children = Vec::new();
    loop {
        match read_raw(&mut reader) {
            Ok(Some(raw)) => children.push(decode_raw(resolver, raw)?),
            Ok(None) => return Ok(children),
            Err(DecodeError::Incomplete { needed }) => {
                return Err(DecodeError::Malformed(format!(
                    "child value truncated by {needed} bytes"
                )));
            }
            Err(e) => return Err(e),
        }
    }
}

fn decode_component<R: Resolver + ?Sized>(
    resolver: &mut R,
    payload: &[u8],
) -> Result<Value, DecodeError> {
    let children = decode_children(resolver, payload)?;
    let [owner, name, value]: [Value; 3] = children.try_into().map_err(
        |children: Vec<Value>| {
            DecodeError::Malformed(format!(
                "component reference has {} parts, expected 3",
                children.len()
            ))
        },
    )?;
    let (Value::Entity(owner), Value::String(name)) = (owner, name) else {
        return Err(DecodeError::Malformed(
            "component reference must be (entity, string, value)".into(),
        ));
    };
    resolver.sync_component(&owner, &name, &value)?;
    Ok(Value::Component(ComponentRef {
        owner,
        name,
        value: Box::new(value),
    }))
}

fn fixed<const N: usize>(
    payload: &[u8],
    what: &'static str,
) -> Result<[u8; N], DecodeError> {
    payload.try_into().map_err(|_| {
        DecodeError::Malformed(format!(
            "{what} payload is {} bytes, expected {N}",
            payload.len()
        ))
    })
}

fn utf8(payload: &[u8], what: &'static str) -> Result<String, DecodeError> {
    String::from_utf8(payload.to_vec()).map_err(|_| DecodeError::InvalidUtf8(what))
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Appends one framed value section (header, tag, payload) to `out`.
///
/// # Errors
/// Returns [`EncodeError::PayloadTooLarge`] if any payload, at any
/// nesting depth, exceeds the `u32` length field.
pub fn encode_value(value: &Value, out: &mut BytesMut) -> Result<(), EncodeError> {
    let payload = encode_payload(value)?;
    if payload.len() > u32::MAX as usize {
        return Err(EncodeError::PayloadTooLarge(payload.len()));
    }
    let tag = value.tag().as_bytes();
    out.reserve(SECTION_HEADER + tag.len() + payload.len());
    out.put_u32(payload.len() as u32);
    out.put_u16(tag.len() as u16);
    out.put_slice(tag);
    out.put_slice(&payload);
    Ok(())
}

/// Encodes just the payload of `value`.
pub(crate) fn encode_payload(value: &Value) -> Result<Bytes, EncodeError> {
    let mut out = BytesMut::new();
    match value {
        Value::Int32(v) => out.put_i32(*v),
        Value::UInt32(v) => out.put_u32(*v),
        Value::Float64(v) => out.put_f64(*v),
        Value::String(s) => out.put_slice(s.as_bytes()),
        Value::Bytes(b) => return Ok(b.clone()),
        Value::Vector2(v) => {
            out.put_f64(v.x);
            out.put_f64(v.y);
        }
        Value::Entity(id) => out.put_slice(id.as_str().as_bytes()),
        Value::Component(c) => {
            encode_value(&Value::Entity(c.owner.clone()), &mut out)?;
            encode_value(&Value::String(c.name.clone()), &mut out)?;
            encode_value(&c.value, &mut out)?;
        }
        Value::GlobalWindow => {}
        Value::List(items) | Value::Tuple(items) => {
            for item in items {
                encode_value(item, &mut out)?;
            }
        }
        Value::Map(pairs) => {
            for (k, v) in pairs {
                encode_value(k, &mut out)?;
                encode_value(v, &mut out)?;
            }
        }
    }
    Ok(out.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Unresolved;

    fn framed(value: &Value) -> Vec<u8> {
        let mut out = BytesMut::new();
        encode_value(value, &mut out).unwrap();
        out.to_vec()
    }

    #[test]
    fn test_encode_value_int32_layout() {
        let bytes = framed(&Value::Int32(-2));
        assert_eq!(
            bytes,
            [0, 0, 0, 4, 0, 3, b'i', b'3', b'2', 0xff, 0xff, 0xff, 0xfe]
        );
    }

    #[test]
    fn test_encode_payload_string_is_raw_utf8() {
        let payload = Value::String("héllo".into()).encode().unwrap();
        assert_eq!(&payload[..], "héllo".as_bytes());
    }

    #[test]
    fn test_encode_payload_global_window_is_empty() {
        assert!(Value::GlobalWindow.encode().unwrap().is_empty());
    }

    #[test]
    fn test_decode_value_empty_returns_none() {
        assert!(decode_value(&mut Unresolved, &[]).unwrap().is_none());
    }

    #[test]
    fn test_decode_value_truncated_header_is_incomplete() {
        let err = decode_value(&mut Unresolved, &[0, 0]).unwrap_err();
        assert!(err.is_incomplete());
    }

    #[test]
    fn test_decode_value_truncated_payload_is_incomplete() {
        let bytes = framed(&Value::Float64(1.5));
        let err = decode_value(&mut Unresolved, &bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, DecodeError::Incomplete { needed: 1 }));
    }

    #[test]
    fn test_decode_value_reports_consumed_length() {
        let mut bytes = framed(&Value::UInt32(9));
        let first_len = bytes.len();
        bytes.extend(framed(&Value::UInt32(10)));
        let (value, used) = decode_value(&mut Unresolved, &bytes).unwrap().unwrap();
        assert_eq!(value, Value::UInt32(9));
        assert_eq!(used, first_len);
    }

    #[test]
    fn test_decode_value_unknown_tag_fails() {
        let bytes = [0, 0, 0, 0, 0, 3, b'z', b'z', b'z'];
        let err = decode_value(&mut Unresolved, &bytes).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownTag(t) if t == "zzz"));
    }

    #[test]
    fn test_decode_value_wrong_scalar_width_is_malformed() {
        let bytes = [0, 0, 0, 2, 0, 3, b'i', b'3', b'2', 0, 1];
        let err = decode_value(&mut Unresolved, &bytes).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_decode_value_truncated_child_is_malformed_not_incomplete() {
        // A list whose payload is complete but whose only child is cut short.
        let child = framed(&Value::Int32(1));
        let mut bytes = BytesMut::new();
        bytes.put_u32((child.len() - 1) as u32);
        bytes.put_u16(4);
        bytes.put_slice(b"list");
        bytes.put_slice(&child[..child.len() - 1]);
        let err = decode_value(&mut Unresolved, &bytes).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_decode_value_odd_map_is_malformed() {
        let payload = framed(&Value::Int32(1));
        let mut bytes = Vec::new();
        bytes.extend((payload.len() as u32).to_be_bytes());
        bytes.extend(3_u16.to_be_bytes());
        bytes.extend(b"map");
        bytes.extend(&payload);
        let err = decode_value(&mut Unresolved, &bytes).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_decode_value_invalid_utf8_string_fails() {
        let bytes = [0, 0, 0, 1, 0, 3, b's', b't', b'r', 0xff];
        let err = decode_value(&mut Unresolved, &bytes).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidUtf8(_)));
    }
}

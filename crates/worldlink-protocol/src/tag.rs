//! The wire tag table.
//!
//! Every [`Value`](crate::Value) variant maps to exactly one short byte
//! string on the wire, and every byte string maps back to exactly one
//! variant. The table is a `match` in both directions, so adding a variant
//! without a tag (or a tag without a decoder) fails to compile.

use std::fmt;

/// Identifies a value's variant in the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireTag {
    Int32,
    UInt32,
    Float64,
    String,
    Bytes,
    Vector2,
    EntityRef,
    ComponentRef,
    GlobalWindowRef,
    List,
    Tuple,
    Map,
}

impl WireTag {
    /// Every tag, in declaration order.
    pub const ALL: [WireTag; 12] = [
        WireTag::Int32,
        WireTag::UInt32,
        WireTag::Float64,
        WireTag::String,
        WireTag::Bytes,
        WireTag::Vector2,
        WireTag::EntityRef,
        WireTag::ComponentRef,
        WireTag::GlobalWindowRef,
        WireTag::List,
        WireTag::Tuple,
        WireTag::Map,
    ];

    /// The bytes written into the tag slot of a value section.
    pub const fn as_bytes(self) -> &'static [u8] {
        match self {
            WireTag::Int32 => b"i32",
            WireTag::UInt32 => b"u32",
            WireTag::Float64 => b"f64",
            WireTag::String => b"str",
            WireTag::Bytes => b"bin",
            WireTag::Vector2 => b"vec2",
            WireTag::EntityRef => b"ent",
            WireTag::ComponentRef => b"comp",
            WireTag::GlobalWindowRef => b"gwin",
            WireTag::List => b"list",
            WireTag::Tuple => b"tup",
            WireTag::Map => b"map",
        }
    }

    /// Looks up the variant for a tag read off the wire.
    pub fn from_bytes(bytes: &[u8]) -> Option<WireTag> {
        let tag = match bytes {
            b"i32" => WireTag::Int32,
            b"u32" => WireTag::UInt32,
            b"f64" => WireTag::Float64,
            b"str" => WireTag::String,
            b"bin" => WireTag::Bytes,
            b"vec2" => WireTag::Vector2,
            b"ent" => WireTag::EntityRef,
            b"comp" => WireTag::ComponentRef,
            b"gwin" => WireTag::GlobalWindowRef,
            b"list" => WireTag::List,
            b"tup" => WireTag::Tuple,
            b"map" => WireTag::Map,
            _ => return None,
        };
        Some(tag)
    }

    /// `true` for variants whose payload is a run of framed children.
    pub fn is_composite(self) -> bool {
        matches!(
            self,
            WireTag::ComponentRef | WireTag::List | WireTag::Tuple | WireTag::Map
        )
    }
}

impl fmt::Display for WireTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Tags are ASCII by construction.
        f.write_str(std::str::from_utf8(self.as_bytes()).unwrap_or("?"))
    }
}

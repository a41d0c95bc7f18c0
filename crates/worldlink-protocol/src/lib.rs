//! Wire protocol for Worldlink.
//!
//! This crate defines the "language" that clients and servers speak:
//!
//! - **Values** ([`Value`], [`IntoValue`], [`FromValue`]): the typed,
//!   possibly nested data that travels as command arguments.
//! - **Codec** ([`encode_value`], [`decode_value`]): how a single value
//!   is converted to/from its tagged byte representation.
//! - **Framing** ([`Message`], [`encode_message`], [`decode_message`]):
//!   how a command name plus its ordered values become one frame.
//! - **Resolution** ([`Resolver`]): the narrow interface decoding uses to
//!   turn wire-level references (entity ids, components) into live objects.
//! - **Errors** ([`DecodeError`], [`EncodeError`], [`ProtocolError`]).
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and session
//! (command dispatch). It doesn't know about sockets or players.
//! It only knows how to turn bytes into messages and back.
//!
//! ```text
//! Transport (bytes) → Protocol (Message) → Session (handlers)
//! ```

mod codec;
mod error;
mod frame;
mod message;
mod resolve;
mod tag;
mod value;

pub use codec::{decode_value, encode_value};
pub use error::{DecodeError, EncodeError, ProtocolError, ValueTypeError};
pub use frame::{TRAILER, decode_message, encode_message, frame_len};
pub use message::{CommandName, Message, commands};
pub use resolve::{ComponentWrite, DanglingRefs, ResolveError, Resolver, Staged, Unresolved};
pub use tag::WireTag;
pub use value::{ComponentRef, EntityId, FromValue, GlobalWindow, IntoValue, Value};

/// Re-exported so applications can build `Vector2` values without
/// adding `glam` themselves.
pub use glam::DVec2;

/// Builds a `Vec<Value>` from heterogeneous native values.
///
/// Each element goes through [`IntoValue`], so any type without a wire
/// mapping is a compile error rather than a runtime encoding failure.
///
/// ```rust
/// use worldlink_protocol::{values, Value};
///
/// let args = values!["local-1", "Alice", 3_i32];
/// assert_eq!(args[2], Value::Int32(3));
/// ```
#[macro_export]
macro_rules! values {
    () => { ::std::vec::Vec::<$crate::Value>::new() };
    ($($item:expr),+ $(,)?) => {
        ::std::vec![$($crate::IntoValue::into_value($item)),+]
    };
}

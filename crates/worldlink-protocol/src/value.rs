//! Typed values that travel as command arguments.
//!
//! [`Value`] is a closed sum type: every shape the wire can carry is one
//! variant, and every variant has exactly one [`WireTag`]. Application
//! code rarely builds `Value`s by hand. Instead it goes through two traits:
//!
//! - [`IntoValue`]: native type → `Value` (what gets sent).
//! - [`FromValue`]: `Value` → native type (what handlers receive).
//!
//! A type without an `IntoValue` impl simply can't be sent, and the
//! compiler says so at the call site.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::{EncodeError, ValueTypeError, WireTag};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// The textual id of an entity in the shared world.
///
/// Newtype over `String` so an entity id can't be confused with a
/// component name or a display name in a function signature.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Creates an id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrows the id text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Lets maps keyed by `EntityId` be queried with a plain `&str`.
impl Borrow<str> for EntityId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The process-wide window singleton.
///
/// Carries no data on the wire; decoding asks the resolution context
/// whether one exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GlobalWindow;

/// A named component on an entity, together with its current value.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentRef {
    /// The entity that owns the component.
    pub owner: EntityId,
    /// Component name, unique per entity.
    pub name: String,
    /// The component's value at the time it was encoded.
    pub value: Box<Value>,
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// One typed value as carried on the wire.
///
/// Composite variants (`List`, `Tuple`, `Map`, `Component`) nest other
/// values to any depth. `Map` keeps insertion order and allows any value
/// as a key, which is why it is a list of pairs rather than a `HashMap`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int32(i32),
    UInt32(u32),
    Float64(f64),
    String(String),
    Bytes(Bytes),
    Vector2(DVec2),
    Entity(EntityId),
    Component(ComponentRef),
    GlobalWindow,
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// The wire tag written in front of this value's payload.
    pub fn tag(&self) -> WireTag {
        match self {
            Value::Int32(_) => WireTag::Int32,
            Value::UInt32(_) => WireTag::UInt32,
            Value::Float64(_) => WireTag::Float64,
            Value::String(_) => WireTag::String,
            Value::Bytes(_) => WireTag::Bytes,
            Value::Vector2(_) => WireTag::Vector2,
            Value::Entity(_) => WireTag::EntityRef,
            Value::Component(_) => WireTag::ComponentRef,
            Value::GlobalWindow => WireTag::GlobalWindowRef,
            Value::List(_) => WireTag::List,
            Value::Tuple(_) => WireTag::Tuple,
            Value::Map(_) => WireTag::Map,
        }
    }

    /// Human-readable variant name, used in type errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int32(_) => "int32",
            Value::UInt32(_) => "uint32",
            Value::Float64(_) => "float64",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Vector2(_) => "vector2",
            Value::Entity(_) => "entity",
            Value::Component(_) => "component",
            Value::GlobalWindow => "global window",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Map(_) => "map",
        }
    }

    /// Encodes the payload only: no tag, no length prefix.
    ///
    /// # Errors
    /// Returns [`EncodeError::PayloadTooLarge`] if a nested child does
    /// not fit in its `u32` length field.
    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        crate::codec::encode_payload(self)
    }

    /// Borrows the text of a `String` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrows the children of a `List` or `Tuple`.
    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// Looks up a string key in a `Map`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(pairs) => pairs
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Builds a string-keyed `Map`.
    pub fn map<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (Value::String(k.into()), v))
                .collect(),
        )
    }

    fn type_error(&self, expected: &'static str) -> ValueTypeError {
        ValueTypeError {
            expected,
            found: self.kind(),
        }
    }
}

// ---------------------------------------------------------------------------
// IntoValue
// ---------------------------------------------------------------------------

/// Maps a native type to its wire variant.
///
/// This is the exhaustive replacement for picking an encoder by runtime
/// type: if a type has no impl here, it cannot be sent.
pub trait IntoValue {
    fn into_value(self) -> Value;
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl IntoValue for i32 {
    fn into_value(self) -> Value {
        Value::Int32(self)
    }
}

impl IntoValue for u32 {
    fn into_value(self) -> Value {
        Value::UInt32(self)
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Float64(self)
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Int32(i32::from(self))
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::String(self)
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::String(self.to_string())
    }
}

impl IntoValue for Bytes {
    fn into_value(self) -> Value {
        Value::Bytes(self)
    }
}

impl IntoValue for DVec2 {
    fn into_value(self) -> Value {
        Value::Vector2(self)
    }
}

impl IntoValue for EntityId {
    fn into_value(self) -> Value {
        Value::Entity(self)
    }
}

impl IntoValue for &EntityId {
    fn into_value(self) -> Value {
        Value::Entity(self.clone())
    }
}

impl IntoValue for ComponentRef {
    fn into_value(self) -> Value {
        Value::Component(self)
    }
}

impl IntoValue for GlobalWindow {
    fn into_value(self) -> Value {
        Value::GlobalWindow
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(IntoValue::into_value).collect())
    }
}

impl<K: IntoValue, V: IntoValue> IntoValue for BTreeMap<K, V> {
    fn into_value(self) -> Value {
        Value::Map(
            self.into_iter()
                .map(|(k, v)| (k.into_value(), v.into_value()))
                .collect(),
        )
    }
}

impl<A: IntoValue, B: IntoValue> IntoValue for (A, B) {
    fn into_value(self) -> Value {
        Value::Tuple(vec![self.0.into_value(), self.1.into_value()])
    }
}

impl<A: IntoValue, B: IntoValue, C: IntoValue> IntoValue for (A, B, C) {
    fn into_value(self) -> Value {
        Value::Tuple(vec![
            self.0.into_value(),
            self.1.into_value(),
            self.2.into_value(),
        ])
    }
}

impl<A: IntoValue, B: IntoValue, C: IntoValue, D: IntoValue> IntoValue
    for (A, B, C, D)
{
    fn into_value(self) -> Value {
        Value::Tuple(vec![
            self.0.into_value(),
            self.1.into_value(),
            self.2.into_value(),
            self.3.into_value(),
        ])
    }
}

// ---------------------------------------------------------------------------
// FromValue
// ---------------------------------------------------------------------------

/// Extracts a native type from a decoded value.
///
/// References were already resolved against the world during decoding,
/// so extraction itself never needs the resolution context.
pub trait FromValue: Sized {
    /// # Errors
    /// Returns [`ValueTypeError`] when the variant doesn't match.
    fn from_value(value: Value) -> Result<Self, ValueTypeError>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, ValueTypeError> {
        Ok(value)
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::Int32(v) => Ok(v),
            other => Err(other.type_error("int32")),
        }
    }
}

impl FromValue for u32 {
    fn from_value(value: Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::UInt32(v) => Ok(v),
            Value::Int32(v) if v >= 0 => Ok(v as u32),
            other => Err(other.type_error("uint32")),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::Float64(v) => Ok(v),
            Value::Int32(v) => Ok(f64::from(v)),
            Value::UInt32(v) => Ok(f64::from(v)),
            other => Err(other.type_error("float64")),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::Int32(v) => Ok(v != 0),
            Value::UInt32(v) => Ok(v != 0),
            other => Err(other.type_error("bool")),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(other.type_error("string")),
        }
    }
}

impl FromValue for Bytes {
    fn from_value(value: Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => Err(other.type_error("bytes")),
        }
    }
}

impl FromValue for DVec2 {
    fn from_value(value: Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::Vector2(v) => Ok(v),
            other => Err(other.type_error("vector2")),
        }
    }
}

impl FromValue for EntityId {
    fn from_value(value: Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::Entity(id) => Ok(id),
            other => Err(other.type_error("entity")),
        }
    }
}

impl FromValue for ComponentRef {
    fn from_value(value: Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::Component(c) => Ok(c),
            other => Err(other.type_error("component")),
        }
    }
}

impl FromValue for GlobalWindow {
    fn from_value(value: Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::GlobalWindow => Ok(GlobalWindow),
            other => Err(other.type_error("global window")),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::List(items) | Value::Tuple(items) => {
                items.into_iter().map(T::from_value).collect()
            }
            other => Err(other.type_error("list")),
        }
    }
}

impl<K: FromValue + Ord, V: FromValue> FromValue for BTreeMap<K, V> {
    fn from_value(value: Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::Map(pairs) => pairs
                .into_iter()
                .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
                .collect(),
            other => Err(other.type_error("map")),
        }
    }
}

/// Splits a `Tuple` (or `List`) of exactly `N` items.
fn fixed<const N: usize>(
    value: Value,
    expected: &'static str,
) -> Result<[Value; N], ValueTypeError> {
    match value {
        Value::Tuple(items) | Value::List(items) if items.len() == N => {
            items.try_into().map_err(|_| ValueTypeError {
                expected,
                found: "tuple",
            })
        }
        other => Err(other.type_error(expected)),
    }
}

impl<A: FromValue, B: FromValue> FromValue for (A, B) {
    fn from_value(value: Value) -> Result<Self, ValueTypeError> {
        let [a, b] = fixed::<2>(value, "2-tuple")?;
        Ok((A::from_value(a)?, B::from_value(b)?))
    }
}

impl<A: FromValue, B: FromValue, C: FromValue> FromValue for (A, B, C) {
    fn from_value(value: Value) -> Result<Self, ValueTypeError> {
        let [a, b, c] = fixed::<3>(value, "3-tuple")?;
        Ok((A::from_value(a)?, B::from_value(b)?, C::from_value(c)?))
    }
}

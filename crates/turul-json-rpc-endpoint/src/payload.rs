//! Message payloads before and after method-typed resolution.
//!
//! A `params`/`result` member starts life as a JSON tree. Once the method it
//! belongs to is known, the registry's codecs turn it into a [`TypedValue`]:
//! a concrete Rust value behind a type-erased handle that still knows how to
//! serialize itself back onto the wire.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// Object-safe view of a decoded value.
trait ErasedValue: Any + Send + Sync {
    fn to_json(&self) -> serde_json::Result<Value>;
    fn debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
    fn as_any(&self) -> &dyn Any;
}

impl<T> ErasedValue for T
where
    T: Serialize + fmt::Debug + Any + Send + Sync,
{
    fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    fn debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A strongly-typed value produced by a registered codec.
#[derive(Clone)]
pub struct TypedValue {
    type_name: &'static str,
    value: Arc<dyn ErasedValue>,
}

impl TypedValue {
    pub fn new<T>(value: T) -> Self
    where
        T: Serialize + fmt::Debug + Send + Sync + 'static,
    {
        Self {
            type_name: std::any::type_name::<T>(),
            value: Arc::new(value),
        }
    }

    /// Name of the concrete Rust type held
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.as_any().downcast_ref::<T>()
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.value.as_any().is::<T>()
    }

    pub fn to_json(&self) -> serde_json::Result<Value> {
        self.value.to_json()
    }
}

impl fmt::Debug for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.debug(f)
    }
}

impl Serialize for TypedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

/// The `params` or `result` member of a message.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Unresolved JSON tree (unknown method, or typed decoding failed)
    Json(Value),
    /// A single value decoded against the method's declared type
    Typed(TypedValue),
    /// Positional parameters; `None` marks a declared parameter the sender omitted
    Positional(Vec<Option<Payload>>),
}

impl Payload {
    pub fn json(value: impl Into<Value>) -> Self {
        Payload::Json(value.into())
    }

    pub fn typed<T>(value: T) -> Self
    where
        T: Serialize + fmt::Debug + Send + Sync + 'static,
    {
        Payload::Typed(TypedValue::new(value))
    }

    /// Serialize any payload into a value for outgoing payloads
    pub fn from_serialize<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        serde_json::to_value(value).map(Payload::Json)
    }

    pub fn null() -> Self {
        Payload::Json(Value::Null)
    }

    pub fn is_typed(&self) -> bool {
        matches!(self, Payload::Typed(_))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Borrow the typed value if this payload was resolved to `T`
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        match self {
            Payload::Typed(typed) => typed.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Positional argument `index`, if this is a positional payload
    pub fn positional(&self, index: usize) -> Option<&Payload> {
        match self {
            Payload::Positional(items) => items.get(index).and_then(Option::as_ref),
            _ => None,
        }
    }

    /// The wire representation of this payload.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        match self {
            Payload::Json(value) => Ok(value.clone()),
            Payload::Typed(typed) => typed.to_json(),
            Payload::Positional(items) => items
                .iter()
                .map(|item| match item {
                    Some(payload) => payload.to_value(),
                    None => Ok(Value::Null),
                })
                .collect::<serde_json::Result<Vec<_>>>()
                .map(Value::Array),
        }
    }

    /// Deserialize the payload into `T` regardless of how it was resolved.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        match self {
            Payload::Json(value) => T::deserialize(value),
            _ => serde_json::from_value(self.to_value()?),
        }
    }
}

/// Payloads compare by their wire representation.
impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        match (self.to_value(), other.to_value()) {
            (Ok(left), Ok(right)) => left == right,
            _ => false,
        }
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<TypedValue> for Payload {
    fn from(value: TypedValue) -> Self {
        Payload::Typed(value)
    }
}

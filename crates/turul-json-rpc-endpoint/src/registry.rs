//! Method registry: the static table that tells the codec how to type
//! `params` and `result` for each method.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::either::EitherCodec;
use crate::error::CodecError;
use crate::payload::{Payload, TypedValue};
use crate::types::RequestId;

type DecodeFn = dyn Fn(Value) -> Result<Payload, CodecError> + Send + Sync;

/// Decoder for one concrete payload type.
///
/// Codecs are registered explicitly per type instead of being discovered at
/// runtime.
#[derive(Clone)]
pub struct TypeCodec {
    name: String,
    decode: Arc<DecodeFn>,
}

impl TypeCodec {
    pub fn new(
        name: impl Into<String>,
        decode: impl Fn(Value) -> Result<Payload, CodecError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            decode: Arc::new(decode),
        }
    }

    /// Decode through `T`'s serde implementation.
    pub fn of<T>() -> Self
    where
        T: DeserializeOwned + Serialize + fmt::Debug + Send + Sync + 'static,
    {
        let name = std::any::type_name::<T>();
        Self::new(name, move |value| {
            serde_json::from_value::<T>(value)
                .map(Payload::typed)
                .map_err(|source| CodecError::Decode {
                    type_name: name.to_string(),
                    source,
                })
        })
    }

    /// Keep the value as a JSON tree.
    pub fn json() -> Self {
        Self::new("json", |value| Ok(Payload::Json(value)))
    }

    /// Decode a structurally discriminated union.
    pub fn either<L, R>(codec: EitherCodec<L, R>) -> Self
    where
        L: DeserializeOwned + Serialize + fmt::Debug + Send + Sync + 'static,
        R: DeserializeOwned + Serialize + fmt::Debug + Send + Sync + 'static,
    {
        Self::new(std::any::type_name::<crate::Either<L, R>>(), move |value| {
            codec.decode(value).map(Payload::typed)
        })
    }

    /// Decode a JSON array element by element with `element`.
    ///
    /// The result is a `Vec<TypedValue>` behind the typed payload.
    pub fn list_of(element: TypeCodec) -> Self {
        let name = format!("list of {}", element.name);
        let list_name = name.clone();
        Self::new(name, move |value| {
            let Value::Array(items) = value else {
                return Err(CodecError::ExpectedArray {
                    type_name: list_name.clone(),
                });
            };
            let mut decoded = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                let payload = element.decode(item).map_err(|source| CodecError::Element {
                    type_name: list_name.clone(),
                    index,
                    source: Box::new(source),
                })?;
                decoded.push(match payload {
                    Payload::Typed(typed) => typed,
                    other => TypedValue::new(other),
                });
            }
            Ok(Payload::typed(decoded))
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn decode(&self, value: Value) -> Result<Payload, CodecError> {
        (self.decode)(value)
    }
}

impl fmt::Debug for TypeCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeCodec").field(&self.name).finish()
    }
}

/// Whether a method expects an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Request,
    Notification,
}

/// Typed shape of one remotely callable method
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub name: String,
    pub kind: MethodKind,
    pub param_types: Vec<TypeCodec>,
    /// `None` for notifications and void requests
    pub result_type: Option<TypeCodec>,
}

impl MethodDescriptor {
    pub fn request(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MethodKind::Request,
            param_types: Vec::new(),
            result_type: None,
        }
    }

    pub fn notification(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MethodKind::Notification,
            param_types: Vec::new(),
            result_type: None,
        }
    }

    pub fn param<T>(self) -> Self
    where
        T: DeserializeOwned + Serialize + fmt::Debug + Send + Sync + 'static,
    {
        self.param_codec(TypeCodec::of::<T>())
    }

    pub fn param_codec(mut self, codec: TypeCodec) -> Self {
        self.param_types.push(codec);
        self
    }

    pub fn returns<T>(self) -> Self
    where
        T: DeserializeOwned + Serialize + fmt::Debug + Send + Sync + 'static,
    {
        self.returns_codec(TypeCodec::of::<T>())
    }

    pub fn returns_codec(mut self, codec: TypeCodec) -> Self {
        self.result_type = Some(codec);
        self
    }

    pub fn is_notification(&self) -> bool {
        self.kind == MethodKind::Notification
    }
}

/// Lookup of method shapes by name. Read-only once a connection is set up.
pub trait MethodRegistry: Send + Sync {
    fn lookup(&self, method: &str) -> Option<&MethodDescriptor>;
}

/// Finds the method an outgoing request id was sent for.
///
/// Only used to type the `result` of a response.
pub trait MethodResolver: Send + Sync {
    fn resolve_method(&self, id: &RequestId) -> Option<String>;
}

/// A registry built once from a static table
#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    methods: HashMap<String, MethodDescriptor>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a method, replacing any earlier entry with the same name
    pub fn with(mut self, descriptor: MethodDescriptor) -> Self {
        self.insert(descriptor);
        self
    }

    pub fn insert(&mut self, descriptor: MethodDescriptor) {
        self.methods.insert(descriptor.name.clone(), descriptor);
    }

    /// Merge another table into this one; entries in `other` take precedence
    pub fn merge(mut self, other: MethodTable) -> Self {
        self.methods.extend(other.methods);
        self
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn method_names(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }
}

impl MethodRegistry for MethodTable {
    fn lookup(&self, method: &str) -> Option<&MethodDescriptor> {
        self.methods.get(method)
    }
}

impl FromIterator<MethodDescriptor> for MethodTable {
    fn from_iter<I: IntoIterator<Item = MethodDescriptor>>(iter: I) -> Self {
        let mut table = MethodTable::new();
        for descriptor in iter {
            table.insert(descriptor);
        }
        table
    }
}

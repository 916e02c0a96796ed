//! Tagged unions whose variant is decided from the JSON shape.
//!
//! Two resolution strategies exist:
//!
//! - **Structural discriminators** ([`EitherCodec`]): a pair of [`Predicate`]s
//!   inspects the raw JSON value and picks the variant before any decoding
//!   happens. When both predicates match, the left variant wins.
//! - **Backtracking fallback** (the `Deserialize` impl of [`Either`]): the value
//!   is buffered as a JSON tree, decoded as the left type, and only on failure
//!   decoded as the right type.
//!
//! The fallback cannot tell "decodes as the wrong variant" apart from "is that
//! variant". A right-variant value that also happens to be structurally valid
//! for the left type is reported as `Left`. Prefer an [`EitherCodec`] whenever
//! the variants can be told apart by shape.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::CodecError;

/// A value that is exactly one of two types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Either<L, R> {
    Left(L),
    Right(R),
}

/// A value that is exactly one of three types, nested to the right.
pub type Either3<A, B, C> = Either<A, Either<B, C>>;

impl<L, R> Either<L, R> {
    pub fn is_left(&self) -> bool {
        matches!(self, Either::Left(_))
    }

    pub fn is_right(&self) -> bool {
        matches!(self, Either::Right(_))
    }

    pub fn left(&self) -> Option<&L> {
        match self {
            Either::Left(value) => Some(value),
            Either::Right(_) => None,
        }
    }

    pub fn right(&self) -> Option<&R> {
        match self {
            Either::Left(_) => None,
            Either::Right(value) => Some(value),
        }
    }

    pub fn into_left(self) -> Option<L> {
        match self {
            Either::Left(value) => Some(value),
            Either::Right(_) => None,
        }
    }

    pub fn into_right(self) -> Option<R> {
        match self {
            Either::Left(_) => None,
            Either::Right(value) => Some(value),
        }
    }

    pub fn map<L2, R2>(
        self,
        left: impl FnOnce(L) -> L2,
        right: impl FnOnce(R) -> R2,
    ) -> Either<L2, R2> {
        match self {
            Either::Left(value) => Either::Left(left(value)),
            Either::Right(value) => Either::Right(right(value)),
        }
    }
}

impl<A, B, C> Either<A, Either<B, C>> {
    pub fn first(value: A) -> Self {
        Either::Left(value)
    }

    pub fn second(value: B) -> Self {
        Either::Right(Either::Left(value))
    }

    pub fn third(value: C) -> Self {
        Either::Right(Either::Right(value))
    }
}

/// Serializes whichever variant is populated.
impl<L: Serialize, R: Serialize> Serialize for Either<L, R> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Either::Left(value) => value.serialize(serializer),
            Either::Right(value) => value.serialize(serializer),
        }
    }
}

impl<'de, L, R> Deserialize<'de> for Either<L, R>
where
    L: DeserializeOwned,
    R: DeserializeOwned,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        decode_backtracking(value).map_err(serde::de::Error::custom)
    }
}

/// Resolve an untyped value by trying the left type, then the right type.
///
/// A value that happens to decode as `L` is taken as `L` even if the sender
/// meant `R`. Prefer an [`EitherCodec`] with predicates when the variants are
/// structurally distinguishable.
pub fn decode_backtracking<L, R>(value: Value) -> Result<Either<L, R>, CodecError>
where
    L: DeserializeOwned,
    R: DeserializeOwned,
{
    match L::deserialize(&value) {
        Ok(left) => Ok(Either::Left(left)),
        Err(_) => R::deserialize(value)
            .map(Either::Right)
            .map_err(|source| CodecError::Decode {
                type_name: std::any::type_name::<Either<L, R>>().to_string(),
                source,
            }),
    }
}

type PredicateFn = dyn Fn(&Value) -> bool + Send + Sync;

/// A structural test over a raw JSON value.
#[derive(Clone)]
pub struct Predicate {
    description: String,
    test: Arc<PredicateFn>,
}

impl Predicate {
    pub fn new(
        description: impl Into<String>,
        test: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            description: description.into(),
            test: Arc::new(test),
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        (self.test)(value)
    }

    pub fn always() -> Self {
        Self::new("any value", |_| true)
    }

    pub fn is_null() -> Self {
        Self::new("null", Value::is_null)
    }

    pub fn is_string() -> Self {
        Self::new("string", Value::is_string)
    }

    pub fn is_number() -> Self {
        Self::new("number", Value::is_number)
    }

    pub fn is_boolean() -> Self {
        Self::new("boolean", Value::is_boolean)
    }

    pub fn is_array() -> Self {
        Self::new("array", Value::is_array)
    }

    pub fn is_object() -> Self {
        Self::new("object", Value::is_object)
    }

    /// An object carrying property `name`
    pub fn has_property(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(format!("object with '{}'", name), move |value| {
            value.as_object().is_some_and(|obj| obj.contains_key(&name))
        })
    }

    /// An object whose property `name` equals `expected`
    pub fn property_equals(name: impl Into<String>, expected: impl Into<Value>) -> Self {
        let name = name.into();
        let expected = expected.into();
        Self::new(format!("object with '{}' = {}", name, expected), move |value| {
            value.get(&name).is_some_and(|actual| *actual == expected)
        })
    }

    pub fn and(self, other: Predicate) -> Self {
        let description = format!("{} and {}", self.description, other.description);
        Self::new(description, move |value| {
            self.matches(value) && other.matches(value)
        })
    }

    pub fn or(self, other: Predicate) -> Self {
        let description = format!("{} or {}", self.description, other.description);
        Self::new(description, move |value| {
            self.matches(value) || other.matches(value)
        })
    }

    pub fn not(self) -> Self {
        let description = format!("not {}", self.description);
        Self::new(description, move |value| !self.matches(value))
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Predicate").field(&self.description).finish()
    }
}

/// Decodes an [`Either`] by inspecting the JSON shape first.
pub struct EitherCodec<L, R> {
    left: Predicate,
    right: Predicate,
    _marker: PhantomData<fn() -> (L, R)>,
}

impl<L, R> Clone for EitherCodec<L, R> {
    fn clone(&self) -> Self {
        Self {
            left: self.left.clone(),
            right: self.right.clone(),
            _marker: PhantomData,
        }
    }
}

impl<L, R> fmt::Debug for EitherCodec<L, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EitherCodec")
            .field("left", &self.left)
            .field("right", &self.right)
            .finish()
    }
}

impl<L, R> EitherCodec<L, R>
where
    L: DeserializeOwned,
    R: DeserializeOwned,
{
    pub fn new(left: Predicate, right: Predicate) -> Self {
        Self {
            left,
            right,
            _marker: PhantomData,
        }
    }

    /// Left when `left` matches, right for everything else.
    pub fn left_when(left: Predicate) -> Self {
        Self::new(left, Predicate::always())
    }

    /// Right when `right` matches, left for everything else.
    pub fn right_when(right: Predicate) -> Self {
        Self::new(right.clone().not(), right)
    }

    /// Pick a variant for `value` without decoding it.
    ///
    /// Returns `None` when neither discriminator matches.
    pub fn discriminate(&self, value: &Value) -> Option<Side> {
        if self.left.matches(value) {
            Some(Side::Left)
        } else if self.right.matches(value) {
            Some(Side::Right)
        } else {
            None
        }
    }

    pub fn decode(&self, value: Value) -> Result<Either<L, R>, CodecError> {
        match self.discriminate(&value) {
            Some(Side::Left) => decode_as::<L>(value).map(Either::Left),
            Some(Side::Right) => decode_as::<R>(value).map(Either::Right),
            None => Err(CodecError::NoVariantMatched {
                type_name: std::any::type_name::<Either<L, R>>().to_string(),
            }),
        }
    }

    /// Decode a JSON array whose elements are each one of the two variants.
    pub fn decode_list(&self, value: Value) -> Result<Vec<Either<L, R>>, CodecError> {
        let Value::Array(items) = value else {
            return Err(CodecError::ExpectedArray {
                type_name: std::any::type_name::<Vec<Either<L, R>>>().to_string(),
            });
        };
        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                self.decode(item).map_err(|source| CodecError::Element {
                    type_name: std::any::type_name::<Either<L, R>>().to_string(),
                    index,
                    source: Box::new(source),
                })
            })
            .collect()
    }
}

/// Which variant a discriminator selected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

fn decode_as<T: DeserializeOwned>(value: Value) -> Result<T, CodecError> {
    serde_json::from_value(value).map_err(|source| CodecError::Decode {
        type_name: std::any::type_name::<T>().to_string(),
        source,
    })
}

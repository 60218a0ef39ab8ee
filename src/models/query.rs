//! Query-related data models.
//!
//! This module defines the scalar values that may be bound to placeholders, the
//! fill values accepted by the query builder and the built query itself.

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fmt;

/// A result row, keyed by column name in select-list order.
///
/// `serde_json` is built with `preserve_order`, so keys keep insertion order.
pub type Row = serde_json::Map<String, JsonValue>;

/// A scalar value for a positional placeholder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DbValue {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(serialize_with = "base64_bytes::serialize")]
    Bytes(Vec<u8>),
}

impl DbValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Convert a JSON scalar. Arrays and objects are not scalars.
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Null => Some(Self::Null),
            JsonValue::Bool(b) => Some(Self::Bool(*b)),
            JsonValue::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float)),
            JsonValue::String(s) => Some(Self::String(s.clone())),
            JsonValue::Array(_) | JsonValue::Object(_) => None,
        }
    }
}

impl fmt::Display for DbValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

macro_rules! impl_from_for_db_value {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for DbValue {
                fn from(v: $ty) -> Self {
                    Self::$variant(v.into())
                }
            }
        )+
    };
}

impl_from_for_db_value!(
    bool => Bool,
    i32 => Int,
    i64 => Int,
    u32 => Int,
    f64 => Float,
    String => String,
    &str => String,
    Vec<u8> => Bytes,
);

impl<T: Into<DbValue>> From<Option<T>> for DbValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }
}

/// A fill value for a query template: `$$` takes a scalar, `$$$` takes a list.
#[derive(Debug, Clone, PartialEq)]
pub enum Fill {
    Scalar(DbValue),
    List(Vec<DbValue>),
}

impl Fill {
    /// Convert a JSON value: arrays become lists, scalars stay scalars.
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Array(items) => items
                .iter()
                .map(DbValue::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Self::List),
            other => DbValue::from_json(other).map(Self::Scalar),
        }
    }
}

impl fmt::Display for Fill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(v) => write!(f, "{}", v),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(","))
            }
        }
    }
}

impl Fill {
    /// Fill for a `$$` marker.
    pub fn scalar(value: impl Into<DbValue>) -> Self {
        Self::Scalar(value.into())
    }

    /// Fill for a `$$$` marker.
    pub fn list<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<DbValue>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<DbValue> for Fill {
    fn from(value: DbValue) -> Self {
        Self::Scalar(value)
    }
}

impl From<Vec<DbValue>> for Fill {
    fn from(items: Vec<DbValue>) -> Self {
        Self::List(items)
    }
}

/// Query text with positional placeholders (`$1`, `$2`, ...) and the values bound to them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    pub text: String,
    pub values: Vec<DbValue>,
}

impl Query {
    /// Create a query from text and values.
    pub fn new(text: impl Into<String>, values: Vec<DbValue>) -> Self {
        Self {
            text: text.into(),
            values,
        }
    }
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Self::new(text, Vec::new())
    }
}

impl From<String> for Query {
    fn from(text: String) -> Self {
        Self::new(text, Vec::new())
    }
}

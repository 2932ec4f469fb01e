//! Native values exchanged with handler code.
//!
//! [`Value`] is the dynamically typed value a producer hands to `send` /
//! `publish` / `reply`, and the value a handler receives. It mirrors the
//! value space of a scripting runtime: numbers may be integers or floats,
//! trees are arrays and string-keyed objects, and some values (functions,
//! symbols) exist that no message can carry.
//!
//! # Example
//!
//! ```
//! use addrbus::Value;
//!
//! let v = Value::object([("a", Value::from(1)), ("b", Value::from("x"))]);
//! assert_eq!(v.get("a"), Some(&Value::Int(1)));
//! ```

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// A native dynamic value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// No value at all (an omitted argument).
    #[default]
    Undefined,
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer number.
    Int(i64),
    /// Floating-point number.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Opaque byte payload, never re-encoded.
    Binary(Bytes),
    /// Ordered list.
    Array(Vec<Value>),
    /// String-keyed record.
    Object(BTreeMap<String, Value>),
    /// A value of the host runtime with no message representation.
    Foreign {
        /// Runtime type name, reported in errors.
        type_name: String,
    },
}

impl Value {
    /// Build an object from key/value pairs.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build an empty object.
    pub fn empty_object() -> Self {
        Value::Object(BTreeMap::new())
    }

    /// Build a foreign value of the given runtime type.
    pub fn foreign(type_name: impl Into<String>) -> Self {
        Value::Foreign {
            type_name: type_name.into(),
        }
    }

    /// Runtime type name, as used in diagnostics.
    pub fn type_name(&self) -> &str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Float(_) => "number",
            Value::String(_) => "string",
            Value::Binary(_) => "buffer",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Foreign { type_name } => type_name,
        }
    }

    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric value regardless of integer or float kind.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Look up a member of an object value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Convert a serde-serializable value.
    ///
    /// The value goes through its JSON data model, so structs become
    /// objects and sequences become arrays.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Value::from(serde_json::to_value(value)?))
    }

    /// Convert into a serde-deserializable type.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T> {
        Ok(serde_json::from_value(self.into_json())?)
    }

    /// Convert to a JSON tree.
    ///
    /// Follows JSON text rules: undefined and foreign members of objects are
    /// omitted, undefined and foreign array elements become `null`, integral
    /// floats become integers, non-finite floats become `null`. Binary
    /// payloads become arrays of byte values.
    pub fn into_json(self) -> serde_json::Value {
        json_member(self).unwrap_or(serde_json::Value::Null)
    }
}

/// JSON form of a tree member, `None` when JSON text would skip it.
fn json_member(value: Value) -> Option<serde_json::Value> {
    use serde_json::Value as Json;

    let json = match value {
        Value::Undefined | Value::Foreign { .. } => return None,
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(b),
        Value::Int(n) => Json::from(n),
        Value::Float(f) => match integral(f) {
            Some(n) => Json::from(n),
            None => serde_json::Number::from_f64(f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
        },
        Value::String(s) => Json::String(s),
        Value::Binary(b) => Json::Array(b.iter().map(|byte| Json::from(*byte)).collect()),
        Value::Array(items) => Json::Array(
            items
                .into_iter()
                .map(|item| json_member(item).unwrap_or(Json::Null))
                .collect(),
        ),
        Value::Object(map) => Json::Object(
            map.into_iter()
                .filter_map(|(k, v)| json_member(v).map(|v| (k, v)))
                .collect(),
        ),
    };
    Some(json)
}

/// The integer a float denotes, if it has no fractional part and fits i64.
pub(crate) fn integral(f: f64) -> Option<i64> {
    // 2^63 is exactly representable; anything at or above it overflows i64.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if f.is_finite() && f.fract() == 0.0 && f >= -LIMIT && f < LIMIT {
        Some(f as i64)
    } else {
        None
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

macro_rules! from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(n: $t) -> Self {
                Value::Int(i64::from(n))
            }
        })*
    };
}

from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Value::Float(f64::from(f))
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Binary(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Object(map)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Null, Into::into)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Undefined
    }
}

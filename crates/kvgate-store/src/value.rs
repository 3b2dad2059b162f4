//! Typed values stored through the codec

use serde_json::{Map, Number, Value};

use crate::error::{Result, StoreError};

/// A dynamically-typed value, resolved to its variant once at the API
/// boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    String(String),
    Int(i64),
    Float(f64),
    Map(Map<String, Value>),
    /// Top-level value of a list collection; elements are never lists.
    List(Vec<StoredValue>),
}

impl StoredValue {
    /// Build a value from decoded JSON. `bool` and `null` are rejected.
    pub fn from_json(value: Value) -> Result<Self> {
        Self::convert(value, false, true)
    }

    /// Build a value from decoded JSON, coercing scalars with no variant of
    /// their own (`bool`, `null`) to their JSON text as a string.
    pub fn from_json_lenient(value: Value) -> Result<Self> {
        Self::convert(value, true, true)
    }

    fn convert(value: Value, lenient: bool, top_level: bool) -> Result<Self> {
        match value {
            Value::String(s) => Ok(StoredValue::String(s)),
            Value::Number(n) => Self::from_number(&n),
            Value::Object(map) => Ok(StoredValue::Map(map)),
            Value::Array(items) if top_level => items
                .into_iter()
                .map(|item| Self::convert(item, lenient, false))
                .collect::<Result<Vec<_>>>()
                .map(StoredValue::List),
            Value::Array(_) => Err(StoredValue::unsupported("nested list")),
            other @ (Value::Bool(_) | Value::Null) => {
                if lenient {
                    Ok(StoredValue::String(other.to_string()))
                } else {
                    Err(StoredValue::unsupported(json_type_name(&other)))
                }
            }
        }
    }

    fn from_number(n: &Number) -> Result<Self> {
        if let Some(i) = n.as_i64() {
            return Ok(StoredValue::Int(i));
        }
        // u64 values above i64::MAX fall through to the float variant
        n.as_f64()
            .map(StoredValue::Float)
            .ok_or_else(|| StoredValue::unsupported("unrepresentable number"))
    }

    fn unsupported(what: &str) -> StoreError {
        StoreError::UnsupportedType(what.to_string())
    }

    /// Name of the variant, used in error messages and logs
    pub fn type_name(&self) -> &'static str {
        match self {
            StoredValue::String(_) => "string",
            StoredValue::Int(_) => "int",
            StoredValue::Float(_) => "float",
            StoredValue::Map(_) => "map",
            StoredValue::List(_) => "list",
        }
    }

    /// Convert back to JSON for responses. Non-finite floats become `null`.
    pub fn to_json(&self) -> Value {
        match self {
            StoredValue::String(s) => Value::String(s.clone()),
            StoredValue::Int(i) => Value::from(*i),
            StoredValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            StoredValue::Map(map) => Value::Object(map.clone()),
            StoredValue::List(items) => {
                Value::Array(items.iter().map(StoredValue::to_json).collect())
            }
        }
    }
}

impl From<&str> for StoredValue {
    fn from(s: &str) -> Self {
        StoredValue::String(s.to_string())
    }
}

impl From<String> for StoredValue {
    fn from(s: String) -> Self {
        StoredValue::String(s)
    }
}

impl From<i64> for StoredValue {
    fn from(i: i64) -> Self {
        StoredValue::Int(i)
    }
}

impl From<f64> for StoredValue {
    fn from(f: f64) -> Self {
        StoredValue::Float(f)
    }
}

impl From<Map<String, Value>> for StoredValue {
    fn from(map: Map<String, Value>) -> Self {
        StoredValue::Map(map)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

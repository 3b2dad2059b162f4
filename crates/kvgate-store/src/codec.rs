//! List element wire format
//!
//! Backends store list items as plain strings, so each element carries its
//! own type tag:
//!
//! ```text
//! {"Dtype":"int64","Data":"42"}
//! {"Dtype":"float64","Data":"2.5"}
//! {"Dtype":"string","Data":"qwerty"}
//! {"Dtype":"map","Data":"{\"key\":1}"}
//! ```
//!
//! Floats are written in their shortest round-trip decimal form so that
//! decoding yields the exact same `f64`. Payloads produced by older writers
//! with fixed decimals (`2.500000`) still decode.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};
use crate::value::StoredValue;

/// Type tag of a list element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    String,
    /// Accepted on decode; encode always writes `int64`
    Int,
    Int64,
    Float64,
    Map,
}

impl Dtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dtype::String => "string",
            Dtype::Int => "int",
            Dtype::Int64 => "int64",
            Dtype::Float64 => "float64",
            Dtype::Map => "map",
        }
    }
}

/// A tagged list element as stored in the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListElement {
    #[serde(rename = "Dtype")]
    pub dtype: Dtype,
    #[serde(rename = "Data")]
    pub data: String,
}

impl ListElement {
    pub fn new(dtype: Dtype, data: impl Into<String>) -> Self {
        Self {
            dtype,
            data: data.into(),
        }
    }
}

pub fn encode_element(value: &StoredValue) -> Result<ListElement> {
    match value {
        StoredValue::String(s) => Ok(ListElement::new(Dtype::String, s.as_str())),
        StoredValue::Int(i) => Ok(ListElement::new(Dtype::Int64, i.to_string())),
        StoredValue::Float(f) => {
            if !f.is_finite() {
                return Err(StoreError::UnsupportedType(format!(
                    "non-finite float {}",
                    f
                )));
            }
            Ok(ListElement::new(Dtype::Float64, format_float(*f)))
        }
        StoredValue::Map(map) => {
            let data = serde_json::to_string(map)?;
            Ok(ListElement::new(Dtype::Map, data))
        }
        StoredValue::List(_) => Err(StoreError::UnsupportedType(
            "nested list inside a list element".to_string(),
        )),
    }
}

pub fn decode_element(element: &ListElement) -> Result<StoredValue> {
    let data = element.data.as_str();
    match element.dtype {
        Dtype::String => Ok(StoredValue::String(data.to_string())),
        Dtype::Int | Dtype::Int64 => data
            .parse::<i64>()
            .map(StoredValue::Int)
            .map_err(|e| malformed(element, e)),
        Dtype::Float64 => data
            .parse::<f64>()
            .map(StoredValue::Float)
            .map_err(|e| malformed(element, e)),
        Dtype::Map => {
            let parsed: Map<String, Value> =
                serde_json::from_str(data).map_err(|e| malformed(element, e))?;
            Ok(StoredValue::Map(parsed))
        }
    }
}

/// Encode a value into the string stored in the backend
pub fn encode_wire(value: &StoredValue) -> Result<String> {
    let element = encode_element(value)?;
    Ok(serde_json::to_string(&element)?)
}

/// Decode one backend string into a value
pub fn decode_wire(raw: &str) -> Result<StoredValue> {
    let element: ListElement = serde_json::from_str(raw)
        .map_err(|e| StoreError::MalformedElement(format!("{}: {}", e, truncate(raw))))?;
    decode_element(&element)
}

/// Encode every element, stopping at the first failure
pub fn encode_list(values: &[StoredValue]) -> Result<Vec<String>> {
    values.iter().map(encode_wire).collect()
}

/// Decode every element; a single bad element fails the whole list
pub fn decode_list(raw: &[String]) -> Result<Vec<StoredValue>> {
    raw.iter().map(|s| decode_wire(s)).collect()
}

fn format_float(f: f64) -> String {
    // Display for f64 is the shortest string that parses back to the same value
    f.to_string()
}

fn malformed(element: &ListElement, err: impl std::fmt::Display) -> StoreError {
    StoreError::MalformedElement(format!(
        "{} payload {:?}: {}",
        element.dtype.as_str(),
        truncate(&element.data),
        err
    ))
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(64) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

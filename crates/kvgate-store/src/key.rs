//! Key canonicalization
//!
//! Request keys arrive as arbitrary JSON (string, number or object) and are
//! turned into exactly one backend key string:
//!
//! - strings are used verbatim
//! - integers become their decimal form (`42`)
//! - floats use six fixed decimals (`1.5` -> `1.500000`)
//! - objects become compact JSON with fields sorted at every level
//!
//! A number and the string spelling of its canonical form collide
//! (`42` and `"42"` both map to `42`). Tagged mode prefixes the canonical
//! form with its source type to keep those apart.

use serde_json::{Map, Value};
use std::fmt;

use crate::error::{Result, StoreError};

/// Digits after the decimal point for float keys
pub const FLOAT_KEY_PRECISION: usize = 6;

const TAG_PREFIXES: [&str; 4] = ["s:", "i:", "f:", "o:"];

/// How a key given as plain text is read
#[derive(Debug, Clone, PartialEq)]
pub enum TextKey {
    /// A raw key still to be normalized
    Raw(Value),
    /// Already a backend key
    Canonical(String),
}

/// Converts raw JSON keys into backend key strings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyNormalizer {
    tagged: bool,
}

impl KeyNormalizer {
    /// Plain normalizer (no type prefix)
    pub fn new() -> Self {
        Self { tagged: false }
    }

    /// Normalizer that prefixes each key with its source type
    /// (`s:`, `i:`, `f:`, `o:`)
    pub fn tagged() -> Self {
        Self { tagged: true }
    }

    pub fn is_tagged(&self) -> bool {
        self.tagged
    }

    pub fn normalize(&self, raw: &Value) -> Result<String> {
        let (tag, canonical) = match raw {
            Value::Null => {
                return Err(StoreError::InvalidKey("key is absent or null".to_string()))
            }
            Value::String(s) => ("s", s.clone()),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ("i", i.to_string())
                } else if let Some(u) = n.as_u64() {
                    ("i", u.to_string())
                } else {
                    let f = n.as_f64().ok_or_else(|| {
                        StoreError::InvalidKey(format!("unrepresentable number: {}", n))
                    })?;
                    ("f", format!("{:.*}", FLOAT_KEY_PRECISION, f))
                }
            }
            Value::Object(map) => ("o", canonical_json(map)?),
            Value::Bool(_) => {
                return Err(StoreError::InvalidKey(
                    "boolean keys are not supported".to_string(),
                ))
            }
            Value::Array(_) => {
                return Err(StoreError::InvalidKey(
                    "array keys are not supported".to_string(),
                ))
            }
        };

        if self.tagged {
            Ok(format!("{}:{}", tag, canonical))
        } else {
            Ok(canonical)
        }
    }

    /// Normalize a string key
    pub fn normalize_str(&self, raw: &str) -> Result<String> {
        self.normalize(&Value::String(raw.to_string()))
    }

    /// Read a key that arrived as text, such as a query parameter.
    ///
    /// Plain mode takes the text as a string key, which already matches
    /// integer keys since both share one canonical form. Tagged mode reads
    /// text that parses as a JSON number, object or quoted string as that
    /// key. Other text carrying a type prefix is taken as an already tagged
    /// key (as listed by `KEYS`); anything else is a string key.
    pub fn read_text(&self, raw: &str) -> TextKey {
        let text = || TextKey::Raw(Value::String(raw.to_string()));
        if !self.tagged {
            return text();
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(value @ (Value::Number(_) | Value::Object(_) | Value::String(_))) => {
                TextKey::Raw(value)
            }
            _ if TAG_PREFIXES.iter().any(|tag| raw.starts_with(tag)) => {
                TextKey::Canonical(raw.to_string())
            }
            _ => text(),
        }
    }
}

/// A backend key already produced by a [`KeyNormalizer`].
///
/// Lets callers resolve a key once (for example while binding a request)
/// and hand it to store operations without normalizing again.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    pub(crate) fn from_normalized(key: String) -> Self {
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<&str> for CanonicalKey {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Serialize an object with its fields sorted lexicographically
fn canonical_json(map: &Map<String, Value>) -> Result<String> {
    let sorted = sort_value(&Value::Object(map.clone()));
    Ok(serde_json::to_string(&sorted)?)
}

fn sort_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k.clone(), sort_value(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_value).collect()),
        other => other.clone(),
    }
}

//! Typed string, hash and list operations
//!
//! [`TypedStore`] normalizes every raw key, validates input before touching
//! the backend, runs list values through the codec, and writes collection
//! values inside a watched transaction followed by their optional expiry.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::{Backend, Transaction, TxBuilder};
use crate::codec;
use crate::error::{Result, StoreError};
use crate::key::{CanonicalKey, KeyNormalizer, TextKey};
use crate::value::StoredValue;

/// Unit applied to caller-supplied TTL integers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtlUnit {
    Seconds,
    #[default]
    Minutes,
}

impl TtlUnit {
    fn seconds(&self) -> u64 {
        match self {
            TtlUnit::Seconds => 1,
            TtlUnit::Minutes => 60,
        }
    }
}

impl fmt::Display for TtlUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TtlUnit::Seconds => f.write_str("seconds"),
            TtlUnit::Minutes => f.write_str("minutes"),
        }
    }
}

impl FromStr for TtlUnit {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s" | "sec" | "secs" | "seconds" => Ok(TtlUnit::Seconds),
            "m" | "min" | "mins" | "minutes" => Ok(TtlUnit::Minutes),
            other => Err(format!("unknown TTL unit: {}", other)),
        }
    }
}

/// Longest accepted expiry: 100 years. Larger values are rejected rather
/// than handed to a backend that would overflow on them.
pub const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Store configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreConfig {
    pub ttl_unit: TtlUnit,
    pub keys: KeyNormalizer,
}

impl StoreConfig {
    pub fn with_ttl_unit(mut self, unit: TtlUnit) -> Self {
        self.ttl_unit = unit;
        self
    }

    pub fn with_keys(mut self, keys: KeyNormalizer) -> Self {
        self.keys = keys;
        self
    }

    /// Validate a caller TTL; `0` means no expiry. Negative values and
    /// values past [`MAX_TTL_SECS`] are rejected.
    pub fn ttl(&self, ttl: i64) -> Result<Option<Duration>> {
        if ttl == 0 {
            return Ok(None);
        }
        u64::try_from(ttl)
            .ok()
            .and_then(|n| n.checked_mul(self.ttl_unit.seconds()))
            .filter(|secs| *secs <= MAX_TTL_SECS)
            .map(|secs| Some(Duration::from_secs(secs)))
            .ok_or(StoreError::InvalidTtl(ttl))
    }
}

/// Anything a store operation accepts as a key: a raw JSON key expression,
/// or a key already resolved through [`TypedStore::key`].
pub trait StoreKey: Send + Sync {
    fn resolve(&self, keys: &KeyNormalizer) -> Result<String>;
}

impl StoreKey for Value {
    fn resolve(&self, keys: &KeyNormalizer) -> Result<String> {
        if matches!(self, Value::String(s) if s.is_empty()) {
            return Err(StoreError::EmptyKeyOrValue("key is empty".to_string()));
        }
        keys.normalize(self)
    }
}

impl StoreKey for CanonicalKey {
    fn resolve(&self, _keys: &KeyNormalizer) -> Result<String> {
        Ok(self.as_str().to_string())
    }
}

/// Typed collection operations over a [`Backend`]
pub struct TypedStore<B: ?Sized = dyn Backend> {
    backend: Arc<B>,
    config: StoreConfig,
}

impl<B: ?Sized> Clone for TypedStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            config: self.config,
        }
    }
}

impl<B: Backend + ?Sized> TypedStore<B> {
    pub fn new(backend: Arc<B>, config: StoreConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Canonical backend key for a raw key
    pub fn key(&self, raw: &Value) -> Result<CanonicalKey> {
        raw.resolve(&self.config.keys).map(CanonicalKey::from_normalized)
    }

    /// Canonical backend key for a string key
    pub fn key_str(&self, raw: &str) -> Result<CanonicalKey> {
        self.key(&Value::String(raw.to_string()))
    }

    /// Canonical backend key for a key given as text, read as described on
    /// [`KeyNormalizer::read_text`]
    pub fn key_text(&self, raw: &str) -> Result<CanonicalKey> {
        match self.config.keys.read_text(raw) {
            TextKey::Raw(value) => self.key(&value),
            TextKey::Canonical(key) => Ok(CanonicalKey::from_normalized(key)),
        }
    }

    pub async fn set_string<K: StoreKey + ?Sized>(
        &self,
        key: &K,
        value: &str,
        ttl: i64,
    ) -> Result<String> {
        let key = key.resolve(&self.config.keys)?;
        if value.is_empty() {
            return Err(StoreError::EmptyKeyOrValue(format!("value for {} is empty", key)));
        }
        let ttl = self.config.ttl(ttl)?;

        debug!(key = %key, ttl = ?ttl, "set_string");
        self.backend.set(&key, value, ttl).await
    }

    pub async fn get_string<K: StoreKey + ?Sized>(&self, key: &K) -> Result<String> {
        let key = key.resolve(&self.config.keys)?;
        self.backend.get(&key).await
    }

    /// Write all fields, then set the expiry if `ttl != 0`. A failed expiry
    /// after a successful write gives `PartialWrite`.
    pub async fn set_hash<K: StoreKey + ?Sized>(
        &self,
        key: &K,
        fields: &Map<String, Value>,
        ttl: i64,
    ) -> Result<()> {
        let key = key.resolve(&self.config.keys)?;
        if fields.is_empty() {
            return Err(StoreError::EmptyKeyOrValue(format!("no fields for {}", key)));
        }
        let ttl = self.config.ttl(ttl)?;
        let fields = field_pairs(fields);

        debug!(key = %key, fields = fields.len(), ttl = ?ttl, "set_hash");
        let build = |tx: &mut Transaction| -> Result<()> {
            tx.hmset(fields.clone());
            Ok(())
        };
        self.write_then_expire(&key, &build, ttl).await
    }

    pub async fn get_hash<K: StoreKey + ?Sized>(
        &self,
        key: &K,
    ) -> Result<BTreeMap<String, String>> {
        let key = key.resolve(&self.config.keys)?;
        let fields = self.backend.hgetall(&key).await?;
        if fields.is_empty() {
            return Err(StoreError::NotFound(key));
        }
        Ok(fields.into_iter().collect())
    }

    /// Encode every element, append them all, then set the expiry if
    /// `ttl != 0`. Nothing is written if any element fails to encode.
    pub async fn set_list<K: StoreKey + ?Sized>(
        &self,
        key: &K,
        values: &[StoredValue],
        ttl: i64,
    ) -> Result<()> {
        let key = key.resolve(&self.config.keys)?;
        if values.is_empty() {
            return Err(StoreError::EmptyKeyOrValue(format!("no elements for {}", key)));
        }
        let ttl = self.config.ttl(ttl)?;
        let encoded = codec::encode_list(values)?;

        debug!(key = %key, elements = encoded.len(), ttl = ?ttl, "set_list");
        let build = |tx: &mut Transaction| -> Result<()> {
            tx.rpush(encoded.clone());
            Ok(())
        };
        self.write_then_expire(&key, &build, ttl).await
    }

    /// Whole list, decoded. One corrupt element fails the read.
    pub async fn get_list<K: StoreKey + ?Sized>(&self, key: &K) -> Result<Vec<StoredValue>> {
        let key = key.resolve(&self.config.keys)?;
        let raw = self.backend.lrange(&key, 0, -1).await?;
        if raw.is_empty() {
            return Err(StoreError::NotFound(key));
        }
        codec::decode_list(&raw)
    }

    pub async fn hget<K: StoreKey + ?Sized>(&self, key: &K, field: &str) -> Result<String> {
        let key = key.resolve(&self.config.keys)?;
        if field.is_empty() {
            return Err(StoreError::EmptyKeyOrValue(format!("field for {} is empty", key)));
        }
        self.backend.hget(&key, field).await
    }

    /// Returns the number of newly created fields
    pub async fn hset<K: StoreKey + ?Sized>(
        &self,
        key: &K,
        fields: &Map<String, Value>,
    ) -> Result<i64> {
        let key = key.resolve(&self.config.keys)?;
        if fields.is_empty() {
            return Err(StoreError::EmptyKeyOrValue(format!("no fields for {}", key)));
        }
        self.backend.hset(&key, &field_pairs(fields)).await
    }

    pub async fn lrange<K: StoreKey + ?Sized>(
        &self,
        key: &K,
        start: i64,
        stop: i64,
    ) -> Result<Vec<StoredValue>> {
        let key = key.resolve(&self.config.keys)?;
        let raw = self.backend.lrange(&key, start, stop).await?;
        codec::decode_list(&raw)
    }

    /// Replace one list element; range errors come back from the backend
    pub async fn lset<K: StoreKey + ?Sized>(
        &self,
        key: &K,
        index: i64,
        value: &StoredValue,
    ) -> Result<String> {
        let key = key.resolve(&self.config.keys)?;
        let encoded = codec::encode_wire(value)?;
        self.backend.lset(&key, index, &encoded).await
    }

    pub async fn delete_key<K: StoreKey + ?Sized>(&self, key: &K) -> Result<i64> {
        let key = key.resolve(&self.config.keys)?;
        self.backend.del(&key).await
    }

    /// Keys matching a glob pattern, sorted
    pub async fn list_keys(&self, pattern: &str) -> Result<BTreeSet<String>> {
        if pattern.is_empty() {
            return Err(StoreError::EmptyKeyOrValue("pattern is empty".to_string()));
        }
        let keys = self.backend.keys(pattern).await?;
        Ok(keys.into_iter().collect())
    }

    pub async fn save(&self) -> Result<()> {
        self.backend.save().await
    }

    pub async fn ping(&self) -> Result<()> {
        self.backend.ping().await
    }

    /// Run the watched value write, then the expiry as its own command.
    /// Redis fails a whole `EXEC` reply when any queued command errors, so
    /// the expiry is kept out of the transaction to tell the two apart.
    async fn write_then_expire(
        &self,
        key: &str,
        build: &TxBuilder<'_>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let outcome = self.backend.watch(key, build).await?;
        outcome.into_iter().collect::<Result<()>>()?;

        let Some(ttl) = ttl else {
            return Ok(());
        };
        match self.backend.expire(key, ttl).await {
            Ok(_) => Ok(()),
            Err(err) => Err(partial_write(key, err)),
        }
    }
}

/// Hash field values as stored: strings verbatim, other JSON as text
fn field_pairs(fields: &Map<String, Value>) -> Vec<(String, String)> {
    fields
        .iter()
        .map(|(name, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (name.clone(), text)
        })
        .collect()
}

/// The value is in place but its expiry is not
fn partial_write(key: &str, err: StoreError) -> StoreError {
    warn!(key = %key, error = %err, "Value written but expiry failed");
    StoreError::PartialWrite {
        key: key.to_string(),
        reason: err.to_string(),
    }
}

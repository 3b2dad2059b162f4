//! Backend implementations
//!
//! Provides the trait the typed store runs on, plus a Redis implementation
//! and an in-memory one for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::Result;

pub mod memory;
pub mod redis;

pub use memory::MemoryBackend;
pub use self::redis::{RedisBackend, RedisBackendConfig};

/// A write queued inside a watched transaction
#[derive(Debug, Clone, PartialEq)]
pub enum TxCommand {
    HMSet(Vec<(String, String)>),
    RPush(Vec<String>),
}

impl TxCommand {
    pub fn name(&self) -> &'static str {
        match self {
            TxCommand::HMSet(_) => "HMSET",
            TxCommand::RPush(_) => "RPUSH",
        }
    }
}

/// Write buffer filled by a watched closure and executed as one
/// `MULTI ... EXEC` block against the watched key
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    commands: Vec<TxCommand>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hmset(&mut self, fields: Vec<(String, String)>) -> &mut Self {
        self.commands.push(TxCommand::HMSet(fields));
        self
    }

    pub fn rpush(&mut self, elements: Vec<String>) -> &mut Self {
        self.commands.push(TxCommand::RPush(elements));
        self
    }

    pub fn commands(&self) -> &[TxCommand] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }
}

/// Per-command outcomes of an executed transaction, in queue order.
/// A failed command does not undo the ones before it. Backends that cannot
/// tell which command failed report the error on every entry.
pub type TxOutcome = Vec<Result<()>>;

/// Closure run under a watch; re-run from scratch on conflict
pub type TxBuilder<'a> = dyn Fn(&mut Transaction) -> Result<()> + Send + Sync + 'a;

/// Primitive operations of a Redis-compatible key-value engine.
///
/// Absent keys surface as [`StoreError::NotFound`](crate::StoreError::NotFound),
/// transport failures as `BackendUnavailable`, and commands the engine
/// rejects as `Backend`.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<String>;

    /// Set a string, with an expiry when `ttl` is given
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<String>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn hmset(&self, key: &str, fields: &[(String, String)]) -> Result<()>;

    async fn hget(&self, key: &str, field: &str) -> Result<String>;

    /// Returns the number of fields that were newly created
    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<i64>;

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    /// Returns the list length after the push
    async fn rpush(&self, key: &str, elements: &[String]) -> Result<i64>;

    async fn lset(&self, key: &str, index: i64, value: &str) -> Result<String>;

    /// Glob-style key listing (`*`, `?`, `[...]`)
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    async fn del(&self, key: &str) -> Result<i64>;

    /// Returns false if the key does not exist
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Persist a snapshot of the dataset
    async fn save(&self) -> Result<()>;

    async fn ping(&self) -> Result<()>;

    /// Optimistic transaction on `key`: run `build` to queue writes and
    /// execute them, re-running `build` if `key` changes before execution.
    /// Gives up with `Conflict` once the retry bound is reached.
    async fn watch(&self, key: &str, build: &TxBuilder<'_>) -> Result<TxOutcome>;
}

//! Redis backend implementation
//!
//! Provides a Redis-compatible backend with connection pooling, an optional
//! per-command deadline, and WATCH/MULTI/EXEC optimistic transactions.

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Connection, Pool, Runtime};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Backend, Transaction, TxBuilder, TxCommand, TxOutcome};
use crate::error::{Result, StoreError};

/// Redis backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisBackendConfig {
    /// Redis URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Connection pool size
    pub pool_size: usize,
    /// Deadline applied to every round trip (None = wait indefinitely)
    pub command_timeout: Option<Duration>,
    /// How many times a watched transaction is re-run after a conflict
    pub max_watch_retries: usize,
}

impl Default for RedisBackendConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 10,
            command_timeout: None,
            max_watch_retries: 3,
        }
    }
}

/// Redis backend
///
/// Uses deadpool-redis for async connection pooling. Cloning shares the pool.
#[derive(Clone)]
pub struct RedisBackend {
    config: RedisBackendConfig,
    pool: Pool,
}

impl RedisBackend {
    /// Create a new Redis backend and verify the server answers
    pub async fn new(config: RedisBackendConfig) -> Result<Self> {
        debug!(
            "Creating Redis backend: url={}, pool_size={}",
            config.url, config.pool_size
        );

        let pool_config = PoolConfig::from_url(&config.url);
        let pool = pool_config
            .builder()
            .map_err(|e| {
                StoreError::BackendUnavailable(format!("Failed to create pool builder: {}", e))
            })?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StoreError::BackendUnavailable(format!("Failed to create pool: {}", e)))?;

        let backend = Self { config, pool };
        backend.ping().await?;

        debug!("Redis backend initialized successfully");
        Ok(backend)
    }

    pub fn config(&self) -> &RedisBackendConfig {
        &self.config
    }

    /// Run one backend round trip under the configured deadline
    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        match self.config.command_timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                StoreError::BackendUnavailable(format!("{} timed out after {:?}", op, limit))
            })?,
            None => fut.await,
        }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<Connection> {
        self.bounded("connect", async { Ok(self.pool.get().await?) })
            .await
    }

    fn queue(pipe: &mut redis::Pipeline, key: &str, command: &TxCommand) {
        match command {
            TxCommand::HMSet(fields) => {
                pipe.hset_multiple(key, fields.as_slice());
            }
            TxCommand::RPush(elements) => {
                pipe.rpush(key, elements.as_slice());
            }
        }
    }
}

/// Redis EXPIRE takes whole seconds; sub-second TTLs round up to one.
/// Saturates at `i64::MAX`, which the server rejects instead of wrapping
/// to a negative TTL that would delete the key.
fn ttl_seconds(ttl: Duration) -> i64 {
    let secs = ttl.as_secs().saturating_add(u64::from(ttl.subsec_nanos() > 0));
    i64::try_from(secs).unwrap_or(i64::MAX).max(1)
}

#[async_trait]
impl Backend for RedisBackend {
    async fn get(&self, key: &str) -> Result<String> {
        debug!("GET {}", key);
        let mut conn = self.get_conn().await?;
        let value: Option<String> = self
            .bounded("GET", async { Ok(conn.get(key).await?) })
            .await?;
        value.ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<String> {
        debug!("SET {} (ttl={:?})", key, ttl);
        let mut conn = self.get_conn().await?;
        self.bounded("SET", async {
            let reply: String = match ttl {
                Some(ttl) => conn.set_ex(key, value, ttl_seconds(ttl) as u64).await?,
                None => conn.set(key, value).await?,
            };
            Ok(reply)
        })
        .await
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        debug!("HGETALL {}", key);
        let mut conn = self.get_conn().await?;
        self.bounded("HGETALL", async { Ok(conn.hgetall(key).await?) })
            .await
    }

    async fn hmset(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        debug!("HMSET {} ({} fields)", key, fields.len());
        let mut conn = self.get_conn().await?;
        self.bounded("HMSET", async {
            let _: () = conn.hset_multiple(key, fields).await?;
            Ok(())
        })
        .await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<String> {
        debug!("HGET {} {}", key, field);
        let mut conn = self.get_conn().await?;
        let value: Option<String> = self
            .bounded("HGET", async { Ok(conn.hget(key, field).await?) })
            .await?;
        value.ok_or_else(|| StoreError::NotFound(format!("{}.{}", key, field)))
    }

    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<i64> {
        debug!("HSET {} ({} fields)", key, fields.len());
        let mut conn = self.get_conn().await?;
        self.bounded("HSET", async {
            let created: i64 = redis::cmd("HSET")
                .arg(key)
                .arg(fields)
                .query_async(&mut *conn)
                .await?;
            Ok(created)
        })
        .await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        debug!("LRANGE {} {} {}", key, start, stop);
        let mut conn = self.get_conn().await?;
        self.bounded("LRANGE", async {
            Ok(conn.lrange(key, start as isize, stop as isize).await?)
        })
        .await
    }

    async fn rpush(&self, key: &str, elements: &[String]) -> Result<i64> {
        debug!("RPUSH {} ({} elements)", key, elements.len());
        let mut conn = self.get_conn().await?;
        self.bounded("RPUSH", async { Ok(conn.rpush(key, elements).await?) })
            .await
    }

    async fn lset(&self, key: &str, index: i64, value: &str) -> Result<String> {
        debug!("LSET {} {}", key, index);
        let mut conn = self.get_conn().await?;
        self.bounded("LSET", async {
            Ok(conn.lset(key, index as isize, value).await?)
        })
        .await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        debug!("KEYS {}", pattern);
        let mut conn = self.get_conn().await?;
        self.bounded("KEYS", async { Ok(conn.keys(pattern).await?) })
            .await
    }

    async fn del(&self, key: &str) -> Result<i64> {
        debug!("DEL {}", key);
        let mut conn = self.get_conn().await?;
        self.bounded("DEL", async { Ok(conn.del(key).await?) }).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        debug!("EXPIRE {} {:?}", key, ttl);
        let mut conn = self.get_conn().await?;
        self.bounded("EXPIRE", async {
            Ok(conn.expire(key, ttl_seconds(ttl)).await?)
        })
        .await
    }

    async fn save(&self) -> Result<()> {
        debug!("SAVE");
        let mut conn = self.get_conn().await?;
        self.bounded("SAVE", async {
            let _: () = redis::cmd("SAVE").query_async(&mut *conn).await?;
            Ok(())
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.get_conn().await?;
        self.bounded("PING", async {
            let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
            Ok(())
        })
        .await
    }

    async fn watch(&self, key: &str, build: &TxBuilder<'_>) -> Result<TxOutcome> {
        // WATCH state lives on the connection, so one pooled connection is
        // held for every attempt
        let mut conn = self.get_conn().await?;

        for attempt in 0..=self.config.max_watch_retries {
            self.bounded("WATCH", async {
                let _: () = redis::cmd("WATCH").arg(key).query_async(&mut *conn).await?;
                Ok(())
            })
            .await?;

            let mut tx = Transaction::new();
            if let Err(err) = build(&mut tx) {
                let _: redis::RedisResult<()> =
                    redis::cmd("UNWATCH").query_async(&mut *conn).await;
                return Err(err);
            }
            if tx.is_empty() {
                let _: () = redis::cmd("UNWATCH").query_async(&mut *conn).await?;
                return Ok(Vec::new());
            }

            let mut pipe = redis::pipe();
            pipe.atomic();
            for command in tx.commands() {
                Self::queue(&mut pipe, key, command);
            }

            // redis-rs fails the whole EXEC reply when any queued command
            // errored, so a failed write surfaces here as Err
            debug!(key = %key, commands = tx.len(), attempt = attempt, "EXEC");
            let replies: Option<Vec<redis::Value>> = self
                .bounded("EXEC", async { Ok(pipe.query_async(&mut *conn).await?) })
                .await?;

            match replies {
                Some(replies) => return Ok(replies.iter().map(|_| Ok(())).collect()),
                None => {
                    warn!(key = %key, attempt, "Watched key changed, retrying transaction");
                }
            }
        }

        Err(StoreError::Conflict(format!(
            "{} changed during {} attempts",
            key,
            self.config.max_watch_retries + 1
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RedisBackendConfig::default();
        assert_eq!(config.url, "redis://127.0.0.1:6379");
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.command_timeout, None);
        assert_eq!(config.max_watch_retries, 3);
    }

    #[test]
    fn test_ttl_seconds() {
        assert_eq!(ttl_seconds(Duration::from_secs(60)), 60);
        assert_eq!(ttl_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(ttl_seconds(Duration::from_millis(10)), 1);
        assert_eq!(ttl_seconds(Duration::from_secs(u64::MAX)), i64::MAX);
        assert_eq!(ttl_seconds(Duration::MAX), i64::MAX);
        assert_eq!(ttl_seconds(Duration::ZERO), 1);
    }

    // Integration tests - require Redis running
    #[tokio::test]
    #[ignore]
    async fn test_set_get_string() {
        let backend = RedisBackend::new(RedisBackendConfig::default()).await.unwrap();

        backend.set("kvgate:test:string", "value", None).await.unwrap();
        assert_eq!(backend.get("kvgate:test:string").await.unwrap(), "value");

        backend.del("kvgate:test:string").await.unwrap();
        assert!(matches!(
            backend.get("kvgate:test:string").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    #[ignore]
    async fn test_watch_executes_queued_writes() {
        let backend = RedisBackend::new(RedisBackendConfig::default()).await.unwrap();
        let key = "kvgate:test:watch";
        backend.del(key).await.unwrap();

        let build = |tx: &mut Transaction| -> Result<()> {
            tx.hmset(vec![("name".to_string(), "Ivan".to_string())]);
            Ok(())
        };
        let outcome = backend.watch(key, &build).await.unwrap();

        assert_eq!(outcome.len(), 1);
        assert!(outcome.iter().all(|r| r.is_ok()));
        assert_eq!(backend.hget(key, "name").await.unwrap(), "Ivan");

        backend.del(key).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_lset_out_of_range() {
        let backend = RedisBackend::new(RedisBackendConfig::default()).await.unwrap();
        let key = "kvgate:test:lset";
        backend.del(key).await.unwrap();
        backend.rpush(key, &["a".to_string()]).await.unwrap();

        let err = backend.lset(key, 5, "x").await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));

        backend.del(key).await.unwrap();
    }
}

//! Command line and environment configuration

use clap::{Parser, ValueEnum};
use kvgate_store::{KeyNormalizer, RedisBackendConfig, StoreConfig, TtlUnit};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// Which backend the server talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Remote Redis-compatible engine
    Redis,
    /// Process-local store, lost on exit
    Memory,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "kvgate-server")]
#[command(about = "HTTP front end for typed string, hash and list collections")]
pub struct Args {
    /// Address to bind to
    #[arg(short, long, env = "SERVER_ADDR", default_value = "127.0.0.1:3000")]
    pub bind: SocketAddr,

    /// Storage backend
    #[arg(long, env = "KVGATE_BACKEND", value_enum, default_value_t = BackendKind::Redis)]
    pub backend: BackendKind,

    /// Redis connection URL
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Maximum pooled Redis connections
    #[arg(long, env = "REDIS_POOL_SIZE", default_value = "10")]
    pub pool_size: usize,

    /// Per-command deadline in milliseconds (0 disables it)
    #[arg(long, env = "REDIS_COMMAND_TIMEOUT_MS", default_value = "0")]
    pub command_timeout_ms: u64,

    /// Retries of a watched transaction before reporting a conflict
    #[arg(long, default_value = "3")]
    pub max_watch_retries: usize,

    /// Unit of the `ttl` request field (seconds, minutes)
    #[arg(long, env = "TTL_UNIT", default_value = "minutes")]
    pub ttl_unit: TtlUnit,

    /// Prefix keys with their source type so `42` and `"42"` differ
    #[arg(long, default_value = "false")]
    pub tag_keys: bool,

    /// Store booleans and nulls as their JSON text instead of rejecting them
    #[arg(long, default_value = "false")]
    pub lenient_values: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: Level,
}

impl Args {
    pub fn redis_config(&self) -> RedisBackendConfig {
        RedisBackendConfig {
            url: self.redis_url.clone(),
            pool_size: self.pool_size,
            command_timeout: match self.command_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            max_watch_retries: self.max_watch_retries,
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        let keys = if self.tag_keys {
            KeyNormalizer::tagged()
        } else {
            KeyNormalizer::new()
        };
        StoreConfig::default()
            .with_ttl_unit(self.ttl_unit)
            .with_keys(keys)
    }
}

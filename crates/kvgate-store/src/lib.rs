//! kvgate-store: typed collections over a Redis-compatible backend
//!
//! Translates dynamically-typed keys and values into the string-only storage
//! model of the backend:
//!
//! - [`KeyNormalizer`] turns JSON keys into one canonical key string
//! - [`codec`] tags list elements with their type (`{"Dtype":..,"Data":..}`)
//! - [`TypedStore`] runs collection writes under an optimistic watch on the
//!   key, then sets their expiry
//!
//! Backends implement the [`Backend`] port: [`RedisBackend`] for production,
//! [`MemoryBackend`] for tests and local runs.

pub mod backend;
pub mod codec;
pub mod error;
pub mod key;
pub mod store;
pub mod value;

// Re-exports
pub use backend::{
    Backend, MemoryBackend, RedisBackend, RedisBackendConfig, Transaction, TxCommand, TxOutcome,
};
pub use codec::{Dtype, ListElement};
pub use error::{ErrorKind, Result, StoreError};
pub use key::{CanonicalKey, KeyNormalizer, TextKey};
pub use store::{StoreConfig, StoreKey, TtlUnit, TypedStore, MAX_TTL_SECS};
pub use value::StoredValue;

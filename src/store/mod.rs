//! Shared-state storage for the gateway
//!
//! Every piece of cross-instance state (tenant configuration, usage
//! counters, rate-limit windows, cache hints) lives behind the
//! [`SharedStore`] trait so that a different backing store can be swapped
//! in without touching dispatch logic. Each operation is independently
//! atomic; no multi-key transactions are assumed.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub mod in_memory;
pub mod redis;

pub use in_memory::InMemoryStore;
pub use redis::RedisStore;

/// Errors raised by a store backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("store connection error: {0}")]
    Connection(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of an atomic fixed-window acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The window had capacity; one point was consumed.
    Acquired,
    /// The window is exhausted for another `remaining_ms` milliseconds.
    Exhausted { remaining_ms: u64 },
}

/// Atomic primitives shared by all gateway instances
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Read all fields of a hash. An absent key yields an empty map.
    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Replace the fields of a hash and bound its lifetime to `ttl`.
    async fn hash_set_all(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> StoreResult<()>;

    /// Atomically add `delta` to an integer hash field, creating the hash
    /// and field as needed. Returns the new value.
    async fn hash_increment(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64>;

    /// Atomically consume the single point of a fixed window that refills
    /// after `window`. Concurrent callers across processes observe a single
    /// shared counter.
    async fn acquire_window(&self, key: &str, window: Duration) -> StoreResult<AcquireOutcome>;

    /// Set a boolean flag key with a lifetime of `ttl`, only if it is not
    /// already set. Returns whether this call set it.
    async fn set_flag_if_absent(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Remove a key of any kind. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

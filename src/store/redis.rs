//! Redis-backed [`SharedStore`]
//!
//! Uses a [`ConnectionManager`] so that every request handler can hold a
//! cheap clone of the connection and reconnection is handled transparently.

use crate::store::{AcquireOutcome, SharedStore, StoreError, StoreResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}

/// Shared store backed by a Redis server
///
/// Supports both `redis://` and `rediss://` URLs.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        Ok(conn.hgetall(key).await?)
    }

    async fn hash_set_all(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let () = conn.hset_multiple(key, fields).await?;
        let _: bool = conn.expire(key, ttl.as_secs() as i64).await?;
        Ok(())
    }

    async fn hash_increment(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.hincr(key, field, delta).await?)
    }

    async fn acquire_window(&self, key: &str, window: Duration) -> StoreResult<AcquireOutcome> {
        let mut conn = self.conn.clone();
        // SET NX PX is the atomic consume: whoever creates the key owns the
        // window's single point until it expires.
        let acquired: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(window.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        if acquired.is_some() {
            return Ok(AcquireOutcome::Acquired);
        }

        let remaining: i64 = conn.pttl(key).await?;
        // The key may expire between SET and PTTL; report the minimum
        // positive wait rather than admitting out of band.
        Ok(AcquireOutcome::Exhausted {
            remaining_ms: remaining.max(1) as u64,
        })
    }

    async fn set_flag_if_absent(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let set: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(set.is_some())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }
}

//! In-process [`SharedStore`]
//!
//! Single-node stand-in for the Redis backend. Expiry is checked lazily on
//! access; the same atomicity guarantees hold within one process because
//! every operation runs under the store mutex.

use crate::store::{AcquireOutcome, SharedStore, StoreResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

enum Slot {
    Hash(HashMap<String, String>),
    Flag,
    Window,
}

struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Shared store held entirely in process memory
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_live_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> T {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| !entry.is_expired(now));
        f(&mut entries)
    }
}

#[async_trait]
impl SharedStore for InMemoryStore {
    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        Ok(self.with_live_entries(|entries| match entries.get(key) {
            Some(Entry {
                slot: Slot::Hash(fields),
                ..
            }) => fields.clone(),
            _ => HashMap::new(),
        }))
    }

    async fn hash_set_all(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> StoreResult<()> {
        self.with_live_entries(|entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    slot: Slot::Hash(fields.iter().cloned().collect()),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
        });
        Ok(())
    }

    async fn hash_increment(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        Ok(self.with_live_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                slot: Slot::Hash(HashMap::new()),
                expires_at: None,
            });
            if !matches!(entry.slot, Slot::Hash(_)) {
                // Mirror the backend behavior of clobbering a non-hash key.
                entry.slot = Slot::Hash(HashMap::new());
            }
            let Slot::Hash(fields) = &mut entry.slot else {
                return delta;
            };
            let current = fields
                .get(field)
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0);
            let next = current + delta;
            fields.insert(field.to_string(), next.to_string());
            next
        }))
    }

    async fn acquire_window(&self, key: &str, window: Duration) -> StoreResult<AcquireOutcome> {
        Ok(self.with_live_entries(|entries| {
            let now = Instant::now();
            if let Some(entry) = entries.get(key) {
                let remaining = entry
                    .expires_at
                    .map(|at| at.saturating_duration_since(now).as_millis() as u64)
                    .unwrap_or(0);
                return AcquireOutcome::Exhausted {
                    remaining_ms: remaining.max(1),
                };
            }
            entries.insert(
                key.to_string(),
                Entry {
                    slot: Slot::Window,
                    expires_at: Some(now + window),
                },
            );
            AcquireOutcome::Acquired
        }))
    }

    async fn set_flag_if_absent(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        Ok(self.with_live_entries(|entries| {
            if entries.contains_key(key) {
                return false;
            }
            entries.insert(
                key.to_string(),
                Entry {
                    slot: Slot::Flag,
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            true
        }))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.with_live_entries(|entries| {
            entries.remove(key);
        });
        Ok(())
    }
}

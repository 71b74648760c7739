//! Distributed rate-limit gate
//!
//! Admission is a fixed window of capacity one, keyed by tenant and client
//! and shared across every gateway instance through the store's atomic
//! window primitive. On rejection the gate raises a per-tenant cache hint
//! so downstream caches can serve the rejection for the remainder of the
//! window without consulting the gate again.
//!
//! The tenant's configured `rate_frequency` is deliberately not consulted
//! here; the window admits a single request regardless.

use crate::gateway::headers::keys;
use crate::gateway::types::{GatewayError, RateDecision, TenantConfig, TenantId};
use crate::store::{AcquireOutcome, SharedStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-request admission gate over the shared window store
pub struct RateLimitGate {
    store: Arc<dyn SharedStore>,
}

impl RateLimitGate {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Consume one point from the client's window under the tenant's
    /// namespace. A rejection carries the seconds until the window refills
    /// and raises the tenant's cache hint when it is not already set.
    pub async fn admit(
        &self,
        tenant_id: &TenantId,
        client_key: &str,
        config: &TenantConfig,
    ) -> Result<RateDecision, GatewayError> {
        let window = Duration::from_secs(config.rate_period_seconds.max(1));
        let key = keys::rate_limit_window(tenant_id, client_key);

        match self.store.acquire_window(&key, window).await? {
            AcquireOutcome::Acquired => Ok(RateDecision::admitted()),
            AcquireOutcome::Exhausted { remaining_ms } => {
                let retry_after_seconds = remaining_ms.div_ceil(1000);
                self.raise_hint(tenant_id, config, retry_after_seconds).await;
                Ok(RateDecision::rejected(retry_after_seconds))
            }
        }
    }

    /// Drop the tenant's cache hint after an admitted request so downstream
    /// caches stop serving the stored rejection.
    pub async fn clear_hint(&self, tenant_id: &TenantId) {
        if let Err(err) = self.store.delete(&keys::rate_limit_hint(tenant_id)).await {
            warn!(tenant_id = %tenant_id, error = %err, "rate-limit hint clear failed");
        }
    }

    async fn raise_hint(&self, tenant_id: &TenantId, config: &TenantConfig, retry_after: u64) {
        let ttl = if config.rate_limited_response_cache_seconds > 0 {
            config.rate_limited_response_cache_seconds
        } else {
            retry_after
        };

        match self
            .store
            .set_flag_if_absent(
                &keys::rate_limit_hint(tenant_id),
                Duration::from_secs(ttl.max(1)),
            )
            .await
        {
            Ok(true) => debug!(tenant_id = %tenant_id, ttl, "rate-limit cache hint set"),
            Ok(false) => {} // already hinted for this window
            Err(err) => {
                // The rejection still stands; only the CDN optimization is lost.
                warn!(tenant_id = %tenant_id, error = %err, "rate-limit hint write failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::collections::HashMap;

    fn tenant(id: &str) -> TenantId {
        TenantId::try_new(id.to_string()).unwrap()
    }

    fn config(period: u64, duration: u64) -> TenantConfig {
        let record: HashMap<String, String> = [
            ("host".to_string(), "origin.example.com".to_string()),
            ("period".to_string(), period.to_string()),
            ("duration".to_string(), duration.to_string()),
        ]
        .into_iter()
        .collect();
        TenantConfig::from_fields(&record).unwrap()
    }

    #[tokio::test]
    async fn admits_once_per_window_per_client() {
        let store: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
        let gate = RateLimitGate::new(store);
        let acme = tenant("acme");
        let config = config(2, 0);

        let first = gate.admit(&acme, "10.0.0.1", &config).await.unwrap();
        assert!(first.admitted);

        let second = gate.admit(&acme, "10.0.0.1", &config).await.unwrap();
        assert!(!second.admitted);
        let retry = second.retry_after_seconds.unwrap();
        assert!((1..=2).contains(&retry));

        // A different client key has its own window.
        let other = gate.admit(&acme, "10.0.0.2", &config).await.unwrap();
        assert!(other.admitted);
    }

    #[tokio::test]
    async fn window_refills_after_the_period() {
        let store: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
        let acme = tenant("acme");

        // Sub-second window via the store directly: admit uses whole
        // seconds, so drive the refill check at the store level.
        let key = keys::rate_limit_window(&acme, "10.0.0.1");
        assert_eq!(
            store
                .acquire_window(&key, Duration::from_millis(50))
                .await
                .unwrap(),
            AcquireOutcome::Acquired
        );
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(
            store
                .acquire_window(&key, Duration::from_millis(50))
                .await
                .unwrap(),
            AcquireOutcome::Acquired
        );
    }

    #[tokio::test]
    async fn rejection_raises_the_hint_once() {
        let store: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
        let gate = RateLimitGate::new(store.clone());
        let acme = tenant("acme");
        let config = config(60, 30);

        gate.admit(&acme, "c", &config).await.unwrap();
        assert!(!gate.admit(&acme, "c", &config).await.unwrap().admitted);

        let hint = keys::rate_limit_hint(&acme);
        // Hint is now present; a further rejection leaves it untouched.
        assert!(!store
            .set_flag_if_absent(&hint, Duration::from_secs(1))
            .await
            .unwrap());
        assert!(!gate.admit(&acme, "c", &config).await.unwrap().admitted);
    }

    #[tokio::test]
    async fn clear_hint_removes_the_flag() {
        let store: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
        let gate = RateLimitGate::new(store.clone());
        let acme = tenant("acme");
        let config = config(60, 0);

        gate.admit(&acme, "c", &config).await.unwrap();
        gate.admit(&acme, "c", &config).await.unwrap();
        gate.clear_hint(&acme).await;

        // The flag can be set again only because the clear removed it.
        assert!(store
            .set_flag_if_absent(&keys::rate_limit_hint(&acme), Duration::from_secs(1))
            .await
            .unwrap());
    }
}

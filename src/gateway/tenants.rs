//! Tenant configuration resolution, caching, and usage tracking
//!
//! The shared cache fronts the authoritative control plane: a resolve hits
//! the cache first, falls back to an authenticated `gateway/rules/<id>`
//! lookup, and writes the result back with a bounded TTL. The control
//! plane is never retried; a failed lookup surfaces as an unknown tenant,
//! never as a defaulted configuration.

use crate::gateway::types::{
    GatewayError, TenantConfig, TenantId, TenantRecordError, USAGE_COUNT_FIELD,
};
use crate::store::SharedStore;
use bytes::Bytes;
use http::header::AUTHORIZATION;
use http::{Method, Request, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Reply shape of the control plane's rules endpoint
#[derive(Debug, Deserialize)]
struct ControlPlaneReply {
    result: Option<HashMap<String, String>>,
}

/// Authenticated client for the control plane's tenant lookup
#[derive(Clone)]
pub struct ControlPlaneClient {
    base_url: String,
    api_token: String,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl ControlPlaneClient {
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        let client = Client::builder(hyper_util::rt::TokioExecutor::new()).build_http();
        Self {
            base_url: base_url.into(),
            api_token: api_token.into(),
            client,
        }
    }

    /// Fetch one tenant's raw configuration record. Any transport, status,
    /// or parse failure is a lookup miss.
    async fn fetch(&self, tenant_id: &TenantId) -> Option<HashMap<String, String>> {
        let uri: Uri = format!(
            "{}/gateway/rules/{}",
            self.base_url.trim_end_matches('/'),
            tenant_id.as_ref()
        )
        .parse()
        .ok()?;

        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_token))
            .body(Full::new(Bytes::new()))
            .ok()?;

        let response = match self.client.request(request).await {
            Ok(response) => response,
            Err(err) => {
                warn!(tenant_id = %tenant_id, error = %err, "control plane request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            debug!(
                tenant_id = %tenant_id,
                status = response.status().as_u16(),
                "control plane returned no configuration"
            );
            return None;
        }

        let body = response.into_body().collect().await.ok()?.to_bytes();
        let reply: ControlPlaneReply = match serde_json::from_slice(&body) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(tenant_id = %tenant_id, error = %err, "control plane reply was not parseable");
                return None;
            }
        };

        reply.result.filter(|fields| !fields.is_empty())
    }
}

/// Resolves tenant identifiers to configurations and tracks usage
pub struct TenantConfigStore {
    store: Arc<dyn SharedStore>,
    control_plane: ControlPlaneClient,
    config_ttl: Duration,
    usage_ceiling: u64,
}

impl TenantConfigStore {
    pub fn new(
        store: Arc<dyn SharedStore>,
        control_plane: ControlPlaneClient,
        config_ttl: Duration,
        usage_ceiling: u64,
    ) -> Self {
        Self {
            store,
            control_plane,
            config_ttl,
            usage_ceiling,
        }
    }

    /// Resolve a tenant identifier to its configuration.
    ///
    /// `Ok(None)` means the tenant is unknown after the control-plane
    /// fallback. A cached record with no origin host is treated as a miss
    /// and refetched; any other malformed record is an internal error, as
    /// the cache held data we wrote and can no longer interpret.
    pub async fn resolve(&self, tenant_id: &TenantId) -> Result<Option<TenantConfig>, GatewayError> {
        let cached = self.store.hash_get_all(tenant_id.as_ref()).await?;
        if !cached.is_empty() {
            match TenantConfig::from_fields(&cached) {
                Ok(config) => return Ok(Some(config)),
                // A usage increment that lands after the record expired
                // recreates the hash with nothing but the counter. Treat
                // the partial record as a miss and refetch.
                Err(TenantRecordError::MissingOriginHost) => {
                    debug!(tenant_id = %tenant_id, "partial cached record; refetching");
                }
                Err(err) => {
                    return Err(GatewayError::Internal(format!(
                        "malformed cached tenant record: {err}"
                    )));
                }
            }
        }

        let Some(fields) = self.control_plane.fetch(tenant_id).await else {
            return Ok(None);
        };

        let config = match TenantConfig::from_fields(&fields) {
            Ok(config) => config,
            Err(err) => {
                warn!(tenant_id = %tenant_id, error = %err, "control plane sent an invalid record");
                return Ok(None);
            }
        };

        if let Err(err) = self
            .store
            .hash_set_all(tenant_id.as_ref(), &config.to_fields(), self.config_ttl)
            .await
        {
            // Serving from the fetched copy still works; only the cache is stale.
            warn!(tenant_id = %tenant_id, error = %err, "tenant config cache write failed");
        }

        Ok(Some(config))
    }

    /// Atomically bump the tenant's usage counter. Failures are logged and
    /// never fail the request.
    pub async fn increment_usage(&self, tenant_id: &TenantId) {
        if let Err(err) = self
            .store
            .hash_increment(tenant_id.as_ref(), USAGE_COUNT_FIELD, 1)
            .await
        {
            warn!(tenant_id = %tenant_id, error = %err, "usage increment failed");
        }
    }

    /// Whether the tenant is still inside its plan ceiling. The boundary is
    /// inclusive: a count equal to the ceiling still admits.
    pub fn check_usage_quota(&self, config: &TenantConfig) -> bool {
        config.usage_count <= self.usage_ceiling
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::types::FilterMode;
    use crate::store::InMemoryStore;

    fn tenant(id: &str) -> TenantId {
        TenantId::try_new(id.to_string()).unwrap()
    }

    fn store_with_control_plane(server_url: &str, store: Arc<dyn SharedStore>) -> TenantConfigStore {
        TenantConfigStore::new(
            store,
            ControlPlaneClient::new(server_url, "test-token"),
            Duration::from_secs(3600),
            100,
        )
    }

    #[tokio::test]
    async fn resolves_from_the_control_plane_and_caches() {
        let mut server = mockito::Server::new_async().await;
        let lookup = server
            .mock("GET", "/gateway/rules/acme")
            .match_header("authorization", "Bearer test-token")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "result": {
                        "host": "origin.acme.dev",
                        "protocol": "https",
                        "period": "30",
                        "frequency": "5",
                        "duration": "60",
                        "filter": "all",
                        "usage_count": "7"
                    }
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let shared: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
        let tenants = store_with_control_plane(&server.url(), shared.clone());

        let config = tenants.resolve(&tenant("acme")).await.unwrap().unwrap();
        assert_eq!(config.origin_host, "origin.acme.dev");
        assert_eq!(config.filter_mode, FilterMode::All);
        assert_eq!(config.usage_count, 7);

        // Second resolve is served from the cache; the mock expects one hit.
        let again = tenants.resolve(&tenant("acme")).await.unwrap().unwrap();
        assert_eq!(again.origin_host, "origin.acme.dev");
        lookup.assert_async().await;

        let cached = shared.hash_get_all("acme").await.unwrap();
        assert_eq!(cached.get("host").map(String::as_str), Some("origin.acme.dev"));
    }

    #[tokio::test]
    async fn unknown_tenant_resolves_to_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/gateway/rules/ghost")
            .with_status(404)
            .create_async()
            .await;

        let shared: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
        let tenants = store_with_control_plane(&server.url(), shared.clone());

        assert!(tenants.resolve(&tenant("ghost")).await.unwrap().is_none());
        // The failed lookup must not leave anything behind in the cache.
        assert!(shared.hash_get_all("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_result_is_a_lookup_miss() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/gateway/rules/blank")
            .with_status(200)
            .with_body(r#"{"result": {}}"#)
            .create_async()
            .await;

        let shared: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
        let tenants = store_with_control_plane(&server.url(), shared);

        assert!(tenants.resolve(&tenant("blank")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unparseable_reply_is_a_lookup_miss() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/gateway/rules/garbled")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let shared: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
        let tenants = store_with_control_plane(&server.url(), shared);

        assert!(tenants.resolve(&tenant("garbled")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn orphaned_usage_counter_does_not_poison_the_tenant() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/gateway/rules/acme")
            .with_status(200)
            .with_body(r#"{"result": {"host": "origin.acme.dev"}}"#)
            .create_async()
            .await;

        let shared: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
        let tenants = store_with_control_plane(&server.url(), shared.clone());

        // An increment that lands after the cached record expired leaves a
        // hash holding nothing but the counter.
        tenants.increment_usage(&tenant("acme")).await;

        let config = tenants.resolve(&tenant("acme")).await.unwrap().unwrap();
        assert_eq!(config.origin_host, "origin.acme.dev");

        // The refetch replaced the partial record with a complete one.
        let cached = shared.hash_get_all("acme").await.unwrap();
        assert_eq!(cached.get("host").map(String::as_str), Some("origin.acme.dev"));
    }

    #[tokio::test]
    async fn usage_quota_boundary_is_inclusive() {
        let shared: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
        let tenants = store_with_control_plane("http://127.0.0.1:1", shared);

        let mut config = TenantConfig::from_fields(
            &[("host".to_string(), "origin.acme.dev".to_string())]
                .into_iter()
                .collect(),
        )
        .unwrap();

        config.usage_count = 100;
        assert!(tenants.check_usage_quota(&config));

        config.usage_count = 101;
        assert!(!tenants.check_usage_quota(&config));
    }

    #[tokio::test]
    async fn usage_increment_survives_a_missing_record() {
        let shared: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
        let tenants = store_with_control_plane("http://127.0.0.1:1", shared.clone());

        tenants.increment_usage(&tenant("acme")).await;
        tenants.increment_usage(&tenant("acme")).await;

        let cached = shared.hash_get_all("acme").await.unwrap();
        assert_eq!(cached.get(USAGE_COUNT_FIELD).map(String::as_str), Some("2"));
    }
}

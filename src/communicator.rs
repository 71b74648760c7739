//! Cache-invalidation sidecar
//!
//! Small companion service through which the control plane evicts a
//! tenant's cached configuration when it changes. Authentication is a
//! shared static secret compared for exact equality against the
//! `authorization` header.

use crate::gateway::headers::{paths, AUTHORIZATION};
use crate::store::SharedStore;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared state of the communicator listener
#[derive(Clone)]
pub struct CommunicatorState {
    store: Arc<dyn SharedStore>,
    secret: String,
}

impl CommunicatorState {
    pub fn new(store: Arc<dyn SharedStore>, secret: impl Into<String>) -> Self {
        Self {
            store,
            secret: secret.into(),
        }
    }
}

/// Build the communicator router
pub fn router(state: CommunicatorState) -> Router {
    Router::new()
        .route("/cache/tenants/{id}", delete(evict_tenant))
        .route(paths::HEALTH, get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn evict_tenant(
    State(state): State<CommunicatorState>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let authorized = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .is_some_and(|token| token == state.secret);

    if !authorized {
        warn!(tenant_id = tenant_id, "unauthorized cache eviction attempt");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "success": false, "error": "Unauthorized" })),
        )
            .into_response();
    }

    match state.store.delete(&tenant_id).await {
        Ok(()) => {
            info!(tenant_id = tenant_id, "tenant config cache evicted");
            (
                StatusCode::OK,
                Json(serde_json::json!({ "success": true })),
            )
                .into_response()
        }
        Err(err) => {
            error!(tenant_id = tenant_id, error = %err, "cache eviction failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "success": false,
                    "error": "Error deleting tenant config cache"
                })),
            )
                .into_response()
        }
    }
}

async fn health() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    const SECRET: &str = "communicator-test-secret";

    async fn seeded_state() -> (CommunicatorState, Arc<dyn SharedStore>) {
        let store: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
        store
            .hash_set_all(
                "acme",
                &[("host".to_string(), "origin.acme.dev".to_string())],
                Duration::from_secs(3600),
            )
            .await
            .unwrap();
        (CommunicatorState::new(store.clone(), SECRET), store)
    }

    #[tokio::test]
    async fn evicts_with_the_shared_secret() {
        let (state, store) = seeded_state().await;
        let response = router(state)
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/cache/tenants/acme")
                    .header("authorization", SECRET)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(store.hash_get_all("acme").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_a_wrong_secret() {
        let (state, store) = seeded_state().await;
        let response = router(state)
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/cache/tenants/acme")
                    .header("authorization", "guess")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(!store.hash_get_all("acme").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_a_missing_secret() {
        let (state, _) = seeded_state().await;
        let response = router(state)
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/cache/tenants/acme")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_endpoint_answers() {
        let (state, _) = seeded_state().await;
        let response = router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

//! Request orchestration
//!
//! One request flows through: tenant extraction, configuration resolution,
//! usage-quota check, filter-mode branch (rule evaluation and the
//! rate-limit gate), target URL construction, and the forward to the
//! tenant's origin. There are no retries anywhere on this path; any
//! failure fails the single in-flight request.

use crate::gateway::edge::EdgeUrlCodec;
use crate::gateway::headers::{
    GATEWAY_HEADER, GATEWAY_HEADER_VALUE, HOST, X_FORWARDED_FOR, X_POWERED_BY, X_TENANT_ID,
};
use crate::gateway::limiter::RateLimitGate;
use crate::gateway::rules::RuleEngine;
use crate::gateway::tenants::TenantConfigStore;
use crate::gateway::types::{FilterMode, GatewayError, TenantConfig, TenantId};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderValue;
use axum::response::Response;
use axum::Router;
use http::uri::Uri;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Capability seam for the byte-level proxy transport: forward a request
/// to its (absolute) target URI and hand the response back.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, request: Request) -> Result<Response, GatewayError>;
}

/// Forwarder over the shared hyper client, with a per-request timeout
pub struct HttpForwarder {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
}

impl HttpForwarder {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder(hyper_util::rt::TokioExecutor::new())
            .http1_title_case_headers(true)
            .http1_preserve_header_case(true)
            .build_http();

        Self { client, timeout }
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, request: Request) -> Result<Response, GatewayError> {
        let response = tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| GatewayError::UpstreamTimeout(self.timeout))?
            .map_err(|err| GatewayError::Upstream(err.to_string()))?;

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

/// Shared state behind every dispatched request
pub struct GatewayState {
    pub tenants: TenantConfigStore,
    pub limiter: RateLimitGate,
    pub forwarder: Arc<dyn Forwarder>,
    /// Whether an upstream edge proxy has rewritten inbound URLs.
    pub edge_mode: bool,
}

/// Build the gateway router: every path and method funnels into the
/// dispatch pipeline.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(axum::middleware::from_fn(logging_middleware))
        .with_state(state)
}

/// Logs request start/completion with timing
async fn logging_middleware(request: Request, next: axum::middleware::Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let tenant_id = request
        .headers()
        .get(X_TENANT_ID)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let response = next.run(request).await;

    info!(
        tenant_id = tenant_id,
        method = %method,
        path = path,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "request dispatched"
    );

    response
}

/// Axum handler for one end-to-end dispatch
async fn dispatch(
    State(state): State<Arc<GatewayState>>,
    request: Request,
) -> Result<Response, GatewayError> {
    let tenant_id = extract_tenant_id(&request)?;

    let config = state
        .tenants
        .resolve(&tenant_id)
        .await?
        .ok_or(GatewayError::UnknownTenant)?;

    if !state.tenants.check_usage_quota(&config) {
        return Err(GatewayError::QuotaExceeded);
    }

    let request_url = absolute_request_url(&request);
    let client_key = client_key(&request);

    // In edge mode the rule engine sees the recovered URL, not the edge
    // rewrite. The decoded identity fragment is informational only; the
    // gate keys on the connection-derived client key.
    let rule_url = if state.edge_mode {
        let decoded = EdgeUrlCodec::decode(&request_url);
        if let Some(identity) = &decoded.client_identity {
            debug!(tenant_id = %tenant_id, identity = identity, "edge client identity");
        }
        decoded.url
    } else {
        request_url.clone()
    };

    let subject_to_limiting = match config.filter_mode {
        FilterMode::None => false,
        FilterMode::All => true,
        FilterMode::Custom => {
            let outcome =
                RuleEngine::new(&config.rule_set, &rule_url, request.method()).validate_all();
            if !outcome.passed {
                // A rule mismatch exempts the request from limiting; it is
                // not a denial.
                debug!(
                    tenant_id = %tenant_id,
                    failed_rule_ids = ?outcome.failed_rule_ids,
                    "rule set did not match; bypassing the gate"
                );
            }
            outcome.passed
        }
    };

    if subject_to_limiting {
        let decision = state.limiter.admit(&tenant_id, &client_key, &config).await?;
        if !decision.admitted {
            return Err(GatewayError::RateLimited {
                retry_after_seconds: decision.retry_after_seconds.unwrap_or(1),
            });
        }
        state.limiter.clear_hint(&tenant_id).await;
    }

    let target = target_url(&request_url, &config, state.edge_mode)?;

    let (mut parts, body) = request.into_parts();
    parts.uri = target.clone();
    if let Some(authority) = target.authority() {
        if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
            parts.headers.insert(HOST, host);
        }
    }

    let mut response = state
        .forwarder
        .forward(Request::from_parts(parts, body))
        .await?;

    // A response was obtained, so the request counts against the plan even
    // if the origin answered with an error status.
    state.tenants.increment_usage(&tenant_id).await;

    let headers = response.headers_mut();
    headers.insert(
        GATEWAY_HEADER,
        HeaderValue::from_static(GATEWAY_HEADER_VALUE),
    );
    headers.remove(X_POWERED_BY);

    Ok(response)
}

fn extract_tenant_id(request: &Request) -> Result<TenantId, GatewayError> {
    request
        .headers()
        .get(X_TENANT_ID)
        .and_then(|h| h.to_str().ok())
        .and_then(|id| TenantId::try_new(id.to_string()).ok())
        .ok_or(GatewayError::MissingTenantId)
}

/// Reconstruct the absolute URL of the inbound request from its host
/// header when the URI arrived in origin form.
fn absolute_request_url(request: &Request) -> Uri {
    if request.uri().scheme().is_some() {
        return request.uri().clone();
    }

    let host = request
        .headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    format!("http://{host}{path_and_query}")
        .parse()
        .unwrap_or_else(|_| request.uri().clone())
}

/// The requester's network address: the first forwarded address when an
/// edge or load balancer supplied one, otherwise the connection peer.
fn client_key(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get(X_FORWARDED_FOR)
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return forwarded.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Substitute the tenant's origin into the request URL; in edge mode the
/// substituted URL is decoded once more to recover the true target path.
fn target_url(
    request_url: &Uri,
    config: &TenantConfig,
    edge_mode: bool,
) -> Result<Uri, GatewayError> {
    let authority = match config.origin_port {
        Some(port) => format!("{}:{port}", config.origin_host),
        None => config.origin_host.clone(),
    };
    let path_and_query = request_url
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let substituted = Uri::builder()
        .scheme(config.origin_protocol.scheme())
        .authority(authority.as_str())
        .path_and_query(path_and_query)
        .build()
        .map_err(|err| {
            warn!(origin_host = %config.origin_host, error = %err, "origin substitution failed");
            GatewayError::Internal(format!("invalid origin target: {err}"))
        })?;

    if edge_mode {
        Ok(EdgeUrlCodec::decode(&substituted).url)
    } else {
        Ok(substituted)
    }
}

//! HTTP header constants and cache-key helpers for the gateway
//!
//! Centralizes the header names and shared-store key shapes used across
//! the dispatch pipeline so they stay consistent between the gateway and
//! the communicator service.

use ::http::header;

/// Required request header carrying the opaque tenant identifier
pub const X_TENANT_ID: &str = "x-tenant-id";

/// Identifying response header set on every response that leaves the gateway
pub const GATEWAY_HEADER: &str = "gateway";

/// Value of the identifying response header
pub const GATEWAY_HEADER_VALUE: &str = "tollgate";

/// Framework-identifying header stripped from every response
pub const X_POWERED_BY: &str = "x-powered-by";

/// Forwarded client address header, preferred over the raw connection
/// address when present
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Standard header re-exports for convenience
pub use header::{AUTHORIZATION, CACHE_CONTROL, HOST};

/// Shared-store key shapes
pub mod keys {
    use crate::gateway::types::TenantId;

    /// Per-tenant CDN cache-hint flag
    pub fn rate_limit_hint(tenant_id: &TenantId) -> String {
        format!("{}:ratelimited", tenant_id.as_ref())
    }

    /// Per-tenant, per-client fixed-window key
    pub fn rate_limit_window(tenant_id: &TenantId, client_key: &str) -> String {
        format!("{}:ratelimit:{client_key}", tenant_id.as_ref())
    }
}

/// Well-known paths
pub mod paths {
    /// Health check endpoint path (communicator listener)
    pub const HEALTH: &str = "/health";
}

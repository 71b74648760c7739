//! Gateway module: the admission-control and dispatch pipeline
//!
//! One routing decision and one admission decision per request:
//! - Tenant resolution: cached configuration fronting the control plane
//! - Rule engine: which requests are subject to limiting
//! - Rate-limit gate: distributed fixed-window admission with CDN hinting
//! - Edge codec: true-URL recovery behind the edge layer
//! - Dispatcher: orchestration and the forward to the tenant's origin

pub mod dispatcher;
pub mod edge;
pub mod headers;
pub mod limiter;
pub mod rules;
pub mod tenants;
pub mod types;

pub use dispatcher::{Forwarder, GatewayState, HttpForwarder};
pub use edge::{DecodedUrl, EdgeUrlCodec};
pub use limiter::RateLimitGate;
pub use rules::{RuleEngine, RuleOutcome};
pub use tenants::{ControlPlaneClient, TenantConfigStore};
pub use types::{
    FilterMode, GatewayError, GatewayResult, RateDecision, Rule, RuleAttribute, RuleLogic,
    RuleOperator, RuleValue, TenantConfig, TenantId,
};

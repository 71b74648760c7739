//! Type definitions for the gateway module

use crate::gateway::headers::{CACHE_CONTROL, GATEWAY_HEADER, GATEWAY_HEADER_VALUE};
use crate::store::StoreError;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use nutype::nutype;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

// ========== Tenant identity ==========

/// Opaque tenant identifier carried in the `x-tenant-id` header
#[nutype(
    derive(Clone, Debug, Display, Hash, PartialEq, Eq, Deserialize, Serialize, TryFrom, AsRef),
    validate(predicate = |s: &str| !s.is_empty()),
)]
pub struct TenantId(String);

// ========== Tenant configuration ==========

/// Scheme used to reach a tenant's origin
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginProtocol {
    Http,
    Https,
}

impl OriginProtocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("https") {
            Self::Https
        } else {
            Self::Http
        }
    }
}

/// Which requests a tenant subjects to rate limiting
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Rate limiting is disabled for this tenant.
    #[default]
    None,
    /// Only requests matching the tenant's rule set are limited.
    Custom,
    /// Every request is limited.
    All,
}

impl FilterMode {
    fn parse(value: &str) -> Self {
        match value {
            "custom" => Self::Custom,
            "all" => Self::All,
            _ => Self::None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Custom => "custom",
            Self::All => "all",
        }
    }
}

/// One tenant's routing and admission policy
///
/// Stored in the shared cache as a string-to-string hash; all numeric
/// fields are coerced on read and the rule set travels as a JSON-encoded
/// string.
#[derive(Clone, Debug, PartialEq)]
pub struct TenantConfig {
    pub origin_host: String,
    pub origin_port: Option<u16>,
    pub origin_protocol: OriginProtocol,
    /// Length of the rate-limit window, in seconds.
    pub rate_period_seconds: u64,
    /// Configured request allowance per window. Carried through the cache
    /// but not consulted by the gate, which admits a single request per
    /// window.
    pub rate_frequency: u64,
    /// How long a downstream cache may serve a rate-limit rejection.
    pub rate_limited_response_cache_seconds: u64,
    pub filter_mode: FilterMode,
    pub rule_set: Vec<Rule>,
    pub usage_count: u64,
}

/// Hash field names for the cached tenant record
mod fields {
    pub const HOST: &str = "host";
    pub const PORT: &str = "port";
    pub const PROTOCOL: &str = "protocol";
    pub const PERIOD: &str = "period";
    pub const FREQUENCY: &str = "frequency";
    pub const DURATION: &str = "duration";
    pub const FILTER: &str = "filter";
    pub const RULE_SET: &str = "rule_set";
    pub const USAGE_COUNT: &str = "usage_count";
}

/// Name of the usage counter field, exposed for atomic increments
pub const USAGE_COUNT_FIELD: &str = fields::USAGE_COUNT;

/// A tenant record that cannot be interpreted
#[derive(Error, Debug)]
pub enum TenantRecordError {
    #[error("missing origin host")]
    MissingOriginHost,

    #[error("field `{field}` is not a number: {value:?}")]
    NotANumber { field: &'static str, value: String },

    #[error("field `port` is not a port number: {0:?}")]
    InvalidPort(String),

    #[error("rule set is not valid JSON: {0}")]
    InvalidRuleSet(#[from] serde_json::Error),
}

impl TenantConfig {
    /// Interpret a string-to-string hash as read from the shared cache or
    /// the control plane. Absent numeric fields default to zero; present
    /// but unparseable fields are an error.
    pub fn from_fields(record: &HashMap<String, String>) -> Result<Self, TenantRecordError> {
        let origin_host = record
            .get(fields::HOST)
            .filter(|h| !h.is_empty())
            .cloned()
            .ok_or(TenantRecordError::MissingOriginHost)?;

        let origin_port = match record.get(fields::PORT).filter(|p| !p.is_empty()) {
            Some(port) => Some(
                port.parse::<u16>()
                    .map_err(|_| TenantRecordError::InvalidPort(port.clone()))?,
            ),
            None => None,
        };

        let rule_set = match record.get(fields::RULE_SET).filter(|r| !r.is_empty()) {
            Some(encoded) => serde_json::from_str(encoded)?,
            None => Vec::new(),
        };

        Ok(Self {
            origin_host,
            origin_port,
            origin_protocol: record
                .get(fields::PROTOCOL)
                .map(|p| OriginProtocol::parse(p))
                .unwrap_or(OriginProtocol::Http),
            rate_period_seconds: parse_numeric(record, fields::PERIOD)?,
            rate_frequency: parse_numeric(record, fields::FREQUENCY)?,
            rate_limited_response_cache_seconds: parse_numeric(record, fields::DURATION)?,
            filter_mode: record
                .get(fields::FILTER)
                .map(|f| FilterMode::parse(f))
                .unwrap_or_default(),
            rule_set,
            usage_count: parse_numeric(record, fields::USAGE_COUNT)?,
        })
    }

    /// Serialize back into the hash shape used by the shared cache.
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let rule_set = if self.rule_set.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&self.rule_set).unwrap_or_default()
        };

        vec![
            (fields::HOST.to_string(), self.origin_host.clone()),
            (
                fields::PORT.to_string(),
                self.origin_port.map(|p| p.to_string()).unwrap_or_default(),
            ),
            (
                fields::PROTOCOL.to_string(),
                self.origin_protocol.scheme().to_string(),
            ),
            (
                fields::PERIOD.to_string(),
                self.rate_period_seconds.to_string(),
            ),
            (
                fields::FREQUENCY.to_string(),
                self.rate_frequency.to_string(),
            ),
            (
                fields::DURATION.to_string(),
                self.rate_limited_response_cache_seconds.to_string(),
            ),
            (
                fields::FILTER.to_string(),
                self.filter_mode.as_str().to_string(),
            ),
            (fields::RULE_SET.to_string(), rule_set),
            (
                fields::USAGE_COUNT.to_string(),
                self.usage_count.to_string(),
            ),
        ]
    }
}

fn parse_numeric(
    record: &HashMap<String, String>,
    field: &'static str,
) -> Result<u64, TenantRecordError> {
    match record.get(field).filter(|v| !v.is_empty()) {
        Some(value) => value.parse::<u64>().map_err(|_| TenantRecordError::NotANumber {
            field,
            value: value.clone(),
        }),
        None => Ok(0),
    }
}

// ========== Rules ==========

/// Request attribute a rule inspects
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleAttribute {
    FullUrl,
    PathAndQuery,
    Path,
    QueryString,
    Method,
}

/// Comparison applied between the derived attribute and the rule value
///
/// A closed enumeration: the rule language is auditable and cannot be
/// extended at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleOperator {
    Wildcard,
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Contains,
    IsIn,
    IsNotIn,
    StartsWith,
    EndsWith,
    DoesNotStartWith,
    DoesNotEndWith,
    Exists,
    DoesNotExist,
}

/// How a rule combines with the running evaluation
///
/// `None` is only meaningful on the first rule of a set, where it marks the
/// start of the first conjunctive group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleLogic {
    #[default]
    #[serde(alias = "null")]
    None,
    And,
    Or,
}

fn nullable_logic<'de, D>(deserializer: D) -> Result<RuleLogic, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RuleLogic>::deserialize(deserializer)?.unwrap_or_default())
}

/// Comparison value of a rule
///
/// Control planes have shipped both bare scalars and `{ "value": ... }`
/// wrappers; both shapes are accepted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleValue {
    Keyed { value: Option<Box<RuleValue>> },
    Text(String),
    Number(f64),
    Flag(bool),
}

impl RuleValue {
    /// The comparison string the operators work on.
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Number(n) if n.fract() == 0.0 => format!("{}", *n as i64),
            Self::Number(n) => n.to_string(),
            Self::Flag(flag) => flag.to_string(),
            Self::Keyed { value: Some(inner) } => inner.as_text(),
            Self::Keyed { value: None } => String::new(),
        }
    }
}

impl From<&str> for RuleValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// One row of a tenant's rule set
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: u64,
    #[serde(rename = "type")]
    pub attribute: RuleAttribute,
    pub operator: RuleOperator,
    pub value: RuleValue,
    #[serde(default, deserialize_with = "nullable_logic")]
    pub logic: RuleLogic,
}

// ========== Rate limiting ==========

/// Per-request admission decision from the rate-limit gate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateDecision {
    pub admitted: bool,
    pub retry_after_seconds: Option<u64>,
}

impl RateDecision {
    pub fn admitted() -> Self {
        Self {
            admitted: true,
            retry_after_seconds: None,
        }
    }

    pub fn rejected(retry_after_seconds: u64) -> Self {
        Self {
            admitted: false,
            retry_after_seconds: Some(retry_after_seconds),
        }
    }
}

// ========== Errors ==========

/// Errors that can occur while dispatching a request
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("request carries no tenant identifier")]
    MissingTenantId,

    #[error("tenant identifier does not resolve to a configuration")]
    UnknownTenant,

    #[error("tenant exceeded its plan usage ceiling")]
    QuotaExceeded,

    #[error("rate limited for another {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("upstream request timed out after {0:?}")]
    UpstreamTimeout(Duration),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Standard error response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Unique error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        use GatewayError::*;

        match self {
            MissingTenantId => StatusCode::FORBIDDEN,
            UnknownTenant => StatusCode::UNAUTHORIZED,
            QuotaExceeded | RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            UpstreamTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            Upstream(_) => StatusCode::BAD_GATEWAY,
            Store(_) | Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_error_response(&self) -> ErrorResponse {
        use GatewayError::*;

        match self {
            MissingTenantId => ErrorResponse::new("ACCESS_DENIED", "Access denied"),
            UnknownTenant => ErrorResponse::new("INVALID_TENANT", "Invalid tenant id"),
            QuotaExceeded => ErrorResponse::new("QUOTA_EXCEEDED", "Plan usage quota exceeded"),
            RateLimited { .. } => {
                ErrorResponse::new("RATE_LIMITED", "Too many requests, slow down.")
            }
            UpstreamTimeout(_) => {
                ErrorResponse::new("UPSTREAM_TIMEOUT", "Upstream request timed out")
            }
            Upstream(_) => ErrorResponse::new("BAD_GATEWAY", "Bad Gateway"),
            Store(_) | Internal(_) => {
                ErrorResponse::new("INTERNAL_ERROR", "Internal gateway error")
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (status, Json(self.to_error_response())).into_response();

        response.headers_mut().insert(
            GATEWAY_HEADER,
            HeaderValue::from_static(GATEWAY_HEADER_VALUE),
        );

        // A rate-limit rejection is deliberately cacheable so an upstream
        // cache can absorb the retry storm for the rest of the window.
        if let GatewayError::RateLimited {
            retry_after_seconds,
        } = &self
        {
            if let Ok(directive) = HeaderValue::from_str(&format!(
                "public, max-age={retry_after_seconds}, s-maxage={retry_after_seconds}, immutable"
            )) {
                response.headers_mut().insert(CACHE_CONTROL, directive);
            }
        }

        response
    }
}

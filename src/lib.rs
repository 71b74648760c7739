//! Tollgate - a multi-tenant reverse-proxy gateway
//!
//! Each inbound request carries a tenant identifier. The gateway resolves
//! it to the tenant's routing and admission policy, evaluates the tenant's
//! rule set, gates the request through a distributed rate limiter, and
//! forwards it to the tenant's origin.

pub mod application;
pub mod communicator;
pub mod config;
pub mod error;
pub mod gateway;
pub mod store;

pub use application::Application;
pub use error::{Error, Result};

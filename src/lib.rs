//! Resilience and access-control layer for third-party API calls.
//!
//! Every outbound call passes through a per-API quota, a pre-emptive OAuth
//! credential manager and a per-dependency circuit breaker, composed by
//! [`Gateway`].

pub mod admin;
pub mod auth;
pub mod config;
pub mod gateway;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::GatewayConfig;
pub use gateway::{ApiCall, Gateway, GatewayError};
pub use lifecycle::Shutdown;
pub use resilience::Admission;

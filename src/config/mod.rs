//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, apply env overrides)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → handed to the composition root, which builds the
//!       breaker registry, rate limiter and auth manager from it
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; breaker and quota settings are fixed at registration
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{default_config, load_config, ConfigError};
pub use schema::{
    AdminConfig, AuthConfig, CircuitBreakerConfig, GatewayConfig, LifecycleConfig,
    ObservabilityConfig, RateLimitConfig, ServiceScopes,
};

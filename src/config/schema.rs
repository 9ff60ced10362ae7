//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Admin API settings.
    pub admin: AdminConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Breaker settings used for names absent from `breakers`.
    pub default_breaker: CircuitBreakerConfig,

    /// Named circuit breakers, one per failure-prone dependency.
    pub breakers: BTreeMap<String, CircuitBreakerConfig>,

    /// Quotas per rate-limited API name.
    pub rate_limits: BTreeMap<String, RateLimitConfig>,

    /// OAuth credential management.
    pub auth: AuthConfig,

    /// Shutdown behaviour.
    pub lifecycle: LifecycleConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            admin: AdminConfig::default(),
            observability: ObservabilityConfig::default(),
            default_breaker: CircuitBreakerConfig::default(),
            breakers: default_breakers(),
            rate_limits: default_rate_limits(),
            auth: AuthConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

/// Circuit breaker thresholds for one named dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in CLOSED before the circuit opens.
    pub failure_threshold: u32,

    /// Seconds the circuit stays OPEN before a probe is allowed.
    pub recovery_timeout_secs: u64,

    /// Probes admitted concurrently while HALF_OPEN.
    pub half_open_max_probes: u32,

    /// Consecutive probe successes needed to close the circuit.
    pub success_threshold_to_close: u32,
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, recovery_timeout_secs: u64) -> Self {
        Self {
            failure_threshold,
            recovery_timeout_secs,
            ..Self::default()
        }
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 300,
            half_open_max_probes: 3,
            success_threshold_to_close: 2,
        }
    }
}

fn default_breakers() -> BTreeMap<String, CircuitBreakerConfig> {
    let mut breakers = BTreeMap::new();
    breakers.insert(
        "youtube_upload".to_string(),
        CircuitBreakerConfig {
            half_open_max_probes: 1,
            ..CircuitBreakerConfig::new(3, 600)
        },
    );
    breakers.insert("youtube_analytics".to_string(), CircuitBreakerConfig::new(5, 300));
    breakers.insert("google_trends".to_string(), CircuitBreakerConfig::new(5, 300));
    breakers.insert("google_search".to_string(), CircuitBreakerConfig::new(10, 180));
    breakers
}

/// Daily and per-minute quota for one API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Hard daily cap; exhausting it fails fast.
    pub requests_per_day: u32,

    /// Per-minute cap; exhausting it delays the caller.
    pub requests_per_minute: u32,
}

impl RateLimitConfig {
    pub fn new(requests_per_day: u32, requests_per_minute: u32) -> Self {
        Self {
            requests_per_day,
            requests_per_minute,
        }
    }
}

fn default_rate_limits() -> BTreeMap<String, RateLimitConfig> {
    [
        ("trends", RateLimitConfig::new(1000, 60)),
        ("search", RateLimitConfig::new(10_000, 100)),
        ("youtube_upload", RateLimitConfig::new(50, 5)),
        ("youtube_analytics", RateLimitConfig::new(10_000, 100)),
        ("knowledge_graph", RateLimitConfig::new(10_000, 100)),
    ]
    .into_iter()
    .map(|(name, limit)| (name.to_string(), limit))
    .collect()
}

/// OAuth credential management configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Directory holding one token file per (service, account).
    pub credentials_dir: PathBuf,

    /// Installed-app client secrets used for first-time authorization.
    pub client_secrets_file: PathBuf,

    /// Minimum remaining validity (minutes) before a token is refreshed.
    pub preemptive_refresh_minutes: u32,

    /// OAuth scopes per service.
    pub services: BTreeMap<String, ServiceScopes>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            credentials_dir: PathBuf::from("./credentials"),
            client_secrets_file: PathBuf::from("./credentials/client_secrets.json"),
            preemptive_refresh_minutes: 10,
            services: default_services(),
        }
    }
}

/// Scopes requested when authorizing a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServiceScopes {
    #[serde(default)]
    pub scopes: Vec<String>,
}

fn default_services() -> BTreeMap<String, ServiceScopes> {
    let scopes = |list: &[&str]| ServiceScopes {
        scopes: list.iter().map(|s| s.to_string()).collect(),
    };

    let mut services = BTreeMap::new();
    services.insert(
        "youtube".to_string(),
        scopes(&[
            "https://www.googleapis.com/auth/youtube.upload",
            "https://www.googleapis.com/auth/youtube.force-ssl",
            "https://www.googleapis.com/auth/youtubepartner",
        ]),
    );
    services.insert(
        "youtube_analytics".to_string(),
        scopes(&["https://www.googleapis.com/auth/yt-analytics.readonly"]),
    );
    services.insert(
        "search".to_string(),
        scopes(&["https://www.googleapis.com/auth/customsearch"]),
    );
    services
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Seconds to wait for in-flight calls after a shutdown signal.
    pub drain_timeout_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 30,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
            request_timeout_secs: 10,
        }
    }
}

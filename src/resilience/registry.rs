//! Named circuit breaker registry.
//!
//! # Responsibilities
//! - Own every breaker for the lifetime of the process
//! - Create breakers lazily on first use, exactly once per name
//! - Report breaker status for diagnostics
//!
//! # Design Decisions
//! - Constructed by the composition root and shared via Arc (no statics)
//! - DashMap entry API makes `get_or_create` atomic per name

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::GatewayConfig;
use crate::resilience::circuit_breaker::{BreakerStatus, CircuitBreaker, CircuitBreakerConfig};

/// Process-wide map from breaker name to breaker.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    configured: BTreeMap<String, CircuitBreakerConfig>,
    default_config: CircuitBreakerConfig,
}

impl BreakerRegistry {
    /// Create a registry with per-name configs and a fallback config.
    pub fn new(
        configured: BTreeMap<String, CircuitBreakerConfig>,
        default_config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            breakers: DashMap::new(),
            configured,
            default_config,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.breakers.clone(), config.default_breaker)
    }

    /// Return the breaker for `name`, creating it with `config` if absent.
    ///
    /// Idempotent: once a breaker exists, later configs are ignored.
    pub fn get_or_create(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(breaker = %name, ?config, "Registering circuit breaker");
                Arc::new(CircuitBreaker::new(name, config))
            })
            .clone()
    }

    /// Return the breaker for `name` using its configured (or default) settings.
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        let config = self
            .configured
            .get(name)
            .copied()
            .unwrap_or(self.default_config);
        self.get_or_create(name, config)
    }

    /// Create every configured breaker up front so status reports list them.
    pub fn register_configured(&self) {
        for name in self.configured.keys() {
            self.breaker(name);
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Status of every registered breaker, sorted by name.
    pub fn statuses(&self) -> Vec<BreakerStatus> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|entry| entry.value().clone()).collect();
        let mut statuses: Vec<BreakerStatus> = breakers.iter().map(|b| b.status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_is_idempotent() {
        let registry = BreakerRegistry::default();
        let first = registry.get_or_create("search", CircuitBreakerConfig::new(10, 180));
        let second = registry.get_or_create("search", CircuitBreakerConfig::new(1, 1));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.config().failure_threshold, 10);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_breaker_uses_configured_then_default() {
        let registry = BreakerRegistry::from_config(&GatewayConfig::default());

        assert_eq!(registry.breaker("youtube_upload").config().recovery_timeout_secs, 600);
        assert_eq!(
            *registry.breaker("unlisted").config(),
            CircuitBreakerConfig::default()
        );
    }

    #[test]
    fn test_statuses_are_sorted() {
        let registry = BreakerRegistry::from_config(&GatewayConfig::default());
        assert!(registry.is_empty());
        registry.register_configured();

        let names: Vec<String> = registry.statuses().into_iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            ["google_search", "google_trends", "youtube_analytics", "youtube_upload"]
        );
    }

    #[tokio::test]
    async fn test_concurrent_creation_yields_one_breaker() {
        let registry = Arc::new(BreakerRegistry::default());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry.get_or_create("trends", CircuitBreakerConfig::default())
                })
            })
            .collect();

        let mut breakers = Vec::new();
        for handle in handles {
            breakers.push(handle.await.unwrap());
        }
        assert!(breakers.iter().all(|b| Arc::ptr_eq(b, &breakers[0])));
        assert_eq!(registry.len(), 1);
    }
}

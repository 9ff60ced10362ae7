//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, quotas > 0)
//! - Validate addresses and names used to build file paths
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{CircuitBreakerConfig, GatewayConfig};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: String },

    #[error("{field} is not a valid socket address: {value}")]
    InvalidAddress { field: String, value: String },

    #[error("{field} contains characters outside [A-Za-z0-9_-]: {value}")]
    InvalidName { field: String, value: String },
}

/// Validate a parsed configuration, collecting every error found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_breaker("default_breaker", &config.default_breaker, &mut errors);
    for (name, breaker) in &config.breakers {
        check_breaker(&format!("breakers.{name}"), breaker, &mut errors);
    }

    for (api, limit) in &config.rate_limits {
        if limit.requests_per_day == 0 {
            errors.push(zero(format!("rate_limits.{api}.requests_per_day")));
        }
        if limit.requests_per_minute == 0 {
            errors.push(zero(format!("rate_limits.{api}.requests_per_minute")));
        }
    }

    for service in config.auth.services.keys() {
        if !is_file_safe(service) {
            errors.push(ValidationError::InvalidName {
                field: "auth.services".to_string(),
                value: service.clone(),
            });
        }
    }

    if config.admin.enabled {
        check_address("admin.bind_address", &config.admin.bind_address, &mut errors);
        if config.admin.request_timeout_secs == 0 {
            errors.push(zero("admin.request_timeout_secs".to_string()));
        }
    }
    if config.observability.metrics_enabled {
        check_address(
            "observability.metrics_address",
            &config.observability.metrics_address,
            &mut errors,
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Names end up in credential file names, so they are restricted.
pub fn is_file_safe(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn check_breaker(prefix: &str, config: &CircuitBreakerConfig, errors: &mut Vec<ValidationError>) {
    if config.failure_threshold == 0 {
        errors.push(zero(format!("{prefix}.failure_threshold")));
    }
    if config.half_open_max_probes == 0 {
        errors.push(zero(format!("{prefix}.half_open_max_probes")));
    }
    if config.success_threshold_to_close == 0 {
        errors.push(zero(format!("{prefix}.success_threshold_to_close")));
    }
}

fn check_address(field: &str, value: &str, errors: &mut Vec<ValidationError>) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

fn zero(field: String) -> ValidationError {
    ValidationError::Zero { field }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RateLimitConfig;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = GatewayConfig::default();
        config.default_breaker.failure_threshold = 0;
        config
            .rate_limits
            .insert("broken".into(), RateLimitConfig::new(0, 0));
        config.admin.bind_address = "not-an-address".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::Zero {
            field: "rate_limits.broken.requests_per_minute".into()
        }));
    }

    #[test]
    fn test_rejects_path_like_service_names() {
        let mut config = GatewayConfig::default();
        config
            .auth
            .services
            .insert("../escape".into(), Default::default());

        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::InvalidName { .. }));
        assert!(is_file_safe("youtube_analytics"));
        assert!(!is_file_safe("a/b"));
    }
}

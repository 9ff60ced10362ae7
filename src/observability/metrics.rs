//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_breaker_transitions_total` (counter): transitions by breaker, target state
//! - `gateway_breaker_rejections_total` (counter): downgraded calls by breaker
//! - `gateway_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `gateway_quota_exhausted_total` (counter): daily quota stops by api
//! - `gateway_quota_wait_seconds` (histogram): per-minute throttling delays by api
//! - `gateway_token_refresh_total` (counter): refreshes by service, outcome
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so tests need no setup
//! - Prometheus exporter runs its own HTTP listener

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_breaker_transition(breaker: &str, state: CircuitState) {
    counter!(
        "gateway_breaker_transitions_total",
        "breaker" => breaker.to_string(),
        "state" => state.as_str()
    )
    .increment(1);
    gauge!("gateway_breaker_state", "breaker" => breaker.to_string()).set(match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    });
}

pub fn record_breaker_rejection(breaker: &str) {
    counter!("gateway_breaker_rejections_total", "breaker" => breaker.to_string()).increment(1);
}

pub fn record_quota_exhausted(api: &str) {
    counter!("gateway_quota_exhausted_total", "api" => api.to_string()).increment(1);
}

pub fn record_quota_wait(api: &str, wait: Duration) {
    histogram!("gateway_quota_wait_seconds", "api" => api.to_string()).record(wait.as_secs_f64());
}

pub fn record_token_refresh(service: &str, outcome: &'static str) {
    counter!(
        "gateway_token_refresh_total",
        "service" => service.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

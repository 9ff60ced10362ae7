//! Dual-window API quotas.
//!
//! Each API name carries a coarse daily cap and a fine per-minute cap.
//! Exhausting the daily cap fails fast with [`QuotaExceeded`]; exhausting the
//! per-minute cap suspends the caller until the minute window rolls over.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::GatewayConfig;
use crate::observability::metrics;

pub use crate::config::schema::RateLimitConfig;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const MINUTE: Duration = Duration::from_secs(60);

/// Quota bookkeeping for one API. Windows roll lazily on access.
#[derive(Debug, Clone)]
pub struct RateLimit {
    pub requests_per_day: u32,
    pub requests_per_minute: u32,
    pub day_count: u32,
    pub minute_count: u32,
    pub day_window_start: Instant,
    pub minute_window_start: Instant,
}

impl RateLimit {
    fn new(config: RateLimitConfig, now: Instant) -> Self {
        Self {
            requests_per_day: config.requests_per_day,
            requests_per_minute: config.requests_per_minute,
            day_count: 0,
            minute_count: 0,
            day_window_start: now,
            minute_window_start: now,
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.saturating_duration_since(self.day_window_start) >= DAY {
            self.day_count = 0;
            self.day_window_start = now;
        }
        if now.saturating_duration_since(self.minute_window_start) >= MINUTE {
            self.minute_count = 0;
            self.minute_window_start = now;
        }
    }

    fn day_reset_in(&self, now: Instant) -> Duration {
        DAY.saturating_sub(now.saturating_duration_since(self.day_window_start))
    }

    fn minute_reset_in(&self, now: Instant) -> Duration {
        MINUTE.saturating_sub(now.saturating_duration_since(self.minute_window_start))
    }

    /// Daily requests left as of `now`, without mutating the window.
    fn remaining_at(&self, now: Instant) -> u32 {
        if self.day_reset_in(now).is_zero() {
            return self.requests_per_day;
        }
        self.requests_per_day.saturating_sub(self.day_count)
    }

    fn minute_remaining_at(&self, now: Instant) -> u32 {
        if self.minute_reset_in(now).is_zero() {
            return self.requests_per_minute;
        }
        self.requests_per_minute.saturating_sub(self.minute_count)
    }
}

/// The daily quota for an API is spent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("daily quota for {api} exhausted, resets in {}s", .wait.as_secs())]
pub struct QuotaExceeded {
    pub api: String,
    /// Time until the daily window resets; do not retry before it elapses.
    pub wait: Duration,
}

impl QuotaExceeded {
    pub fn wait_seconds(&self) -> f64 {
        self.wait.as_secs_f64()
    }
}

/// Point-in-time quota view for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaStatus {
    pub api: String,
    pub limit_per_day: u32,
    pub limit_per_minute: u32,
    pub remaining: u32,
    pub minute_remaining: u32,
    pub resets_in_secs: u64,
    pub resets_at: DateTime<Utc>,
}

/// Per-API quota gate. One lock per API name; unrelated APIs never contend.
#[derive(Debug, Default)]
pub struct RateLimiter {
    limits: HashMap<String, Mutex<RateLimit>>,
}

impl RateLimiter {
    /// Every limit must be non-zero, as `validate_config` enforces. A zero
    /// per-minute limit would keep `acquire` waiting forever.
    pub fn new(limits: &BTreeMap<String, RateLimitConfig>) -> Self {
        let now = Instant::now();
        Self {
            limits: limits
                .iter()
                .map(|(api, config)| (api.clone(), Mutex::new(RateLimit::new(*config, now))))
                .collect(),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(&config.rate_limits)
    }

    /// Take one request slot for `api`.
    ///
    /// APIs without a configured quota are always admitted. Blocks while the
    /// per-minute window is full; fails fast once the daily window is full.
    pub async fn acquire(&self, api: &str) -> Result<(), QuotaExceeded> {
        let Some(slot) = self.limits.get(api) else {
            tracing::trace!(api = %api, "No quota configured, admitting");
            return Ok(());
        };

        loop {
            let wait = {
                let mut limit = lock(slot);
                let now = Instant::now();
                limit.roll(now);

                if limit.day_count >= limit.requests_per_day {
                    let wait = limit.day_reset_in(now);
                    tracing::warn!(api = %api, wait_secs = wait.as_secs(), "Daily rate limit reached");
                    metrics::record_quota_exhausted(api);
                    return Err(QuotaExceeded {
                        api: api.to_string(),
                        wait,
                    });
                }

                if limit.minute_count < limit.requests_per_minute {
                    limit.day_count += 1;
                    limit.minute_count += 1;
                    return Ok(());
                }

                limit.minute_reset_in(now)
            };

            tracing::warn!(api = %api, wait_secs = wait.as_secs_f64(), "Minute rate limit reached, waiting");
            metrics::record_quota_wait(api, wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Daily requests left for `api`; `None` when the API is unmetered.
    pub fn get_remaining(&self, api: &str) -> Option<u32> {
        let slot = self.limits.get(api)?;
        let limit = lock(slot);
        Some(limit.remaining_at(Instant::now()))
    }

    pub fn status(&self, api: &str) -> Option<QuotaStatus> {
        let slot = self.limits.get(api)?;
        let limit = lock(slot);
        let now = Instant::now();
        let resets_in = limit.day_reset_in(now);
        Some(QuotaStatus {
            api: api.to_string(),
            limit_per_day: limit.requests_per_day,
            limit_per_minute: limit.requests_per_minute,
            remaining: limit.remaining_at(now),
            minute_remaining: limit.minute_remaining_at(now),
            resets_in_secs: resets_in.as_secs(),
            resets_at: Utc::now()
                + chrono::Duration::from_std(resets_in).unwrap_or_else(|_| chrono::Duration::zero()),
        })
    }

    /// Status for every metered API, sorted by name.
    pub fn statuses(&self) -> Vec<QuotaStatus> {
        let mut apis: Vec<&String> = self.limits.keys().collect();
        apis.sort();
        apis.into_iter().filter_map(|api| self.status(api)).collect()
    }
}

fn lock(slot: &Mutex<RateLimit>) -> MutexGuard<'_, RateLimit> {
    slot.lock().expect("rate limiter mutex poisoned")
}

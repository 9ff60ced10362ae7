//! Circuit breaker for third-party API protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls are downgraded without running
//! - Half-Open: a bounded number of probes test whether it recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: first call after recovery_timeout
//! Half-Open → Closed: success_threshold_to_close consecutive probe successes
//! Half-Open → Open: any probe failure
//! ```
//!
//! # Design Decisions
//! - One breaker per named dependency, one mutex per breaker
//! - The mutex is never held while the wrapped operation runs
//! - Every admitted call carries the generation it was admitted under;
//!   outcomes from a superseded generation do not move the state machine
//! - Probe slots are held by a guard until the call settles or is dropped

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::observability::metrics;

pub use crate::config::schema::CircuitBreakerConfig;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable bookkeeping owned by a single breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure: Option<Instant>,
    /// Wall-clock twin of `last_failure`, for status reports.
    pub last_failure_at: Option<DateTime<Utc>>,
    pub half_open_probes: u32,
    generation: u64,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_failure_at: None,
            half_open_probes: 0,
            generation: 0,
        }
    }
}

/// Result of a call that went through admission control.
#[derive(Debug)]
pub enum Admission<T> {
    /// The operation ran and succeeded.
    Completed(T),
    /// The operation was skipped; the caller must use its fallback.
    Downgraded(Rejection),
}

impl<T> Admission<T> {
    pub fn is_downgraded(&self) -> bool {
        matches!(self, Admission::Downgraded(_))
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Admission::Completed(value) => Some(value),
            Admission::Downgraded(_) => None,
        }
    }
}

/// Why a call was not admitted, and when it is worth retrying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub breaker: String,
    pub state: CircuitState,
    /// Remaining cooldown when open; zero when only the probe budget is exhausted.
    pub retry_after: Duration,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} temporarily unavailable ({}), retry after {}s",
            self.breaker,
            self.state,
            self.retry_after.as_secs()
        )
    }
}

/// Point-in-time view of a breaker, taken under its lock.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub half_open_probes: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub is_available: bool,
    pub cooldown_secs: u64,
}

/// Failure isolation for one named dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<CircuitBreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(CircuitBreakerState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Copy of the internal bookkeeping.
    pub fn snapshot(&self) -> CircuitBreakerState {
        self.lock().clone()
    }

    /// Run `operation` if the breaker admits it.
    ///
    /// Returns `Ok(Admission::Downgraded)` without invoking `operation` when the
    /// circuit is open or the half-open probe budget is spent. An admitted
    /// operation's error is recorded and handed back unchanged.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<Admission<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let permit = match self.admit() {
            Ok(permit) => permit,
            Err(rejection) => return Ok(Admission::Downgraded(rejection)),
        };

        match operation().await {
            Ok(value) => {
                permit.succeed();
                Ok(Admission::Completed(value))
            }
            Err(e) => {
                permit.fail(&e);
                Err(e)
            }
        }
    }

    /// Status for diagnostics. Does not transition the breaker.
    pub fn status(&self) -> BreakerStatus {
        let st = self.lock();
        let cooldown = self.cooldown_remaining(&st, Instant::now());
        BreakerStatus {
            name: self.name.clone(),
            state: st.state,
            failure_count: st.failure_count,
            success_count: st.success_count,
            half_open_probes: st.half_open_probes,
            last_failure: st.last_failure_at,
            is_available: st.state != CircuitState::Open || cooldown.is_zero(),
            cooldown_secs: cooldown.as_secs(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreakerState> {
        self.state.lock().expect("circuit breaker mutex poisoned")
    }

    fn cooldown_remaining(&self, st: &CircuitBreakerState, now: Instant) -> Duration {
        if st.state != CircuitState::Open {
            return Duration::ZERO;
        }
        match st.last_failure {
            Some(at) => self
                .config
                .recovery_timeout()
                .saturating_sub(now.saturating_duration_since(at)),
            None => Duration::ZERO,
        }
    }

    fn admit(&self) -> Result<Permit<'_>, Rejection> {
        let mut st = self.lock();

        if st.state == CircuitState::Open {
            let cooldown = self.cooldown_remaining(&st, Instant::now());
            if !cooldown.is_zero() {
                tracing::warn!(
                    breaker = %self.name,
                    retry_after_secs = cooldown.as_secs(),
                    "Circuit breaker open, rejecting call"
                );
                metrics::record_breaker_rejection(&self.name);
                return Err(self.rejection(CircuitState::Open, cooldown));
            }
            self.transition(&mut st, CircuitState::HalfOpen);
        }

        let probe = st.state == CircuitState::HalfOpen;
        if probe {
            if st.half_open_probes >= self.config.half_open_max_probes {
                tracing::warn!(
                    breaker = %self.name,
                    probes = st.half_open_probes,
                    "Circuit breaker half-open probe budget exhausted"
                );
                metrics::record_breaker_rejection(&self.name);
                return Err(self.rejection(CircuitState::HalfOpen, Duration::ZERO));
            }
            st.half_open_probes += 1;
        }

        Ok(Permit {
            breaker: self,
            generation: st.generation,
            probe,
            settled: false,
        })
    }

    fn rejection(&self, state: CircuitState, retry_after: Duration) -> Rejection {
        Rejection {
            breaker: self.name.clone(),
            state,
            retry_after,
        }
    }

    fn record_success(&self, generation: u64, probe: bool) {
        let mut st = self.lock();
        if st.generation != generation {
            tracing::debug!(breaker = %self.name, "Ignoring success from superseded generation");
            return;
        }

        match st.state {
            CircuitState::Closed => st.failure_count = 0,
            CircuitState::HalfOpen => {
                if probe {
                    st.half_open_probes = st.half_open_probes.saturating_sub(1);
                }
                st.failure_count = 0;
                st.success_count += 1;
                if st.success_count >= self.config.success_threshold_to_close {
                    self.transition(&mut st, CircuitState::Closed);
                }
            }
            // Admissions never happen while open within a generation.
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self, generation: u64, error: &dyn fmt::Display) {
        let mut st = self.lock();
        if st.generation != generation {
            tracing::debug!(
                breaker = %self.name,
                error = %error,
                "Ignoring failure from superseded generation"
            );
            return;
        }

        st.failure_count += 1;
        st.success_count = 0;
        st.last_failure = Some(Instant::now());
        st.last_failure_at = Some(Utc::now());

        tracing::warn!(
            breaker = %self.name,
            failure_count = st.failure_count,
            error = %error,
            "Circuit breaker recorded failure"
        );

        let trip = match st.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => st.failure_count >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            self.transition(&mut st, CircuitState::Open);
        }
    }

    fn release_probe(&self, generation: u64) {
        let mut st = self.lock();
        if st.generation == generation && st.state == CircuitState::HalfOpen {
            st.half_open_probes = st.half_open_probes.saturating_sub(1);
            tracing::debug!(breaker = %self.name, "Half-open probe abandoned");
        }
    }

    fn transition(&self, st: &mut CircuitBreakerState, to: CircuitState) {
        let from = st.state;
        st.state = to;
        st.generation += 1;
        st.half_open_probes = 0;
        st.success_count = 0;
        if to == CircuitState::Closed {
            st.failure_count = 0;
        }

        match to {
            CircuitState::Open => tracing::error!(
                breaker = %self.name,
                from = %from,
                recovery_in_secs = self.config.recovery_timeout_secs,
                "Circuit breaker opened"
            ),
            _ => tracing::info!(breaker = %self.name, from = %from, to = %to, "Circuit breaker transition"),
        }
        metrics::record_breaker_transition(&self.name, to);
    }
}

/// Admission ticket for one call; settles into a success or failure.
///
/// Dropping an unsettled probe (e.g. the caller's future was cancelled)
/// gives its half-open slot back.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    probe: bool,
    settled: bool,
}

impl Permit<'_> {
    fn succeed(mut self) {
        self.settled = true;
        self.breaker.record_success(self.generation, self.probe);
    }

    fn fail(mut self, error: &dyn fmt::Display) {
        self.settled = true;
        self.breaker.record_failure(self.generation, error);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe(self.generation);
        }
    }
}

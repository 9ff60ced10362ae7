//! Access control subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound API call:
//!     → rate_limit.rs (daily cap: fail fast; per-minute cap: wait)
//!     → auth manager (credentials)
//!     → circuit breaker (admission)
//! ```
//!
//! # Design Decisions
//! - Quotas are enforced before the call leaves the process
//! - One lock per API name so unrelated APIs never contend
//! - No background timers: windows roll over lazily on access

pub mod rate_limit;

pub use rate_limit::{QuotaExceeded, QuotaStatus, RateLimiter};

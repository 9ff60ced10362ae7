//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound API call:
//!     → registry.rs (look up the breaker for the dependency)
//!     → circuit_breaker.rs (admit, run, record outcome)
//!     → Admission::Completed(result) | Admission::Downgraded(rejection) | Err(operation error)
//! ```
//!
//! # Design Decisions
//! - Circuit breaker prevents repeated calls to a failing dependency
//! - Rejections are values, genuine failures stay on the error channel
//! - No timeout is imposed on the wrapped call; the HTTP client's own timeout produces the failure

pub mod circuit_breaker;
pub mod registry;

pub use circuit_breaker::{Admission, BreakerStatus, CircuitBreaker, CircuitState, Rejection};
pub use registry::BreakerRegistry;

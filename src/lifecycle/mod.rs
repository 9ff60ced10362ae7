//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → shutdown_signal() resolves
//!
//! Shutdown (shutdown.rs):
//!     trigger() → Gateway::execute refuses new calls, admin API stops
//!     drain()   → resolves when the last in-flight call finishes, or on timeout
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::{InFlight, Shutdown};
pub use signals::shutdown_signal;

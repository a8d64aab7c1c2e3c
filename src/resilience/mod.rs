//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Failed backend attempt:
//!     → classifier.rs (one ErrorKind per failure)
//!     → circuit_breaker.rs (track failures, open circuit if threshold exceeded)
//!     → planner.rs (ordered strategies, retry delay, fallback availability)
//!     → executor.rs (run strategies until one resolves)
//!         → backoff.rs (re-queue delay)
//!         → fallback.rs (degraded output)
//! pipeline.rs ties the steps together for one queued attempt.
//! ```
//!
//! # Design Decisions
//! - Classification and planning are pure; only the executor has side effects
//! - Circuit breaker prevents hammering a backend that is down
//! - Nothing in this subsystem returns an error past its boundary

pub mod backoff;
pub mod circuit_breaker;
pub mod classifier;
pub mod executor;
pub mod fallback;
pub mod pipeline;
pub mod planner;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use classifier::{classify, ErrorKind};
pub use fallback::{FallbackResponder, FallbackStrategy};
pub use planner::{RecoveryPlan, RecoveryPlanner, Strategy};

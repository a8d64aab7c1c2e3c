//! Rate-limited priority queueing of backend calls.
//!
//! # Data Flow
//! ```text
//! submit(payload, options)
//!     → item.rs (QueueItem with deadline and attempt budget)
//!     → tiers.rs (high / normal / low, FIFO within a tier)
//!     → rate_limit.rs (sliding window + concurrency cap)
//!     → lane.rs (dispatch, retry delays, timeouts, settlement)
//! ```
//!
//! # Design Decisions
//! - One queue per backend; limits never interact across backends
//! - Backpressure shows up as latency, never as an error, until the item times out
//! - What an attempt does is behind the `ItemProcessor` trait

pub mod item;
pub mod lane;
pub mod rate_limit;
pub mod tiers;

pub use item::{
    AttemptContext, AttemptError, ItemStatus, Outcome, OutcomeSource, Priority, QueueItem,
    SubmitOptions,
};
pub use lane::{Disposition, ItemProcessor, RateLimitedQueue, Submission};

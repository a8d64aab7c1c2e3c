//! Health and statistics subsystem.
//!
//! # Data Flow
//! ```text
//! Queue / pipeline / executor
//!     → stats.rs (counters, running averages)
//!
//! Breaker snapshots + queue lengths + stats
//!     → report.rs (per-backend and overall health)
//!
//! Event channel
//!     → monitor.rs (gauges, operator logs)
//! ```
//!
//! # Design Decisions
//! - Health is derived on demand from live state, never cached
//! - The monitor only observes; it never changes breaker or queue state

pub mod monitor;
pub mod report;
pub mod stats;

pub use monitor::HealthMonitor;
pub use report::{BackendHealth, HealthReport, OverallHealth};
pub use stats::{StatsAggregator, StatsSnapshot};

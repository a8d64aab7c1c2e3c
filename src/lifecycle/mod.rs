//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Scheduling (scheduler.rs):
//!     Breaker opens → half-open after the recovery timeout
//!     Layer start → periodic age sweep per backend
//!
//! Shutdown (shutdown.rs):
//!     Ctrl+C / shutdown() → dispatchers settle tracked items → tasks exit
//! ```
//!
//! # Design Decisions
//! - Every timer task has a cancelable handle
//! - Shutdown is a broadcast; each long-running task owns a receiver

pub mod scheduler;
pub mod shutdown;

pub use scheduler::{schedule_after, schedule_every, TaskHandle};
pub use shutdown::Shutdown;

//! Resilience layer for the platform's external AI backends.
//!
//! Every call to speech-to-text, text-to-speech or the conversational model
//! goes through a per-backend rate-limited priority queue, a circuit breaker
//! and a recovery pipeline that classifies failures, retries what is worth
//! retrying and otherwise serves a safe degraded response.

pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod http;
pub mod layer;
pub mod lifecycle;
pub mod observability;
pub mod queue;
pub mod resilience;

pub use backend::{BackendCaller, BackendFailure, BackendId, HttpBackendCaller};
pub use config::schema::ResilienceConfig;
pub use error::ResilienceError;
pub use http::HttpServer;
pub use layer::ResilienceLayer;
pub use lifecycle::Shutdown;
pub use queue::{Outcome, Priority, SubmitOptions};

//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, trace, timeout)
//!     → request.rs (deserialize submission, read request ID)
//!     → ResilienceLayer (queue, breaker, recovery)
//!     → response.rs (status mapping, Retry-After)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{SubmitRequest, X_REQUEST_ID};
pub use response::ApiError;
pub use server::{AppState, HttpServer};

//! Response shaping.
//!
//! # Responsibilities
//! - Map resilience errors to HTTP status codes and JSON bodies
//! - Set `Retry-After` from the recovery hint
//!
//! # Design Decisions
//! - Timeouts result in 504 Gateway Timeout, cancellation in 503
//! - `Retry-After` is whole seconds, rounded up

use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::backend::BackendId;
use crate::error::ResilienceError;

/// Wrapper turning a [`ResilienceError`] into an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub ResilienceError);

impl From<ResilienceError> for ApiError {
    fn from(err: ResilienceError) -> Self {
        Self(err)
    }
}

/// `Retry-After` value in seconds, rounded up.
pub fn retry_after_secs(delay: Duration) -> u64 {
    delay.as_millis().div_ceil(1000) as u64
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(self.0.to_body())).into_response();
        if let Some(delay) = self.0.retry_after() {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs(delay).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Availability {
    pub backend: BackendId,
    pub available: bool,
}

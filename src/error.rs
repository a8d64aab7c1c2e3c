//! Errors returned to callers of the resilience layer.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::backend::{BackendId, UnknownBackend};
use crate::resilience::classifier::ErrorKind;

/// Guidance attached to a terminal failure.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryHint {
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    pub fallback_available: bool,
    pub user_actions: Vec<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResilienceError {
    #[error("{backend} request timed out after {}ms", .after.as_millis())]
    TimedOut { backend: BackendId, after: Duration },

    #[error("{backend} request failed after {attempts} attempt(s): {last_error}")]
    Exhausted {
        backend: BackendId,
        kind: ErrorKind,
        attempts: u32,
        last_error: String,
        recovery: RecoveryHint,
    },

    #[error("{backend} request was cancelled")]
    Cancelled { backend: BackendId },

    #[error("{backend} queue is shutting down")]
    ShuttingDown { backend: BackendId },

    #[error(transparent)]
    UnknownBackend(#[from] UnknownBackend),
}

/// User-visible error shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub error_type: &'static str,
    pub message: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryHint>,
}

impl ResilienceError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ResilienceError::Exhausted { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ResilienceError::TimedOut { .. } => 504,
            ResilienceError::Exhausted { kind, .. } => kind.http_status(),
            ResilienceError::Cancelled { .. } | ResilienceError::ShuttingDown { .. } => 503,
            ResilienceError::UnknownBackend(_) => 404,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ResilienceError::TimedOut { .. } => "timeout",
            ResilienceError::Exhausted { kind, .. } => kind.as_str(),
            ResilienceError::Cancelled { .. } => "cancelled",
            ResilienceError::ShuttingDown { .. } => "shutting-down",
            ResilienceError::UnknownBackend(_) => "unknown-backend",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ResilienceError::TimedOut { .. } => "TIMEOUT",
            ResilienceError::Exhausted { kind, .. } => kind.code(),
            ResilienceError::Cancelled { .. } => "CANCELLED",
            ResilienceError::ShuttingDown { .. } => "SHUTTING_DOWN",
            ResilienceError::UnknownBackend(_) => "UNKNOWN_BACKEND",
        }
    }

    pub fn recovery(&self) -> Option<&RecoveryHint> {
        match self {
            ResilienceError::Exhausted { recovery, .. } => Some(recovery),
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.recovery()
            .and_then(|r| r.retry_after_ms)
            .map(Duration::from_millis)
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error_type: self.error_type(),
            message: self.to_string(),
            code: self.code(),
            recovery: self.recovery().cloned(),
        }
    }
}

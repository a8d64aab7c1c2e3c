//! Failure classification.
//!
//! Maps a raw [`BackendFailure`] onto exactly one [`ErrorKind`]. Rules run in a
//! fixed order and the first match wins; rate limiting is checked first since
//! a 429 is never ambiguous. Anything unmatched is `Unknown`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::backend::BackendFailure;

/// Error taxonomy shared by the planner, stats and the HTTP surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    RateLimit,
    ServiceUnavailable,
    Authentication,
    BadRequest,
    NetworkError,
    ModelLoading,
    Configuration,
    DataError,
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 9] = [
        ErrorKind::RateLimit,
        ErrorKind::ServiceUnavailable,
        ErrorKind::Authentication,
        ErrorKind::BadRequest,
        ErrorKind::NetworkError,
        ErrorKind::ModelLoading,
        ErrorKind::Configuration,
        ErrorKind::DataError,
        ErrorKind::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimit => "rate-limit",
            ErrorKind::ServiceUnavailable => "service-unavailable",
            ErrorKind::Authentication => "authentication",
            ErrorKind::BadRequest => "bad-request",
            ErrorKind::NetworkError => "network-error",
            ErrorKind::ModelLoading => "model-loading",
            ErrorKind::Configuration => "configuration",
            ErrorKind::DataError => "data-error",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::RateLimit => "RATE_LIMITED",
            ErrorKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorKind::Authentication => "AUTHENTICATION_FAILED",
            ErrorKind::BadRequest => "BAD_REQUEST",
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::ModelLoading => "MODEL_LOADING",
            ErrorKind::Configuration => "CONFIGURATION_ERROR",
            ErrorKind::DataError => "DATA_ERROR",
            ErrorKind::Unknown => "INTERNAL_ERROR",
        }
    }

    /// HTTP status used when this kind surfaces through a web API.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::RateLimit => 429,
            ErrorKind::ServiceUnavailable => 503,
            ErrorKind::ModelLoading => 503,
            ErrorKind::Authentication => 401,
            ErrorKind::BadRequest => 400,
            ErrorKind::DataError => 400,
            ErrorKind::NetworkError => 502,
            ErrorKind::Configuration => 503,
            ErrorKind::Unknown => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const RATE_LIMIT_HINTS: &[&str] = &["rate limit", "too many requests", "quota exceeded"];

const MODEL_LOADING_HINTS: &[&str] = &[
    "currently loading",
    "model is loading",
    "model loading",
    "loading model",
    "warming up",
];

const UNAVAILABLE_HINTS: &[&str] = &["service unavailable", "overloaded", "circuit breaker open"];

const AUTH_HINTS: &[&str] = &[
    "unauthorized",
    "forbidden",
    "invalid api key",
    "authentication",
];

const CONFIGURATION_HINTS: &[&str] = &["not configured", "missing api key", "configuration"];

const BAD_REQUEST_HINTS: &[&str] = &["bad request", "invalid request", "validation"];

const DATA_HINTS: &[&str] = &[
    "parse",
    "malformed",
    "decode",
    "unsupported format",
    "invalid audio",
    "empty input",
];

const NETWORK_HINTS: &[&str] = &[
    "timed out",
    "timeout",
    "connection refused",
    "connection reset",
    "econnrefused",
    "enotfound",
    "etimedout",
    "dns",
    "network",
    "socket hang up",
];

fn mentions(message: &str, hints: &[&str]) -> bool {
    hints.iter().any(|hint| message.contains(hint))
}

/// Classify a failure. Total and deterministic.
pub fn classify(failure: &BackendFailure) -> ErrorKind {
    let message = failure.message.to_lowercase();
    let status = failure.status;

    if status == Some(429) || mentions(&message, RATE_LIMIT_HINTS) {
        return ErrorKind::RateLimit;
    }
    if mentions(&message, MODEL_LOADING_HINTS) {
        return ErrorKind::ModelLoading;
    }
    if status == Some(503) || mentions(&message, UNAVAILABLE_HINTS) {
        return ErrorKind::ServiceUnavailable;
    }
    if matches!(status, Some(401 | 403)) || mentions(&message, AUTH_HINTS) {
        return ErrorKind::Authentication;
    }
    if mentions(&message, CONFIGURATION_HINTS) {
        return ErrorKind::Configuration;
    }
    if matches!(status, Some(400 | 422)) || mentions(&message, BAD_REQUEST_HINTS) {
        return ErrorKind::BadRequest;
    }
    if matches!(status, Some(413 | 415)) || mentions(&message, DATA_HINTS) {
        return ErrorKind::DataError;
    }
    if matches!(status, Some(408 | 502 | 504)) || mentions(&message, NETWORK_HINTS) {
        return ErrorKind::NetworkError;
    }
    ErrorKind::Unknown
}

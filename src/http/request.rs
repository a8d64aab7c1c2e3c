//! Request bodies and request-id plumbing.
//!
//! # Responsibilities
//! - Deserialize submission bodies into queue options
//! - Read the request ID assigned by the middleware stack
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Unset submission fields fall back to the queue defaults

use std::time::Duration;

use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::Value;

use crate::queue::{Priority, SubmitOptions};

pub const X_REQUEST_ID: &str = "x-request-id";

/// Body of `POST /v1/backends/{backend}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub payload: Value,
    #[serde(default)]
    pub priority: Priority,
    pub timeout_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

impl SubmitRequest {
    pub fn options(&self) -> SubmitOptions {
        let mut options = SubmitOptions::new().priority(self.priority);
        if let Some(ms) = self.timeout_ms {
            options = options.timeout(Duration::from_millis(ms));
        }
        if let Some(attempts) = self.max_attempts {
            options = options.max_attempts(attempts);
        }
        if let Some(ms) = self.retry_delay_ms {
            options = options.retry_delay(Duration::from_millis(ms));
        }
        options
    }
}

pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_body_uses_defaults() {
        let req: SubmitRequest = serde_json::from_value(json!({"payload": {"text": "hi"}})).unwrap();
        let options = req.options();
        assert_eq!(options.priority, Priority::Normal);
        assert!(options.timeout.is_none());
        assert!(options.max_attempts.is_none());
    }

    #[test]
    fn test_full_body() {
        let req: SubmitRequest = serde_json::from_value(json!({
            "payload": "hello",
            "priority": "high",
            "timeoutMs": 50,
            "maxAttempts": 1,
            "retryDelayMs": 250
        }))
        .unwrap();
        let options = req.options();
        assert_eq!(options.priority, Priority::High);
        assert_eq!(options.timeout, Some(Duration::from_millis(50)));
        assert_eq!(options.max_attempts, Some(1));
        assert_eq!(options.retry_delay, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_request_id_missing() {
        assert_eq!(request_id(&HeaderMap::new()), "unknown");
    }
}

//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, windows > 0)
//! - Check addresses and backend endpoints parse
//! - Detect duplicate backend blocks
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ResilienceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::ResilienceConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &ResilienceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind_address",
            format!("'{}' is not a socket address", config.server.bind_address),
        ));
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::new("server.request_timeout_secs", "must be > 0"));
    }

    let queue = &config.queue;
    if queue.default_timeout_ms == 0 {
        errors.push(ValidationError::new("queue.default_timeout_ms", "must be > 0"));
    }
    if queue.default_max_attempts == 0 {
        errors.push(ValidationError::new("queue.default_max_attempts", "must be > 0"));
    }
    if queue.max_retry_delay_ms < queue.base_retry_delay_ms {
        errors.push(ValidationError::new(
            "queue.max_retry_delay_ms",
            "must be >= queue.base_retry_delay_ms",
        ));
    }
    if queue.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("queue.sweep_interval_secs", "must be > 0"));
    }
    if queue.max_age_secs == 0 {
        errors.push(ValidationError::new("queue.max_age_secs", "must be > 0"));
    }
    if queue.aging_secs == Some(0) {
        errors.push(ValidationError::new("queue.aging_secs", "must be > 0 when set"));
    }

    let obs = &config.observability;
    if !LOG_LEVELS.contains(&obs.log_level.to_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", obs.log_level),
        ));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", obs.metrics_address),
        ));
    }

    let mut seen = HashSet::new();
    for backend in &config.backends {
        let prefix = format!("backends.{}", backend.name);
        if !seen.insert(backend.name) {
            errors.push(ValidationError::new(&prefix, "configured more than once"));
        }
        if let Some(endpoint) = &backend.endpoint {
            match Url::parse(endpoint) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => errors.push(ValidationError::new(
                    format!("{prefix}.endpoint"),
                    format!("unsupported scheme '{}'", url.scheme()),
                )),
                Err(e) => errors.push(ValidationError::new(
                    format!("{prefix}.endpoint"),
                    format!("invalid URL: {e}"),
                )),
            }
        }
        if backend.call_timeout_ms == 0 {
            errors.push(ValidationError::new(format!("{prefix}.call_timeout_ms"), "must be > 0"));
        }
        if backend.breaker.failure_threshold == 0 {
            errors.push(ValidationError::new(
                format!("{prefix}.breaker.failure_threshold"),
                "must be > 0",
            ));
        }
        if backend.rate_limit.max_per_window == 0 {
            errors.push(ValidationError::new(
                format!("{prefix}.rate_limit.max_per_window"),
                "must be > 0",
            ));
        }
        if backend.rate_limit.window_ms == 0 {
            errors.push(ValidationError::new(
                format!("{prefix}.rate_limit.window_ms"),
                "must be > 0",
            ));
        }
        if backend.rate_limit.concurrency == 0 {
            errors.push(ValidationError::new(
                format!("{prefix}.rate_limit.concurrency"),
                "must be > 0",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

//! Queue items, submission options and outcomes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use crate::backend::BackendId;
use crate::config::QueueConfig;
use crate::resilience::classifier::ErrorKind;
use crate::resilience::executor::StrategyRecord;
use crate::resilience::fallback::FallbackStrategy;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Tier index, 0 is served first.
    pub fn rank(&self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Queued => "queued",
            ItemStatus::Processing => "processing",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
            ItemStatus::TimedOut => "timed-out",
            ItemStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ItemStatus::Queued | ItemStatus::Processing)
    }
}

/// Per-submission overrides. Unset fields use the queue defaults.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub priority: Priority,
    pub timeout: Option<Duration>,
    pub max_attempts: Option<u32>,
    pub retry_delay: Option<Duration>,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }
}

/// One failed attempt, kept on the item for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptError {
    pub attempt: u32,
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl AttemptError {
    pub fn new(attempt: u32, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            attempt,
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: Uuid,
    pub backend: BackendId,
    pub payload: Arc<Value>,
    pub priority: Priority,
    /// First submission; the item deadline is measured from here.
    pub enqueued_at: Instant,
    /// Most recent entry into the pending tiers.
    pub queued_at: Instant,
    pub deadline: Instant,
    pub attempts: u32,
    pub max_attempts: u32,
    pub timeout: Duration,
    pub retry_delay: Duration,
    pub status: ItemStatus,
    pub errors: Vec<AttemptError>,
}

impl QueueItem {
    pub fn new(backend: BackendId, payload: Value, options: &SubmitOptions, defaults: &QueueConfig) -> Self {
        let now = Instant::now();
        let timeout = options.timeout.unwrap_or_else(|| defaults.default_timeout());
        Self {
            id: Uuid::new_v4(),
            backend,
            payload: Arc::new(payload),
            priority: options.priority,
            enqueued_at: now,
            queued_at: now,
            deadline: now + timeout,
            attempts: 0,
            max_attempts: options
                .max_attempts
                .unwrap_or(defaults.default_max_attempts)
                .max(1),
            timeout,
            retry_delay: options
                .retry_delay
                .unwrap_or_else(|| defaults.base_retry_delay()),
            status: ItemStatus::Queued,
            errors: Vec::new(),
        }
    }

    pub fn last_error(&self) -> Option<&AttemptError> {
        self.errors.last()
    }
}

/// The data handed to the processor for one attempt.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    pub id: Uuid,
    pub backend: BackendId,
    pub payload: Arc<Value>,
    pub attempt: u32,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub deadline: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeSource {
    Primary,
    Fallback,
}

/// Successful settlement of a submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub backend: BackendId,
    pub source: OutcomeSource,
    pub result: Value,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<FallbackStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<Vec<StrategyRecord>>,
}

impl Outcome {
    pub fn primary(backend: BackendId, result: Value, attempts: u32) -> Self {
        Self {
            backend,
            source: OutcomeSource::Primary,
            result,
            attempts,
            kind: None,
            strategy: None,
            recovery: None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.source == OutcomeSource::Fallback
    }
}

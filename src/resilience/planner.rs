//! Recovery planning.
//!
//! Maps a classified failure to an ordered list of strategies, a suggested
//! retry delay and whether degraded output may be offered. Planning is pure
//! apart from the random jitter on rate-limit backoff.

use std::time::Duration;

use serde::Serialize;

use crate::backend::BackendFailure;
use crate::resilience::backoff::{calculate_backoff, parse_retry_after, with_jitter, MAX_JITTER};
use crate::resilience::circuit_breaker::BreakerSnapshot;
use crate::resilience::classifier::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    Backoff,
    #[serde(rename = "re-queue")]
    Requeue,
    OpenBreaker,
    Fallback,
    RetryWithBackoff,
    OfflineFallback,
    Notify,
    ValidateInput,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Backoff => "backoff",
            Strategy::Requeue => "re-queue",
            Strategy::OpenBreaker => "open-breaker",
            Strategy::Fallback => "fallback",
            Strategy::RetryWithBackoff => "retry-with-backoff",
            Strategy::OfflineFallback => "offline-fallback",
            Strategy::Notify => "notify",
            Strategy::ValidateInput => "validate-input",
        }
    }

    /// Strategies that put the item back on the queue.
    pub fn is_retry(&self) -> bool {
        matches!(
            self,
            Strategy::Backoff | Strategy::Requeue | Strategy::RetryWithBackoff
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPlan {
    pub kind: ErrorKind,
    pub strategies: Vec<Strategy>,
    pub fallback_available: bool,
    pub retry_after: Option<Duration>,
}

/// Timing constants used when building plans.
#[derive(Debug, Clone)]
pub struct RecoveryPlanner {
    pub rate_limit_base: Duration,
    pub rate_limit_cap: Duration,
    pub unavailable_delay: Duration,
    pub network_delay: Duration,
}

impl Default for RecoveryPlanner {
    fn default() -> Self {
        Self {
            rate_limit_base: Duration::from_secs(1),
            rate_limit_cap: Duration::from_secs(60),
            unavailable_delay: Duration::from_secs(30),
            network_delay: Duration::from_secs(5),
        }
    }
}

impl RecoveryPlanner {
    pub fn plan(
        &self,
        kind: ErrorKind,
        breaker: &BreakerSnapshot,
        failure: &BackendFailure,
        attempt: u32,
    ) -> RecoveryPlan {
        use Strategy::*;

        let (mut strategies, retry_after, fallback_available) = match kind {
            ErrorKind::RateLimit => (
                vec![Backoff, Requeue],
                Some(self.rate_limit_delay(breaker, failure, attempt)),
                true,
            ),
            ErrorKind::ServiceUnavailable | ErrorKind::ModelLoading => (
                vec![OpenBreaker, Fallback],
                Some(self.unavailable_delay),
                true,
            ),
            ErrorKind::NetworkError => (
                vec![RetryWithBackoff, OfflineFallback],
                Some(self.network_delay),
                true,
            ),
            ErrorKind::Authentication => (vec![Fallback], None, true),
            ErrorKind::Configuration => (vec![Fallback, Notify], None, true),
            ErrorKind::BadRequest | ErrorKind::DataError => (vec![ValidateInput], None, false),
            ErrorKind::Unknown => (vec![Fallback], None, true),
        };

        if !breaker.is_available() {
            strategies.retain(|s| !s.is_retry());
        }

        RecoveryPlan {
            kind,
            strategies,
            fallback_available,
            retry_after,
        }
    }

    /// `Retry-After` when the backend sent one, else exponential backoff on
    /// the item's attempt count. Both are capped at `rate_limit_cap`.
    fn rate_limit_delay(&self, breaker: &BreakerSnapshot, failure: &BackendFailure, attempt: u32) -> Duration {
        if let Some(delay) = failure.header("retry-after").and_then(parse_retry_after) {
            return delay.min(self.rate_limit_cap);
        }
        let exponent = breaker.consecutive_failures.max(attempt).max(1);
        with_jitter(
            calculate_backoff(exponent, self.rate_limit_base, self.rate_limit_cap),
            MAX_JITTER,
        )
    }
}

/// Suggestions shown to the end user alongside an error.
pub fn user_actions(kind: ErrorKind) -> Vec<&'static str> {
    match kind {
        ErrorKind::RateLimit => vec!["Wait a moment before trying again"],
        ErrorKind::ServiceUnavailable | ErrorKind::ModelLoading => vec![
            "The service is temporarily unavailable; try again in about 30 seconds",
            "A simplified response may be shown in the meantime",
        ],
        ErrorKind::NetworkError => vec![
            "Check your internet connection",
            "Try again in a few seconds",
        ],
        ErrorKind::Authentication | ErrorKind::Configuration => {
            vec!["This feature is unavailable right now; our team has been notified"]
        }
        ErrorKind::BadRequest => vec!["Check your input and try again"],
        ErrorKind::DataError => vec![
            "Make sure the file or audio is in a supported format",
            "Try recording or uploading again",
        ],
        ErrorKind::Unknown => vec!["Try again later"],
    }
}

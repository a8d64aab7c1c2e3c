//! Aggregate queue and recovery statistics.
//!
//! Counters are global across backends, with per-kind and per-backend error
//! breakdowns. The breakdowns count settled items by their final error kind,
//! so retries of one item count once; `failed_attempts` counts every attempt.
//! Averages are maintained incrementally so no samples are kept.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::backend::BackendId;
use crate::queue::item::ItemStatus;
use crate::resilience::classifier::ErrorKind;

/// Incremental mean: `avg += (x - avg) / n`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningAverage {
    mean: f64,
    samples: u64,
}

impl RunningAverage {
    pub fn record(&mut self, value: f64) {
        self.samples += 1;
        self.mean += (value - self.mean) / self.samples as f64;
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    processed: u64,
    failed: u64,
    timed_out: u64,
    cancelled: u64,
    queued: u64,
    fallbacks: u64,
    recovery_attempts: u64,
    recovery_successes: u64,
    failed_attempts: u64,
    by_kind: BTreeMap<ErrorKind, u64>,
    by_backend: BTreeMap<BackendId, u64>,
    wait: RunningAverage,
    processing: RunningAverage,
}

/// Serializable copy of the counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total: u64,
    pub processed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub queued: u64,
    pub fallbacks: u64,
    pub recovery_attempts: u64,
    pub recovery_successes: u64,
    pub failed_attempts: u64,
    #[serde(rename = "byType")]
    pub by_kind: BTreeMap<ErrorKind, u64>,
    pub by_backend: BTreeMap<BackendId, u64>,
    pub average_wait_ms: f64,
    pub average_processing_ms: f64,
}

impl StatsSnapshot {
    pub fn errors_of(&self, kind: ErrorKind) -> u64 {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
pub struct StatsAggregator {
    inner: Mutex<Counters>,
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Counters) -> R) -> R {
        let mut inner = self.inner.lock().expect("stats mutex poisoned");
        f(&mut inner)
    }

    /// A new submission entered the queue.
    pub fn record_enqueued(&self) {
        self.with(|c| {
            c.total += 1;
            c.queued += 1;
        });
    }

    /// A failed item went back to the queue for another attempt.
    pub fn record_requeued(&self) {
        self.with(|c| c.queued += 1);
    }

    /// An item left the queue for processing after waiting `wait`.
    pub fn record_dispatched(&self, wait: Duration) {
        self.with(|c| {
            c.queued = c.queued.saturating_sub(1);
            c.wait.record(millis(wait));
        });
    }

    pub fn record_processing(&self, elapsed: Duration) {
        self.with(|c| c.processing.record(millis(elapsed)));
    }

    pub fn record_failed_attempt(&self) {
        self.with(|c| c.failed_attempts += 1);
    }

    /// An item settled with `kind` as its final error, whether it failed or
    /// was answered by a fallback.
    pub fn record_error(&self, backend: BackendId, kind: ErrorKind) {
        self.with(|c| {
            *c.by_kind.entry(kind).or_default() += 1;
            *c.by_backend.entry(backend).or_default() += 1;
        });
    }

    pub fn record_recovery(&self, success: bool) {
        self.with(|c| {
            c.recovery_attempts += 1;
            if success {
                c.recovery_successes += 1;
            }
        });
    }

    pub fn record_fallback(&self) {
        self.with(|c| c.fallbacks += 1);
    }

    /// An item reached its terminal status. `was_queued` is true when it was
    /// still waiting in the queue rather than processing.
    pub fn record_settled(&self, status: ItemStatus, was_queued: bool) {
        self.with(|c| {
            if was_queued {
                c.queued = c.queued.saturating_sub(1);
            }
            match status {
                ItemStatus::Completed => c.processed += 1,
                ItemStatus::Failed => c.failed += 1,
                ItemStatus::TimedOut => c.timed_out += 1,
                ItemStatus::Cancelled => c.cancelled += 1,
                ItemStatus::Queued | ItemStatus::Processing => {}
            }
        });
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.with(|c| StatsSnapshot {
            total: c.total,
            processed: c.processed,
            failed: c.failed,
            timed_out: c.timed_out,
            cancelled: c.cancelled,
            queued: c.queued,
            fallbacks: c.fallbacks,
            recovery_attempts: c.recovery_attempts,
            recovery_successes: c.recovery_successes,
            failed_attempts: c.failed_attempts,
            by_kind: c.by_kind.clone(),
            by_backend: c.by_backend.clone(),
            average_wait_ms: c.wait.mean(),
            average_processing_ms: c.processing.mean(),
        })
    }
}

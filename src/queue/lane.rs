//! Per-backend rate-limited priority queue.
//!
//! # Data Flow
//! ```text
//! submit()
//!     → QueueItem tracked + id pushed onto its priority tier
//!     → dispatcher woken
//! dispatcher
//!     → RateWindow::try_acquire (sliding window + concurrency)
//!     → Err(wait): sleep `wait`, or until a slot is released
//!     → Ok: pop highest tier, spawn attempt
//! attempt
//!     → ItemProcessor::process raced against the item deadline
//!     → slot released, Disposition applied (settle or delayed re-queue)
//! ```
//!
//! # Design Decisions
//! - Removal from the tracked map is the single settlement point, so every
//!   item resolves exactly once no matter which path gets there first
//! - Locks are taken in the order pending → window and never held across `.await`
//! - A timed-out attempt is dropped at the deadline, freeing its slot
//! - Settling an item aborts its running attempt, so a swept or cancelled
//!   item never keeps a slot or reports to the breaker afterwards

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot, Notify};
use tokio::time::{self, Instant};
use uuid::Uuid;

use crate::backend::BackendId;
use crate::config::{QueueConfig, RateLimitConfig};
use crate::error::ResilienceError;
use crate::events::{EventBus, ResilienceEvent};
use crate::health::stats::StatsAggregator;
use crate::observability::metrics;
use crate::queue::item::{
    AttemptContext, AttemptError, ItemStatus, Outcome, QueueItem, SubmitOptions,
};
use crate::queue::rate_limit::RateWindow;
use crate::queue::tiers::TieredQueue;

type Settlement = Result<Outcome, ResilienceError>;

/// What to do with an item after one attempt.
#[derive(Debug)]
pub enum Disposition {
    Completed(Outcome),
    Retry {
        delay: Duration,
        error: AttemptError,
    },
    Failed {
        error: AttemptError,
        rejection: ResilienceError,
    },
}

/// Runs one attempt of a queued item.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn process(&self, attempt: AttemptContext) -> Disposition;
}

struct Tracked {
    item: QueueItem,
    responder: Option<oneshot::Sender<Settlement>>,
    /// Fires (or drops) when the item settles while an attempt is running.
    abort: Option<oneshot::Sender<()>>,
}

struct LaneInner {
    backend: BackendId,
    defaults: QueueConfig,
    pending: Mutex<TieredQueue<Uuid>>,
    items: DashMap<Uuid, Tracked>,
    window: Mutex<RateWindow>,
    wake: Notify,
    processor: Arc<dyn ItemProcessor>,
    stats: Arc<StatsAggregator>,
    events: EventBus,
    closed: AtomicBool,
}

/// Handle to a backend's queue. Cheap to clone.
#[derive(Clone)]
pub struct RateLimitedQueue {
    inner: Arc<LaneInner>,
}

/// Pending result of a submission.
pub struct Submission {
    id: Uuid,
    deadline: Instant,
    rx: oneshot::Receiver<Settlement>,
    lane: RateLimitedQueue,
}

impl RateLimitedQueue {
    /// Create the queue and start its dispatcher. Must run inside a tokio runtime.
    pub fn start(
        backend: BackendId,
        defaults: QueueConfig,
        limits: &RateLimitConfig,
        processor: Arc<dyn ItemProcessor>,
        stats: Arc<StatsAggregator>,
        events: EventBus,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let inner = Arc::new(LaneInner {
            backend,
            defaults,
            pending: Mutex::new(TieredQueue::new()),
            items: DashMap::new(),
            window: Mutex::new(RateWindow::new(limits)),
            wake: Notify::new(),
            processor,
            stats,
            events,
            closed: AtomicBool::new(false),
        });
        tokio::spawn(dispatch_loop(inner.clone(), shutdown));
        Self { inner }
    }

    pub fn backend(&self) -> BackendId {
        self.inner.backend
    }

    /// Enqueue a payload. The returned [`Submission`] settles exactly once.
    pub fn submit(&self, payload: Value, options: SubmitOptions) -> Submission {
        let item = QueueItem::new(self.inner.backend, payload, &options, &self.inner.defaults);
        let (tx, rx) = oneshot::channel();
        let submission = Submission {
            id: item.id,
            deadline: item.deadline,
            rx,
            lane: self.clone(),
        };

        if self.inner.closed.load(Ordering::Acquire) {
            let _ = tx.send(Err(ResilienceError::ShuttingDown {
                backend: self.inner.backend,
            }));
            return submission;
        }

        tracing::debug!(
            backend = %self.inner.backend,
            item_id = %item.id,
            priority = ?item.priority,
            max_attempts = item.max_attempts,
            "Item enqueued"
        );
        let (id, priority, at) = (item.id, item.priority, item.enqueued_at);
        self.inner.items.insert(
            id,
            Tracked {
                item,
                responder: Some(tx),
                abort: None,
            },
        );
        self.inner.stats.record_enqueued();
        self.inner
            .pending
            .lock()
            .expect("queue pending mutex poisoned")
            .push(id, priority, at);
        if self.inner.closed.load(Ordering::Acquire) {
            // Raced with close(); nothing will dispatch this item.
            self.inner.settle(
                id,
                ItemStatus::Cancelled,
                Err(ResilienceError::ShuttingDown {
                    backend: self.inner.backend,
                }),
            );
            return submission;
        }
        self.inner.report_depth();
        self.inner.wake.notify_one();
        submission
    }

    /// Tracked items: queued, waiting to retry, or processing.
    pub fn len(&self) -> usize {
        self.inner.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.is_empty()
    }

    /// Items currently waiting in the priority tiers.
    pub fn pending(&self) -> usize {
        self.inner
            .pending
            .lock()
            .expect("queue pending mutex poisoned")
            .len()
    }

    pub fn in_flight(&self) -> usize {
        self.inner
            .window
            .lock()
            .expect("queue window mutex poisoned")
            .in_flight()
    }

    /// Cancel every item still waiting in the tiers. Returns how many were cancelled.
    pub fn clear(&self) -> usize {
        let ids = self
            .inner
            .pending
            .lock()
            .expect("queue pending mutex poisoned")
            .drain();
        let backend = self.inner.backend;
        let cancelled = ids
            .into_iter()
            .filter(|id| {
                self.inner.settle(
                    *id,
                    ItemStatus::Cancelled,
                    Err(ResilienceError::Cancelled { backend }),
                )
            })
            .count();
        if cancelled > 0 {
            tracing::info!(backend = %backend, cancelled, "Queue cleared");
        }
        cancelled
    }

    /// Time out items that passed their deadline or exceeded `max_age`.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let stale: Vec<Uuid> = self
            .inner
            .items
            .iter()
            .filter(|entry| {
                let item = &entry.value().item;
                now >= item.deadline || now.duration_since(item.enqueued_at) >= max_age
            })
            .map(|entry| *entry.key())
            .collect();
        let expired = stale.into_iter().filter(|id| self.inner.expire(*id)).count();
        if expired > 0 {
            tracing::info!(backend = %self.inner.backend, expired, "Swept stale queue items");
        }
        expired
    }
}

impl Submission {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the item to settle, enforcing its deadline.
    pub async fn wait(self) -> Result<Outcome, ResilienceError> {
        let Submission {
            id,
            deadline,
            mut rx,
            lane,
        } = self;
        let backend = lane.inner.backend;
        match time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(settlement)) => settlement,
            Ok(Err(_)) => Err(ResilienceError::Cancelled { backend }),
            Err(_) => {
                lane.inner.expire(id);
                rx.await
                    .unwrap_or(Err(ResilienceError::Cancelled { backend }))
            }
        }
    }
}

impl LaneInner {
    /// Start every admissible item. Returns how long to wait when admission was deferred.
    fn drain_admissible(self: &Arc<Self>) -> Option<Duration> {
        loop {
            let now = Instant::now();
            let id = {
                let mut pending = self.pending.lock().expect("queue pending mutex poisoned");
                if pending.is_empty() {
                    return None;
                }
                let mut window = self.window.lock().expect("queue window mutex poisoned");
                if let Err(wait) = window.try_acquire(now) {
                    tracing::trace!(
                        backend = %self.backend,
                        in_window = window.window_count(now),
                        in_flight = window.in_flight(),
                        wait_ms = wait.as_millis() as u64,
                        "Admission deferred"
                    );
                    return Some(wait);
                }
                match pending.pop(now, self.defaults.aging()) {
                    Some(id) => id,
                    None => {
                        window.release();
                        return None;
                    }
                }
            };
            self.start(id, now);
        }
    }

    fn start(self: &Arc<Self>, id: Uuid, now: Instant) {
        let started = self.items.get_mut(&id).and_then(|mut entry| {
            let tracked = &mut *entry;
            let item = &mut tracked.item;
            if now >= item.deadline {
                return None;
            }
            item.status = ItemStatus::Processing;
            item.attempts += 1;
            let attempt = AttemptContext {
                id,
                backend: item.backend,
                payload: item.payload.clone(),
                attempt: item.attempts,
                max_attempts: item.max_attempts,
                retry_delay: item.retry_delay,
                deadline: item.deadline,
            };
            let wait = now.duration_since(item.queued_at);
            let (abort_tx, abort_rx) = oneshot::channel();
            tracked.abort = Some(abort_tx);
            Some((wait, abort_rx, attempt))
        });

        let Some((wait, abort, attempt)) = started else {
            self.release_slot();
            self.expire(id);
            return;
        };

        self.stats.record_dispatched(wait);
        metrics::record_queue_wait(self.backend, wait);
        self.report_depth();
        tracing::debug!(
            backend = %self.backend,
            item_id = %id,
            attempt = attempt.attempt,
            wait_ms = wait.as_millis() as u64,
            "Dispatching item"
        );
        tokio::spawn(run_attempt(self.clone(), attempt, abort));
    }

    fn release_slot(&self) {
        self.window
            .lock()
            .expect("queue window mutex poisoned")
            .release();
        self.wake.notify_one();
    }

    fn record_attempt_error(&self, id: Uuid, error: AttemptError) {
        if let Some(mut entry) = self.items.get_mut(&id) {
            entry.item.errors.push(error);
        }
    }

    /// Put a failed item back on its tier, unless it settled meanwhile.
    fn requeue(&self, id: Uuid) {
        let now = Instant::now();
        let requeued = {
            // Held across the status flip so a concurrent settle sees a consistent tier.
            let mut pending = self.pending.lock().expect("queue pending mutex poisoned");
            let queued = self.items.get_mut(&id).and_then(|mut entry| {
                let item = &mut entry.item;
                if now >= item.deadline {
                    return None;
                }
                item.status = ItemStatus::Queued;
                item.queued_at = now;
                Some(item.priority)
            });
            if let Some(priority) = queued {
                pending.push(id, priority, now);
                self.stats.record_requeued();
            }
            queued.is_some()
        };
        if requeued {
            self.report_depth();
            self.wake.notify_one();
        } else {
            self.expire(id);
        }
    }

    fn expire(&self, id: Uuid) -> bool {
        let Some(after) = self.items.get(&id).map(|entry| entry.item.timeout) else {
            return false;
        };
        let expired = self.settle(
            id,
            ItemStatus::TimedOut,
            Err(ResilienceError::TimedOut {
                backend: self.backend,
                after,
            }),
        );
        if expired {
            tracing::warn!(backend = %self.backend, item_id = %id, "Item timed out");
        }
        expired
    }

    /// Resolve an item. Returns false when it was already settled.
    fn settle(&self, id: Uuid, status: ItemStatus, settlement: Settlement) -> bool {
        let Some((_, mut tracked)) = self.items.remove(&id) else {
            return false;
        };
        debug_assert!(status.is_terminal());
        if let Some(abort) = tracked.abort.take() {
            let _ = abort.send(());
        }
        let was_queued = tracked.item.status == ItemStatus::Queued;
        if was_queued {
            self.pending
                .lock()
                .expect("queue pending mutex poisoned")
                .remove(&id);
        }
        tracked.item.status = status;

        let item = &tracked.item;
        self.stats.record_settled(status, was_queued);
        let final_kind = match &settlement {
            Ok(outcome) => outcome.kind,
            Err(rejection) => rejection.kind(),
        };
        if let Some(kind) = final_kind {
            self.stats.record_error(self.backend, kind);
        }
        metrics::record_request(self.backend, status.as_str(), item.enqueued_at.elapsed());
        self.report_depth();
        self.events.publish(ResilienceEvent::ItemSettled {
            backend: self.backend,
            id,
            status,
            attempts: item.attempts,
        });
        tracing::debug!(
            backend = %self.backend,
            item_id = %id,
            status = status.as_str(),
            attempts = item.attempts,
            errors = item.errors.len(),
            last_error = ?item.last_error().map(|e| e.kind),
            "Item settled"
        );

        if let Some(responder) = tracked.responder.take() {
            if responder.send(settlement).is_err() {
                tracing::trace!(item_id = %id, "Submitter dropped before settlement");
            }
        }
        true
    }

    fn report_depth(&self) {
        metrics::set_queue_depth(self.backend, self.items.len());
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let ids: Vec<Uuid> = self.items.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.settle(
                id,
                ItemStatus::Cancelled,
                Err(ResilienceError::ShuttingDown {
                    backend: self.backend,
                }),
            );
        }
    }
}

async fn run_attempt(
    lane: Arc<LaneInner>,
    attempt: AttemptContext,
    mut abort: oneshot::Receiver<()>,
) {
    let id = attempt.id;
    let deadline = attempt.deadline;
    let disposition = tokio::select! {
        disposition = lane.processor.process(attempt) => Some(disposition),
        _ = time::sleep_until(deadline) => None,
        _ = &mut abort => {
            lane.release_slot();
            tracing::debug!(backend = %lane.backend, item_id = %id, "Attempt abandoned; item already settled");
            return;
        }
    };
    lane.release_slot();

    match disposition {
        None => {
            lane.expire(id);
        }
        Some(Disposition::Completed(outcome)) => {
            lane.settle(id, ItemStatus::Completed, Ok(outcome));
        }
        Some(Disposition::Failed { error, rejection }) => {
            lane.record_attempt_error(id, error);
            lane.settle(id, ItemStatus::Failed, Err(rejection));
        }
        Some(Disposition::Retry { delay, error }) => {
            tracing::debug!(
                backend = %lane.backend,
                item_id = %id,
                attempt = error.attempt,
                kind = %error.kind,
                delay_ms = delay.as_millis() as u64,
                "Re-queueing after failure"
            );
            lane.record_attempt_error(id, error);
            tokio::select! {
                _ = time::sleep_until((Instant::now() + delay).min(deadline)) => lane.requeue(id),
                _ = &mut abort => {}
            }
        }
    }
}

async fn dispatch_loop(lane: Arc<LaneInner>, mut shutdown: broadcast::Receiver<()>) {
    tracing::debug!(backend = %lane.backend, "Queue dispatcher started");
    loop {
        let deferred = lane.drain_admissible();
        if let Some(wait) = deferred {
            lane.events.publish(ResilienceEvent::AdmissionDeferred {
                backend: lane.backend,
                wait_ms: wait.as_millis() as u64,
            });
        }
        let idle = async {
            match deferred {
                Some(wait) => time::sleep(wait).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = lane.wake.notified() => {}
            _ = idle => {}
            _ = shutdown.recv() => {
                tracing::info!(backend = %lane.backend, "Queue dispatcher shutting down");
                lane.close();
                break;
            }
        }
    }
}

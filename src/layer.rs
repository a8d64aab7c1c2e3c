//! The per-process registry tying every backend's breaker, fallback and
//! queue together.
//!
//! # Data Flow
//! ```text
//! submit(backend, payload, options)
//!     → RateLimitedQueue (admission, priority, deadline)
//!     → RecoveryPipeline (breaker gate, call, classify, plan, execute)
//!     → Outcome (primary or fallback) | ResilienceError
//! ```
//!
//! # Design Decisions
//! - One registry object per process (or per test); no globals
//! - Every known backend gets a slot at construction; slots live as long as the layer
//! - Dropping the layer triggers shutdown so background tasks never outlive it

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::backend::{BackendCaller, BackendId};
use crate::config::ResilienceConfig;
use crate::error::ResilienceError;
use crate::events::{EventBus, ResilienceEvent};
use crate::health::report::{self, BackendHealth, HealthReport};
use crate::health::{HealthMonitor, StatsAggregator, StatsSnapshot};
use crate::lifecycle::{schedule_every, Shutdown, TaskHandle};
use crate::observability::metrics;
use crate::queue::{Outcome, RateLimitedQueue, Submission, SubmitOptions};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::resilience::executor::RecoveryExecutor;
use crate::resilience::fallback::FallbackResponder;
use crate::resilience::pipeline::RecoveryPipeline;

struct BackendSlot {
    breaker: Arc<CircuitBreaker>,
    fallback: Arc<FallbackResponder>,
    queue: RateLimitedQueue,
}

pub struct ResilienceLayer {
    config: Arc<ResilienceConfig>,
    slots: [BackendSlot; 3],
    stats: Arc<StatsAggregator>,
    events: EventBus,
    shutdown: Shutdown,
    sweeps: Vec<TaskHandle>,
}

impl ResilienceLayer {
    /// Build the registry and start its background tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: ResilienceConfig, caller: Arc<dyn BackendCaller>) -> Self {
        let config = Arc::new(config);
        let events = EventBus::new(config.observability.event_capacity);
        let stats = Arc::new(StatsAggregator::new());
        let shutdown = Shutdown::new();

        let slots = BackendId::ALL.map(|id| {
            let backend_config = config.backend(id);
            let breaker = Arc::new(CircuitBreaker::new(
                id,
                &backend_config.breaker,
                events.clone(),
            ));
            let fallback = Arc::new(FallbackResponder::new(id, &backend_config.fallback));
            let pipeline = RecoveryPipeline::new(
                &backend_config,
                &config.queue,
                caller.clone(),
                breaker.clone(),
                fallback.clone(),
                RecoveryExecutor::new(stats.clone(), events.clone()),
                stats.clone(),
            );
            let queue = RateLimitedQueue::start(
                id,
                config.queue.clone(),
                &backend_config.rate_limit,
                Arc::new(pipeline),
                stats.clone(),
                events.clone(),
                shutdown.subscribe(),
            );
            metrics::record_breaker_state(id, CircuitState::Closed);
            BackendSlot {
                breaker,
                fallback,
                queue,
            }
        });

        let max_age = config.queue.max_age();
        let sweeps = slots
            .iter()
            .map(|slot| {
                let queue = slot.queue.clone();
                schedule_every(config.queue.sweep_interval(), move || {
                    let queue = queue.clone();
                    async move {
                        queue.sweep(max_age);
                    }
                })
            })
            .collect();

        tokio::spawn(HealthMonitor::new(events.subscribe()).run(shutdown.subscribe()));

        tracing::info!(
            backends = BackendId::ALL.len(),
            max_attempts = config.queue.default_max_attempts,
            timeout_ms = config.queue.default_timeout_ms,
            aging = ?config.queue.aging(),
            event_subscribers = events.subscriber_count(),
            "Resilience layer started"
        );

        Self {
            config,
            slots,
            stats,
            events,
            shutdown,
            sweeps,
        }
    }

    fn slot(&self, backend: BackendId) -> &BackendSlot {
        &self.slots[backend.index()]
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Enqueue without waiting; the returned submission settles exactly once.
    pub fn enqueue(&self, backend: BackendId, payload: Value, options: SubmitOptions) -> Submission {
        self.slot(backend).queue.submit(payload, options)
    }

    /// Enqueue and wait for the settled result.
    pub async fn submit(
        &self,
        backend: BackendId,
        payload: Value,
        options: SubmitOptions,
    ) -> Result<Outcome, ResilienceError> {
        self.enqueue(backend, payload, options).wait().await
    }

    pub fn is_available(&self, backend: BackendId) -> bool {
        self.slot(backend).breaker.is_available()
    }

    pub fn breaker(&self, backend: BackendId) -> &Arc<CircuitBreaker> {
        &self.slot(backend).breaker
    }

    pub fn queue_len(&self, backend: BackendId) -> usize {
        self.slot(backend).queue.len()
    }

    /// Cancel every item still waiting for `backend`.
    pub fn clear(&self, backend: BackendId) -> usize {
        self.slot(backend).queue.clear()
    }

    /// Run the age sweep on every backend now.
    pub fn sweep(&self) -> usize {
        let max_age = self.config.queue.max_age();
        self.slots.iter().map(|slot| slot.queue.sweep(max_age)).sum()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn health_report(&self) -> HealthReport {
        let threshold = self.config.health.failure_trend_threshold;
        let per_backend: BTreeMap<BackendId, BackendHealth> = BackendId::ALL
            .into_iter()
            .map(|id| {
                let slot = self.slot(id);
                let breaker = slot.breaker.snapshot();
                let fallback_enabled = slot.fallback.is_enabled();
                let health = BackendHealth {
                    healthy: report::is_healthy(&breaker, threshold),
                    available: breaker.is_available(),
                    breaker,
                    queue_length: slot.queue.len(),
                    fallback_enabled,
                    active_fallback: slot
                        .fallback
                        .active_strategy()
                        .filter(|_| fallback_enabled),
                };
                (id, health)
            })
            .collect();

        HealthReport {
            overall_health: report::overall(per_backend.values()),
            per_backend,
            stats: self.stats.snapshot(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResilienceEvent> {
        self.events.subscribe()
    }

    /// Stop background tasks and settle every tracked item.
    pub fn shutdown(&self) {
        for sweep in &self.sweeps {
            sweep.cancel();
        }
        self.shutdown.trigger();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_triggered()
    }
}

impl Drop for ResilienceLayer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendFailure;
    use crate::health::OverallHealth;
    use async_trait::async_trait;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl BackendCaller for Echo {
        async fn call(&self, backend: BackendId, payload: &Value) -> Result<Value, BackendFailure> {
            Ok(json!({"backend": backend, "echo": payload}))
        }
    }

    #[tokio::test]
    async fn test_submit_round_trip() {
        let layer = ResilienceLayer::new(ResilienceConfig::default(), Arc::new(Echo));
        let outcome = layer
            .submit(BackendId::TextToSpeech, json!({"text": "hi"}), SubmitOptions::new())
            .await
            .unwrap();
        assert!(!outcome.is_fallback());
        assert_eq!(outcome.result["backend"], "text-to-speech");
        assert_eq!(outcome.attempts, 1);
        assert_eq!(layer.queue_len(BackendId::TextToSpeech), 0);
        assert_eq!(layer.stats().processed, 1);
    }

    #[tokio::test]
    async fn test_fresh_layer_is_healthy() {
        let layer = ResilienceLayer::new(ResilienceConfig::default(), Arc::new(Echo));
        let report = layer.health_report();
        assert_eq!(report.overall_health, OverallHealth::Healthy);
        assert_eq!(report.per_backend.len(), 3);
        assert!(BackendId::ALL.into_iter().all(|id| layer.is_available(id)));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["overallHealth"], "healthy");
        assert_eq!(json["perBackend"]["speech-to-text"]["breaker"]["state"], "closed");
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let layer = ResilienceLayer::new(ResilienceConfig::default(), Arc::new(Echo));
        layer.shutdown();
        assert!(layer.is_shut_down());
        tokio::task::yield_now().await;
        let err = layer
            .submit(BackendId::SpeechToText, json!({}), SubmitOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::ShuttingDown { .. }));
    }
}

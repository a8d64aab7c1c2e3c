//! One queued attempt, end to end.
//!
//! Breaker gate → backend call (bounded by the call timeout) → breaker update
//! → classification → plan → execution. The result is a [`Disposition`] the
//! queue applies to the item.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{self, Instant};

use crate::backend::{BackendCaller, BackendFailure, BackendId};
use crate::config::{BackendConfig, QueueConfig};
use crate::error::{RecoveryHint, ResilienceError};
use crate::health::stats::StatsAggregator;
use crate::observability::{metrics, redact};
use crate::queue::{AttemptContext, AttemptError, Disposition, ItemProcessor, Outcome, OutcomeSource};
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::classifier::{classify, ErrorKind};
use crate::resilience::executor::{RecoveryContext, RecoveryExecutor, Resolution};
use crate::resilience::fallback::FallbackResponder;
use crate::resilience::planner::{user_actions, RecoveryPlanner};

pub struct RecoveryPipeline {
    backend: BackendId,
    caller: Arc<dyn BackendCaller>,
    breaker: Arc<CircuitBreaker>,
    fallback: Arc<FallbackResponder>,
    planner: RecoveryPlanner,
    executor: RecoveryExecutor,
    stats: Arc<StatsAggregator>,
    call_timeout: Duration,
    retry_cap: Duration,
    max_jitter: Duration,
}

impl RecoveryPipeline {
    pub fn new(
        config: &BackendConfig,
        queue: &QueueConfig,
        caller: Arc<dyn BackendCaller>,
        breaker: Arc<CircuitBreaker>,
        fallback: Arc<FallbackResponder>,
        executor: RecoveryExecutor,
        stats: Arc<StatsAggregator>,
    ) -> Self {
        Self {
            backend: config.name,
            caller,
            breaker,
            fallback,
            planner: RecoveryPlanner::default(),
            executor,
            stats,
            call_timeout: config.call_timeout(),
            retry_cap: queue.max_retry_delay(),
            max_jitter: queue.max_jitter(),
        }
    }

    async fn call(&self, attempt: &AttemptContext) -> Result<serde_json::Value, BackendFailure> {
        match time::timeout(self.call_timeout, self.caller.call(self.backend, &attempt.payload)).await {
            Ok(result) => result,
            Err(_) => Err(BackendFailure::new(format!(
                "request timed out after {}ms",
                self.call_timeout.as_millis()
            ))),
        }
    }

    fn recover(&self, attempt: &AttemptContext, failure: BackendFailure, reached_backend: bool) -> Disposition {
        let kind = classify(&failure);
        self.stats.record_failed_attempt();
        metrics::record_attempt_failure(self.backend, kind);
        tracing::warn!(
            backend = %self.backend,
            item_id = %attempt.id,
            attempt = attempt.attempt,
            kind = %kind,
            status = ?failure.status,
            error = %failure,
            "Backend attempt failed"
        );
        tracing::debug!(
            backend = %self.backend,
            item_id = %attempt.id,
            payload = %redact::redact(&attempt.payload),
            "Failed payload"
        );

        // Fail-fast rejections never reached the backend and must not
        // restart the recovery clock. A 429 means the backend is up.
        if reached_backend && kind != ErrorKind::RateLimit {
            self.breaker.record_failure();
        }

        let plan = self
            .planner
            .plan(kind, &self.breaker.snapshot(), &failure, attempt.attempt);
        let ctx = RecoveryContext {
            backend: self.backend,
            payload: &attempt.payload,
            failure: &failure,
            attempts: attempt.attempt,
            max_attempts: attempt.max_attempts,
            retry_base: attempt.retry_delay,
            retry_cap: self.retry_cap,
            max_jitter: self.max_jitter,
            deadline: attempt.deadline,
            breaker: &self.breaker,
            fallback: &self.fallback,
        };
        let report = self.executor.execute(&plan, &ctx);
        let error = AttemptError::new(attempt.attempt, kind, failure.message.clone());

        match report.resolution {
            Some(Resolution::Retry { delay }) => Disposition::Retry { delay, error },
            Some(Resolution::Fallback { strategy, result }) => Disposition::Completed(Outcome {
                backend: self.backend,
                source: OutcomeSource::Fallback,
                result,
                attempts: attempt.attempt,
                kind: Some(kind),
                strategy: Some(strategy),
                recovery: Some(report.trail),
            }),
            None => Disposition::Failed {
                rejection: ResilienceError::Exhausted {
                    backend: self.backend,
                    kind,
                    attempts: attempt.attempt,
                    last_error: failure.message,
                    recovery: RecoveryHint {
                        retry_after_ms: plan.retry_after.map(|d| d.as_millis() as u64),
                        fallback_available: plan.fallback_available && self.fallback.is_enabled(),
                        user_actions: user_actions(kind).into_iter().map(String::from).collect(),
                    },
                },
                error,
            },
        }
    }
}

#[async_trait]
impl ItemProcessor for RecoveryPipeline {
    async fn process(&self, attempt: AttemptContext) -> Disposition {
        let started = Instant::now();
        let available = self.breaker.is_available();
        let result = if available {
            self.call(&attempt).await
        } else {
            Err(BackendFailure::circuit_open(self.backend))
        };
        self.stats.record_processing(started.elapsed());

        match result {
            Ok(value) => {
                self.breaker.record_success();
                Disposition::Completed(Outcome::primary(self.backend, value, attempt.attempt))
            }
            Err(failure) => self.recover(&attempt, failure, available),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResilienceConfig;
    use crate::events::EventBus;
    use crate::resilience::circuit_breaker::CircuitState;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    struct Scripted {
        calls: AtomicU32,
        reply: fn(u32) -> Result<Value, BackendFailure>,
    }

    #[async_trait]
    impl BackendCaller for Scripted {
        async fn call(&self, _backend: BackendId, _payload: &Value) -> Result<Value, BackendFailure> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            (self.reply)(n)
        }
    }

    fn pipeline(backend: BackendId, reply: fn(u32) -> Result<Value, BackendFailure>) -> (RecoveryPipeline, Arc<Scripted>) {
        let config = ResilienceConfig::default();
        let events = EventBus::default();
        let stats = Arc::new(StatsAggregator::new());
        let backend_config = config.backend(backend);
        let caller = Arc::new(Scripted {
            calls: AtomicU32::new(0),
            reply,
        });
        let pipeline = RecoveryPipeline::new(
            &backend_config,
            &config.queue,
            caller.clone(),
            Arc::new(CircuitBreaker::new(backend, &backend_config.breaker, events.clone())),
            Arc::new(FallbackResponder::new(backend, &backend_config.fallback)),
            RecoveryExecutor::new(stats.clone(), events),
            stats,
        );
        (pipeline, caller)
    }

    fn attempt(backend: BackendId, n: u32, max: u32) -> AttemptContext {
        AttemptContext {
            id: Uuid::new_v4(),
            backend,
            payload: Arc::new(json!({"message": "I feel so anxious today"})),
            attempt: n,
            max_attempts: max,
            retry_delay: Duration::from_millis(100),
            deadline: Instant::now() + Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn test_success_is_primary() {
        let (pipeline, _) = pipeline(BackendId::ConversationalAi, |_| Ok(json!({"reply": "hi"})));
        match pipeline.process(attempt(BackendId::ConversationalAi, 1, 3)).await {
            Disposition::Completed(outcome) => {
                assert_eq!(outcome.source, OutcomeSource::Primary);
                assert_eq!(outcome.result["reply"], "hi");
            }
            other => panic!("unexpected disposition: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_auth_failure_falls_back_with_trail() {
        let (pipeline, _) = pipeline(BackendId::ConversationalAi, |_| {
            Err(BackendFailure::new("Unauthorized").with_status(401))
        });
        match pipeline.process(attempt(BackendId::ConversationalAi, 1, 3)).await {
            Disposition::Completed(outcome) => {
                assert!(outcome.is_fallback());
                assert_eq!(outcome.kind, Some(ErrorKind::Authentication));
                assert_eq!(outcome.result["category"], "anxiety");
                assert_eq!(outcome.recovery.map(|t| t.len()), Some(1));
            }
            other => panic!("unexpected disposition: {other:?}"),
        }
        assert_eq!(pipeline.stats.snapshot().failed_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limits_do_not_open_breaker() {
        let (pipeline, caller) = pipeline(BackendId::SpeechToText, |_| {
            Err(BackendFailure::new("Rate limit exceeded")
                .with_status(429)
                .with_header("retry-after", "2"))
        });
        for n in 1..=6 {
            let disposition = pipeline.process(attempt(BackendId::SpeechToText, n, 10)).await;
            assert!(
                matches!(disposition, Disposition::Retry { delay, .. } if delay == Duration::from_secs(2)),
                "{disposition:?}"
            );
        }
        assert_eq!(caller.calls.load(Ordering::SeqCst), 6);
        assert_eq!(pipeline.breaker.state(), CircuitState::Closed);
        assert_eq!(pipeline.breaker.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_fails_fast_without_calling() {
        let (pipeline, caller) = pipeline(BackendId::TextToSpeech, |_| {
            Err(BackendFailure::new("connection refused"))
        });
        for n in 1..=5 {
            pipeline.process(attempt(BackendId::TextToSpeech, n, 10)).await;
        }
        assert_eq!(pipeline.breaker.state(), CircuitState::Open);
        assert_eq!(caller.calls.load(Ordering::SeqCst), 5);

        let disposition = pipeline.process(attempt(BackendId::TextToSpeech, 6, 10)).await;
        assert_eq!(caller.calls.load(Ordering::SeqCst), 5);
        assert!(matches!(
            disposition,
            Disposition::Completed(Outcome {
                source: OutcomeSource::Fallback,
                kind: Some(ErrorKind::ServiceUnavailable),
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_backend_hits_call_timeout() {
        struct Slow;

        #[async_trait]
        impl BackendCaller for Slow {
            async fn call(&self, _: BackendId, _: &Value) -> Result<Value, BackendFailure> {
                time::sleep(Duration::from_secs(3600)).await;
                Ok(Value::Null)
            }
        }

        let (mut pipeline, _) = pipeline(BackendId::SpeechToText, |_| Ok(Value::Null));
        pipeline.caller = Arc::new(Slow);
        match pipeline.process(attempt(BackendId::SpeechToText, 1, 3)).await {
            Disposition::Retry { error, .. } => {
                assert_eq!(error.kind, ErrorKind::NetworkError);
                assert_eq!(error.message, "request timed out after 20000ms");
            }
            other => panic!("unexpected disposition: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exhausted_bad_request_carries_hint() {
        let (pipeline, _) = pipeline(BackendId::SpeechToText, |_| {
            Err(BackendFailure::new("invalid audio payload").with_status(422))
        });
        match pipeline.process(attempt(BackendId::SpeechToText, 1, 3)).await {
            Disposition::Failed { rejection, error } => {
                assert_eq!(error.kind, ErrorKind::BadRequest);
                assert_eq!(rejection.http_status(), 400);
                let hint = rejection.recovery().unwrap();
                assert!(!hint.fallback_available);
                assert!(hint.retry_after_ms.is_none());
                assert!(!hint.user_actions.is_empty());
            }
            other => panic!("unexpected disposition: {other:?}"),
        }
    }
}

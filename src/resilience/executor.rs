//! Recovery execution.
//!
//! # Responsibilities
//! - Run planned strategies in order, stopping at the first that resolves
//! - Record every attempted strategy and its outcome
//! - Count one recovery attempt (and at most one success) per execution
//!
//! # Design Decisions
//! - Strategy errors are recorded in the trail, never returned to the caller
//! - Execution is synchronous; the resulting retry delay is awaited by the queue

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;

use crate::backend::{BackendFailure, BackendId};
use crate::events::{EventBus, ResilienceEvent};
use crate::health::stats::StatsAggregator;
use crate::observability::metrics;
use crate::resilience::backoff::retry_delay;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::classifier::ErrorKind;
use crate::resilience::fallback::{FallbackError, FallbackResponder, FallbackStrategy};
use crate::resilience::planner::{RecoveryPlan, Strategy};

/// Everything a strategy may need to know about the failed attempt.
#[derive(Debug)]
pub struct RecoveryContext<'a> {
    pub backend: BackendId,
    pub payload: &'a Value,
    pub failure: &'a BackendFailure,
    pub attempts: u32,
    pub max_attempts: u32,
    pub retry_base: Duration,
    pub retry_cap: Duration,
    pub max_jitter: Duration,
    /// The item's deadline; a retry that cannot start before it is pointless.
    pub deadline: Instant,
    pub breaker: &'a Arc<CircuitBreaker>,
    pub fallback: &'a FallbackResponder,
}

/// How a successful recovery settles the item.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Retry { delay: Duration },
    Fallback { strategy: FallbackStrategy, result: Value },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum StrategyOutcome {
    Resolved,
    Continued,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyRecord {
    pub strategy: Strategy,
    #[serde(flatten)]
    pub outcome: StrategyOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryReport {
    pub trail: Vec<StrategyRecord>,
    pub resolution: Option<Resolution>,
}

impl RecoveryReport {
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }
}

#[derive(Debug, Error)]
enum StrategyError {
    #[error("attempt budget exhausted ({attempts}/{max})")]
    Exhausted { attempts: u32, max: u32 },

    #[error("retry in {}ms would start after the item deadline", .delay.as_millis())]
    PastDeadline { delay: Duration },

    #[error(transparent)]
    Fallback(#[from] FallbackError),
}

pub struct RecoveryExecutor {
    stats: Arc<StatsAggregator>,
    events: EventBus,
}

impl RecoveryExecutor {
    pub fn new(stats: Arc<StatsAggregator>, events: EventBus) -> Self {
        Self { stats, events }
    }

    pub fn execute(&self, plan: &RecoveryPlan, ctx: &RecoveryContext<'_>) -> RecoveryReport {
        let mut trail = Vec::with_capacity(plan.strategies.len());
        let mut resolution = None;

        for strategy in &plan.strategies {
            let outcome = match self.run(*strategy, plan, ctx) {
                Ok(Some(resolved)) => {
                    resolution = Some(resolved);
                    StrategyOutcome::Resolved
                }
                Ok(None) => StrategyOutcome::Continued,
                Err(e) => {
                    tracing::debug!(
                        backend = %ctx.backend,
                        strategy = strategy.as_str(),
                        error = %e,
                        "Recovery strategy failed"
                    );
                    StrategyOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            trail.push(StrategyRecord {
                strategy: *strategy,
                outcome,
            });
            if resolution.is_some() {
                break;
            }
        }

        let report = RecoveryReport { trail, resolution };
        self.stats.record_recovery(report.is_resolved());
        report
    }

    fn run(
        &self,
        strategy: Strategy,
        plan: &RecoveryPlan,
        ctx: &RecoveryContext<'_>,
    ) -> Result<Option<Resolution>, StrategyError> {
        match strategy {
            Strategy::Backoff | Strategy::Requeue | Strategy::RetryWithBackoff => {
                if ctx.attempts >= ctx.max_attempts {
                    return Err(StrategyError::Exhausted {
                        attempts: ctx.attempts,
                        max: ctx.max_attempts,
                    });
                }
                let delay = match (plan.kind, plan.retry_after) {
                    (ErrorKind::RateLimit, Some(after)) => after,
                    _ => retry_delay(ctx.attempts, ctx.retry_base, ctx.retry_cap, ctx.max_jitter),
                };
                if Instant::now() + delay >= ctx.deadline {
                    return Err(StrategyError::PastDeadline { delay });
                }
                Ok(Some(Resolution::Retry { delay }))
            }
            Strategy::OpenBreaker => {
                // An already open breaker keeps its recovery clock.
                if ctx.breaker.is_available() {
                    ctx.breaker.trip();
                }
                Ok(None)
            }
            Strategy::Fallback | Strategy::OfflineFallback => {
                let (fallback, result) = ctx.fallback.respond(ctx.payload)?;
                tracing::info!(
                    backend = %ctx.backend,
                    strategy = ?fallback,
                    "Serving fallback response"
                );
                self.stats.record_fallback();
                metrics::record_fallback(ctx.backend);
                self.events.publish(ResilienceEvent::FallbackServed {
                    backend: ctx.backend,
                    strategy: fallback,
                });
                Ok(Some(Resolution::Fallback {
                    strategy: fallback,
                    result,
                }))
            }
            Strategy::Notify => {
                tracing::error!(
                    backend = %ctx.backend,
                    kind = %plan.kind,
                    error = %ctx.failure,
                    "Backend needs operator attention"
                );
                self.events.publish(ResilienceEvent::OperatorNotice {
                    backend: ctx.backend,
                    kind: plan.kind,
                    message: ctx.failure.message.clone(),
                });
                Ok(None)
            }
            Strategy::ValidateInput => {
                tracing::warn!(
                    backend = %ctx.backend,
                    kind = %plan.kind,
                    status = ?ctx.failure.status,
                    "Backend rejected the input"
                );
                Ok(None)
            }
        }
    }
}

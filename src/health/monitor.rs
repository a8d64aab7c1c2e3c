//! Event-driven health monitor.
//!
//! # Responsibilities
//! - Subscribe to resilience events
//! - Keep the breaker-state gauges current
//! - Log state changes operators care about

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};

use crate::events::ResilienceEvent;
use crate::observability::metrics;
use crate::resilience::circuit_breaker::CircuitState;

pub struct HealthMonitor {
    events: broadcast::Receiver<ResilienceEvent>,
    observed: Arc<AtomicU64>,
}

impl HealthMonitor {
    pub fn new(events: broadcast::Receiver<ResilienceEvent>) -> Self {
        Self {
            events,
            observed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared counter of events handled so far.
    #[cfg(test)]
    pub(crate) fn observed(&self) -> Arc<AtomicU64> {
        self.observed.clone()
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Health monitor starting");

        loop {
            tokio::select! {
                received = self.events.recv() => match received {
                    Ok(event) => {
                        handle(&event);
                        self.observed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Health monitor lagged behind event stream");
                    }
                    Err(RecvError::Closed) => {
                        tracing::info!(
                            observed = self.observed.load(Ordering::Relaxed),
                            "Event stream closed, health monitor exiting"
                        );
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!(
                        observed = self.observed.load(Ordering::Relaxed),
                        "Health monitor received shutdown signal, exiting loop"
                    );
                    break;
                }
            }
        }
    }
}

fn handle(event: &ResilienceEvent) {
    match event {
        ResilienceEvent::BreakerTransition { backend, from, to } => {
            metrics::record_breaker_state(*backend, *to);
            match to {
                CircuitState::Open => {
                    tracing::warn!(backend = %backend, from = ?from, "Backend marked unavailable")
                }
                CircuitState::HalfOpen => {
                    tracing::info!(backend = %backend, "Backend cooling down complete, admitting trial traffic")
                }
                CircuitState::Closed => {
                    tracing::info!(backend = %backend, "Backend recovered")
                }
            }
        }
        ResilienceEvent::ItemSettled {
            backend,
            id,
            status,
            attempts,
        } => {
            tracing::trace!(backend = %backend, item_id = %id, status = status.as_str(), attempts, "Settled");
        }
        ResilienceEvent::FallbackServed { backend, strategy } => {
            tracing::debug!(backend = %backend, strategy = ?strategy, "Fallback served");
        }
        ResilienceEvent::AdmissionDeferred { backend, wait_ms } => {
            tracing::debug!(backend = %backend, wait_ms, "Admission deferred by rate limit");
        }
        ResilienceEvent::OperatorNotice { backend, kind, message } => {
            tracing::error!(backend = %backend, kind = %kind, message = %message, "Operator notice");
        }
    }
}

//! State-change notifications.
//!
//! Breakers, queues and the recovery executor publish [`ResilienceEvent`]s on a
//! broadcast channel; the health monitor (and anything else) subscribes.
//! Publishing never blocks and never fails the publisher.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::backend::BackendId;
use crate::queue::item::ItemStatus;
use crate::resilience::circuit_breaker::CircuitState;
use crate::resilience::classifier::ErrorKind;
use crate::resilience::fallback::FallbackStrategy;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ResilienceEvent {
    BreakerTransition {
        backend: BackendId,
        from: CircuitState,
        to: CircuitState,
    },
    ItemSettled {
        backend: BackendId,
        id: Uuid,
        status: ItemStatus,
        attempts: u32,
    },
    FallbackServed {
        backend: BackendId,
        strategy: FallbackStrategy,
    },
    AdmissionDeferred {
        backend: BackendId,
        wait_ms: u64,
    },
    OperatorNotice {
        backend: BackendId,
        kind: ErrorKind,
        message: String,
    },
}

/// Cloneable publishing side of the event channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ResilienceEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: ResilienceEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResilienceEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

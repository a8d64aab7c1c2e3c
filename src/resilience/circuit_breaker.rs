//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend assumed down, requests fail fast
//! - Half-Open: testing if backend recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold
//! Open → Half-Open: recovery timeout elapsed since the last failure
//! Half-Open → Closed: next call succeeds
//! Half-Open → Open: next call fails (recovery clock restarts)
//! ```
//!
//! # Design Decisions
//! - Per-backend circuit breaker (not global)
//! - Open → Half-Open is evaluated lazily on every query, and additionally by
//!   a scheduled cool-down timer so the transition is published without traffic
//! - Open never goes straight to Closed

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::backend::BackendId;
use crate::config::BreakerConfig;
use crate::events::{EventBus, ResilienceEvent};
use crate::lifecycle::scheduler::{schedule_after, TaskHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding: 0 closed, 1 half-open, 2 open.
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl BreakerSnapshot {
    pub fn is_available(&self) -> bool {
        self.state != CircuitState::Open
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    backend: BackendId,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
    cooldown_timer: Mutex<Option<TaskHandle>>,
    events: EventBus,
}

impl CircuitBreaker {
    pub fn new(backend: BackendId, config: &BreakerConfig, events: EventBus) -> Self {
        Self {
            backend,
            failure_threshold: config.failure_threshold.max(1),
            recovery_timeout: config.recovery_timeout(),
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                last_failure_at: None,
                last_success_at: None,
            }),
            cooldown_timer: Mutex::new(None),
            events,
        }
    }

    pub fn backend(&self) -> BackendId {
        self.backend
    }

    /// Current state, applying a pending Open → Half-Open transition first.
    pub fn state(&self) -> CircuitState {
        let mut transitions = Vec::new();
        let state = {
            let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
            self.poll_locked(&mut inner, &mut transitions);
            inner.state
        };
        self.publish(&transitions);
        state
    }

    /// True for Closed and Half-Open.
    pub fn is_available(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner
            .lock()
            .expect("circuit breaker mutex poisoned")
            .consecutive_failures
    }

    /// Report a successful call.
    pub fn record_success(&self) -> Vec<Transition> {
        let mut transitions = Vec::new();
        {
            let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
            self.poll_locked(&mut inner, &mut transitions);
            inner.consecutive_failures = 0;
            inner.last_success_at = Some(Utc::now());
            if inner.state == CircuitState::HalfOpen {
                Self::move_to(&mut inner, CircuitState::Closed, &mut transitions);
            }
        }
        if transitions.iter().any(|t| t.to == CircuitState::Closed) {
            self.cancel_cooldown_timer();
        }
        self.publish(&transitions);
        transitions
    }

    /// Report a failed call.
    pub fn record_failure(self: &Arc<Self>) -> Vec<Transition> {
        let mut transitions = Vec::new();
        let open = {
            let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
            self.poll_locked(&mut inner, &mut transitions);
            inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
            inner.last_failure = Some(Instant::now());
            inner.last_failure_at = Some(Utc::now());
            match inner.state {
                CircuitState::Closed if inner.consecutive_failures >= self.failure_threshold => {
                    Self::move_to(&mut inner, CircuitState::Open, &mut transitions);
                }
                CircuitState::HalfOpen => {
                    Self::move_to(&mut inner, CircuitState::Open, &mut transitions);
                }
                _ => {}
            }
            inner.state == CircuitState::Open
        };
        if open {
            self.arm_cooldown_timer();
        }
        self.publish(&transitions);
        transitions
    }

    /// Force the breaker open and restart the recovery clock.
    pub fn trip(self: &Arc<Self>) -> Vec<Transition> {
        let mut transitions = Vec::new();
        {
            let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
            inner.last_failure = Some(Instant::now());
            if inner.state != CircuitState::Open {
                Self::move_to(&mut inner, CircuitState::Open, &mut transitions);
            }
        }
        self.arm_cooldown_timer();
        self.publish(&transitions);
        transitions
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut transitions = Vec::new();
        let snapshot = {
            let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
            self.poll_locked(&mut inner, &mut transitions);
            BreakerSnapshot {
                state: inner.state,
                consecutive_failures: inner.consecutive_failures,
                failure_threshold: self.failure_threshold,
                recovery_timeout_ms: self.recovery_timeout.as_millis() as u64,
                last_failure_at: inner.last_failure_at,
                last_success_at: inner.last_success_at,
            }
        };
        self.publish(&transitions);
        snapshot
    }

    fn poll_locked(&self, inner: &mut BreakerInner, transitions: &mut Vec<Transition>) {
        if inner.state != CircuitState::Open {
            return;
        }
        let cooled_down = inner
            .last_failure
            .map(|at| at.elapsed() >= self.recovery_timeout)
            .unwrap_or(true);
        if cooled_down {
            Self::move_to(inner, CircuitState::HalfOpen, transitions);
        }
    }

    fn move_to(inner: &mut BreakerInner, to: CircuitState, transitions: &mut Vec<Transition>) {
        transitions.push(Transition {
            from: inner.state,
            to,
        });
        inner.state = to;
    }

    /// Schedule the half-open transition for when the recovery timeout elapses.
    fn arm_cooldown_timer(self: &Arc<Self>) {
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        let breaker = Arc::downgrade(self);
        let handle = schedule_after(self.recovery_timeout, move || async move {
            if let Some(breaker) = breaker.upgrade() {
                breaker.state();
            }
        });
        let previous = self
            .cooldown_timer
            .lock()
            .expect("circuit breaker timer mutex poisoned")
            .replace(handle);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    fn cancel_cooldown_timer(&self) {
        if let Some(handle) = self
            .cooldown_timer
            .lock()
            .expect("circuit breaker timer mutex poisoned")
            .take()
        {
            handle.cancel();
        }
    }

    fn publish(&self, transitions: &[Transition]) {
        for t in transitions {
            match t.to {
                CircuitState::Open => tracing::warn!(
                    backend = %self.backend,
                    from = ?t.from,
                    "Circuit breaker opened"
                ),
                _ => tracing::info!(
                    backend = %self.backend,
                    from = ?t.from,
                    to = ?t.to,
                    "Circuit breaker transition"
                ),
            }
            self.events.publish(ResilienceEvent::BreakerTransition {
                backend: self.backend,
                from: t.from,
                to: t.to,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time;

    fn breaker(threshold: u32, recovery_ms: u64) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            BackendId::ConversationalAi,
            &BreakerConfig {
                failure_threshold: threshold,
                recovery_timeout_ms: recovery_ms,
            },
            EventBus::default(),
        ))
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = breaker(5, 30_000);
        for _ in 0..4 {
            cb.record_failure();
            assert!(cb.is_available());
        }
        let transitions = cb.record_failure();
        assert_eq!(
            transitions,
            vec![Transition {
                from: CircuitState::Closed,
                to: CircuitState::Open
            }]
        );
        assert!(!cb.is_available());
        assert_eq!(cb.consecutive_failures(), 5);
    }

    #[test]
    fn test_success_zeroes_failures_without_closing_open_breaker() {
        let cb = breaker(5, 30_000);
        for _ in 0..5 {
            cb.record_failure();
        }
        cb.record_success();
        assert_eq!(cb.consecutive_failures(), 0);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_through_half_open() {
        let cb = breaker(2, 30_000);
        let mut events = cb.events.subscribe();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        time::advance(Duration::from_secs(29)).await;
        assert_eq!(cb.state(), CircuitState::Open);
        time::advance(Duration::from_secs(1)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.is_available());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);

        let mut seen = Vec::new();
        while let Ok(ResilienceEvent::BreakerTransition { from, to, .. }) = events.try_recv() {
            seen.push((from, to));
        }
        assert_eq!(
            seen,
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_and_restarts_clock() {
        let cb = breaker(1, 10_000);
        cb.record_failure();
        time::advance(Duration::from_secs(10)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        time::advance(Duration::from_secs(9)).await;
        assert_eq!(cb.state(), CircuitState::Open);
        time::advance(Duration::from_secs(1)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_timer_publishes_half_open() {
        let cb = breaker(1, 5_000);
        let mut events = cb.events.subscribe();
        cb.record_failure();
        assert!(matches!(
            events.recv().await.unwrap(),
            ResilienceEvent::BreakerTransition { to: CircuitState::Open, .. }
        ));

        // No queries: only the timer can observe the cool-down.
        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            ResilienceEvent::BreakerTransition {
                from: CircuitState::Open,
                to: CircuitState::HalfOpen,
                ..
            }
        ));
    }

    #[test]
    fn test_trip_forces_open() {
        let cb = breaker(5, 30_000);
        cb.trip();
        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert!(!snapshot.is_available());
        assert_eq!(snapshot.consecutive_failures, 0);
        assert!(cb.trip().is_empty());
    }
}

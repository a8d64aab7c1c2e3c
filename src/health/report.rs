//! Health evaluation.
//!
//! # Rules
//! ```text
//! backend unhealthy: breaker open, or consecutive failures >= failure_trend_threshold
//! overall: healthy (none unhealthy) / degraded (some) / unhealthy (all)
//! ```
//!
//! Reports carry no generation timestamp, so two reports taken without an
//! intervening state change compare equal.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::backend::BackendId;
use crate::health::stats::StatsSnapshot;
use crate::resilience::circuit_breaker::BreakerSnapshot;
use crate::resilience::fallback::FallbackStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendHealth {
    pub healthy: bool,
    pub available: bool,
    pub breaker: BreakerSnapshot,
    pub queue_length: usize,
    pub fallback_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_fallback: Option<FallbackStrategy>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub overall_health: OverallHealth,
    pub per_backend: BTreeMap<BackendId, BackendHealth>,
    pub stats: StatsSnapshot,
}

impl HealthReport {
    pub fn backend(&self, id: BackendId) -> Option<&BackendHealth> {
        self.per_backend.get(&id)
    }
}

pub fn is_healthy(breaker: &BreakerSnapshot, failure_trend_threshold: u32) -> bool {
    breaker.is_available() && breaker.consecutive_failures < failure_trend_threshold.max(1)
}

pub fn overall<'a>(backends: impl IntoIterator<Item = &'a BackendHealth>) -> OverallHealth {
    let (total, unhealthy) = backends
        .into_iter()
        .fold((0usize, 0usize), |(total, unhealthy), b| {
            (total + 1, unhealthy + usize::from(!b.healthy))
        });
    match unhealthy {
        0 => OverallHealth::Healthy,
        n if n == total => OverallHealth::Unhealthy,
        _ => OverallHealth::Degraded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitState;

    fn breaker(state: CircuitState, failures: u32) -> BreakerSnapshot {
        BreakerSnapshot {
            state,
            consecutive_failures: failures,
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            last_failure_at: None,
            last_success_at: None,
        }
    }

    fn backend(healthy: bool) -> BackendHealth {
        BackendHealth {
            healthy,
            available: true,
            breaker: breaker(CircuitState::Closed, 0),
            queue_length: 0,
            fallback_enabled: true,
            active_fallback: None,
        }
    }

    #[test]
    fn test_backend_health_rules() {
        assert!(is_healthy(&breaker(CircuitState::Closed, 0), 1));
        assert!(!is_healthy(&breaker(CircuitState::Closed, 1), 1));
        assert!(is_healthy(&breaker(CircuitState::Closed, 2), 3));
        assert!(!is_healthy(&breaker(CircuitState::Open, 0), 3));
        assert!(is_healthy(&breaker(CircuitState::HalfOpen, 0), 1));
    }

    #[test]
    fn test_overall_rollup() {
        assert_eq!(overall(&[backend(true), backend(true)]), OverallHealth::Healthy);
        assert_eq!(overall(&[backend(true), backend(false)]), OverallHealth::Degraded);
        assert_eq!(overall(&[backend(false), backend(false)]), OverallHealth::Unhealthy);
    }
}

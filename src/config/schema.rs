//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! resilience layer. All types derive Serde traits for deserialization from
//! config files, and every section has defaults so a minimal file works.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::BackendId;
use crate::resilience::fallback::FallbackStrategy;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ResilienceConfig {
    /// HTTP surface settings.
    pub server: ServerConfig,

    /// Queue defaults shared by every backend.
    pub queue: QueueConfig,

    /// Health evaluation settings.
    pub health: HealthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Per-backend overrides. Backends not listed use defaults.
    pub backends: Vec<BackendConfig>,
}

impl ResilienceConfig {
    /// Effective configuration for one backend.
    pub fn backend(&self, id: BackendId) -> BackendConfig {
        self.backends
            .iter()
            .find(|b| b.name == id)
            .cloned()
            .unwrap_or_else(|| BackendConfig::for_backend(id))
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Upper bound for a whole HTTP request, including queueing.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 60,
        }
    }
}

/// Queue defaults applied when a submission does not override them.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Per-item timeout, measured from enqueue.
    pub default_timeout_ms: u64,

    /// Total attempts per item, including the first.
    pub default_max_attempts: u32,

    /// Base delay for exponential re-queue backoff.
    pub base_retry_delay_ms: u64,

    /// Cap for the exponential part of the re-queue backoff.
    pub max_retry_delay_ms: u64,

    /// Maximum random jitter added to every retry delay.
    pub max_jitter_ms: u64,

    /// How often the age sweep runs.
    pub sweep_interval_secs: u64,

    /// Items older than this are timed out by the sweep.
    pub max_age_secs: u64,

    /// Promote items one priority tier after waiting this long. Off when unset.
    pub aging_secs: Option<u64>,
}

impl QueueConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn max_jitter(&self) -> Duration {
        Duration::from_millis(self.max_jitter_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn aging(&self) -> Option<Duration> {
        self.aging_secs.map(Duration::from_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            default_max_attempts: 3,
            base_retry_delay_ms: 1_000,
            max_retry_delay_ms: 30_000,
            max_jitter_ms: 1_000,
            sweep_interval_secs: 60,
            max_age_secs: 300,
            aging_secs: None,
        }
    }
}

/// Health evaluation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Consecutive failures at which a closed backend counts as unhealthy.
    pub failure_trend_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_trend_threshold: 1,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Pretty for development, JSON for production.
    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Buffered events per subscriber before lagging.
    pub event_capacity: usize,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
            event_capacity: 256,
        }
    }
}

/// Per-backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Which backend this block configures.
    pub name: BackendId,

    /// HTTP endpoint used by the HTTP caller.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Environment variable holding the bearer token for the endpoint.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Deadline for a single backend call.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub fallback: FallbackConfig,
}

fn default_call_timeout_ms() -> u64 {
    20_000
}

impl BackendConfig {
    pub fn for_backend(name: BackendId) -> Self {
        Self {
            name,
            endpoint: None,
            api_key_env: None,
            call_timeout_ms: default_call_timeout_ms(),
            breaker: BreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            fallback: FallbackConfig::default(),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures before opening.
    pub failure_threshold: u32,

    /// Cool-down before an open breaker moves to half-open.
    pub recovery_timeout_ms: u64,
}

impl BreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
        }
    }
}

/// Sliding-window rate limit and concurrency cap.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Calls admitted per trailing window.
    pub max_per_window: u32,

    /// Length of the trailing window.
    pub window_ms: u64,

    /// Calls allowed in flight at once.
    pub concurrency: u32,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_window: 60,
            window_ms: 60_000,
            concurrency: 5,
        }
    }
}

/// Degraded-output configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub enabled: bool,

    /// Candidate strategies in preference order. Empty means the backend's defaults.
    pub strategies: Vec<FallbackStrategy>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategies: Vec::new(),
        }
    }
}

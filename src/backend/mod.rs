//! External backends mediated by the resilience layer.
//!
//! # Data Flow
//! ```text
//! queue dispatch
//!     → BackendCaller::call(backend, payload)
//!     → Ok(result)            → breaker success, caller resolved
//!     → Err(BackendFailure)   → classifier → planner → executor
//! ```
//!
//! # Design Decisions
//! - The set of backends is a closed enum; adding one is a code change
//! - Payloads are opaque JSON values, never inspected except by fallbacks
//! - Failures carry status and headers so classification can stay pure

pub mod http_caller;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use http_caller::HttpBackendCaller;

/// Named external backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendId {
    SpeechToText,
    TextToSpeech,
    ConversationalAi,
}

impl BackendId {
    /// Every backend known to the layer, in registration order.
    pub const ALL: [BackendId; 3] = [
        BackendId::SpeechToText,
        BackendId::TextToSpeech,
        BackendId::ConversationalAi,
    ];

    /// Position in [`BackendId::ALL`].
    pub fn index(&self) -> usize {
        match self {
            BackendId::SpeechToText => 0,
            BackendId::TextToSpeech => 1,
            BackendId::ConversationalAi => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendId::SpeechToText => "speech-to-text",
            BackendId::TextToSpeech => "text-to-speech",
            BackendId::ConversationalAi => "conversational-ai",
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a backend name does not match any known backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown backend '{0}'")]
pub struct UnknownBackend(pub String);

impl FromStr for BackendId {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendId::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownBackend(s.to_string()))
    }
}

/// Raw failure reported by a backend call.
///
/// Header names are stored lowercased.
#[derive(Debug, Clone, Error, PartialEq, Eq, Default)]
#[error("{message}")]
pub struct BackendFailure {
    pub message: String,
    pub status: Option<u16>,
    pub headers: HashMap<String, String>,
}

impl BackendFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Synthetic failure used when the breaker rejects a call without reaching the backend.
    pub fn circuit_open(backend: BackendId) -> Self {
        Self::new(format!("circuit breaker open for {backend}"))
    }
}

/// Performs the actual call to an external backend.
#[async_trait]
pub trait BackendCaller: Send + Sync {
    async fn call(&self, backend: BackendId, payload: &Value) -> Result<Value, BackendFailure>;
}

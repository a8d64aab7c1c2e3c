//! Shared scripted backends and layer builders for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

use resilience_layer::config::{BackendConfig, ResilienceConfig};
use resilience_layer::{BackendCaller, BackendFailure, BackendId, ResilienceLayer};

/// Config with jitter removed and the given per-backend tweak applied to every backend.
pub fn config_with(tweak: impl Fn(&mut BackendConfig)) -> ResilienceConfig {
    let mut config = ResilienceConfig::default();
    config.queue.max_jitter_ms = 0;
    config.observability.metrics_enabled = false;
    config.backends = BackendId::ALL
        .into_iter()
        .map(|id| {
            let mut backend = BackendConfig::for_backend(id);
            tweak(&mut backend);
            backend
        })
        .collect();
    config
}

pub fn layer(config: ResilienceConfig, caller: impl BackendCaller + 'static) -> ResilienceLayer {
    ResilienceLayer::new(config, Arc::new(caller))
}

/// Fails every call with the same failure and counts the calls.
pub struct Failing {
    failure: BackendFailure,
    calls: Arc<AtomicU32>,
}

impl Failing {
    pub fn new(failure: BackendFailure) -> (Self, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Self {
                failure,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl BackendCaller for Failing {
    async fn call(&self, _backend: BackendId, _payload: &Value) -> Result<Value, BackendFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.failure.clone())
    }
}

/// Never answers.
pub struct Hanging;

#[async_trait]
impl BackendCaller for Hanging {
    async fn call(&self, _backend: BackendId, _payload: &Value) -> Result<Value, BackendFailure> {
        std::future::pending().await
    }
}

/// Echoes the payload back.
pub struct Echo;

#[async_trait]
impl BackendCaller for Echo {
    async fn call(&self, backend: BackendId, payload: &Value) -> Result<Value, BackendFailure> {
        Ok(json!({ "backend": backend, "echo": payload }))
    }
}

/// Records the `tag` of every payload in call order. A payload tagged
/// "blocker" holds its slot until the gate is opened.
pub struct Gated {
    pub order: Arc<Mutex<Vec<String>>>,
    pub gate: Arc<Notify>,
}

impl Gated {
    pub fn new() -> Self {
        Self {
            order: Arc::new(Mutex::new(Vec::new())),
            gate: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl BackendCaller for Gated {
    async fn call(&self, _backend: BackendId, payload: &Value) -> Result<Value, BackendFailure> {
        let tag = payload["tag"].as_str().unwrap_or_default().to_string();
        self.order.lock().unwrap().push(tag.clone());
        if tag == "blocker" {
            self.gate.notified().await;
        }
        Ok(json!({ "tag": tag }))
    }
}

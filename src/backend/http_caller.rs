//! HTTP implementation of [`BackendCaller`].
//!
//! Posts the opaque JSON payload to the endpoint configured for each backend
//! and maps transport and status failures into [`BackendFailure`]s the
//! classifier understands.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use serde_json::Value;
use url::Url;

use crate::backend::{BackendCaller, BackendFailure, BackendId};
use crate::config::ResilienceConfig;

/// Longest response body excerpt carried into a failure message.
const MAX_ERROR_BODY: usize = 240;

#[derive(Debug, Clone)]
struct Endpoint {
    url: Url,
    api_key: Option<String>,
    timeout: Duration,
}

/// Calls backends over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpBackendCaller {
    client: reqwest::Client,
    endpoints: HashMap<BackendId, Endpoint>,
}

impl HttpBackendCaller {
    /// Build a caller from the backend section of the configuration.
    ///
    /// Backends without an endpoint stay unconfigured; calls to them fail
    /// with a configuration error instead of panicking.
    pub fn from_config(config: &ResilienceConfig) -> Self {
        let mut endpoints = HashMap::new();
        for id in BackendId::ALL {
            let backend = config.backend(id);
            let Some(raw) = backend.endpoint.as_deref() else {
                continue;
            };
            match Url::parse(raw) {
                Ok(url) => {
                    let api_key = backend
                        .api_key_env
                        .as_deref()
                        .and_then(|var| std::env::var(var).ok());
                    endpoints.insert(
                        id,
                        Endpoint {
                            url,
                            api_key,
                            timeout: backend.call_timeout(),
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!(backend = %id, endpoint = %raw, error = %e, "Ignoring invalid backend endpoint");
                }
            }
        }

        Self {
            client: reqwest::Client::new(),
            endpoints,
        }
    }
}

#[async_trait]
impl BackendCaller for HttpBackendCaller {
    async fn call(&self, backend: BackendId, payload: &Value) -> Result<Value, BackendFailure> {
        let endpoint = self
            .endpoints
            .get(&backend)
            .ok_or_else(|| BackendFailure::new(format!("{backend} endpoint not configured")))?;

        let mut request = self
            .client
            .post(endpoint.url.clone())
            .timeout(endpoint.timeout)
            .json(payload);
        if let Some(key) = &endpoint.api_key {
            request = request.header(AUTHORIZATION, format!("Bearer {key}"));
        }

        let response = request.send().await.map_err(transport_failure)?;
        let status = response.status();

        if !status.is_success() {
            let headers = lowercase_headers(response.headers());
            let body = response.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            } else {
                excerpt(&body)
            };
            return Err(BackendFailure {
                message,
                status: Some(status.as_u16()),
                headers,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| BackendFailure::new(format!("malformed response from {backend}: {e}")))
    }
}

fn transport_failure(err: reqwest::Error) -> BackendFailure {
    if err.is_timeout() {
        BackendFailure::new(format!("request timed out: {err}"))
    } else if err.is_connect() {
        BackendFailure::new(format!("connection refused: {err}"))
    } else {
        BackendFailure::new(format!("network error: {err}"))
    }
}

fn lowercase_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_backend_is_configuration_failure() {
        let caller = HttpBackendCaller::from_config(&ResilienceConfig::default());
        let err = caller
            .call(BackendId::TextToSpeech, &serde_json::json!({"text": "hi"}))
            .await
            .unwrap_err();
        assert!(err.message.contains("not configured"));
        assert_eq!(
            crate::resilience::classifier::classify(&err),
            crate::resilience::classifier::ErrorKind::Configuration
        );
    }

    #[test]
    fn test_excerpt_truncates_long_bodies() {
        let long = "x".repeat(1000);
        let short = excerpt(&long);
        assert!(short.ends_with("..."));
        assert_eq!(short.len(), MAX_ERROR_BODY + 3);
        assert_eq!(excerpt("  boom \n"), "boom");
    }
}

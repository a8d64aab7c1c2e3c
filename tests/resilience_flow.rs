//! End-to-end behaviour of the resilience layer with scripted backends.

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use resilience_layer::health::OverallHealth;
use resilience_layer::resilience::{CircuitState, ErrorKind};
use resilience_layer::{BackendFailure, BackendId, Priority, ResilienceError, SubmitOptions};

mod common;

#[tokio::test]
async fn test_dispatch_follows_priority_tiers() {
    let config = common::config_with(|b| b.rate_limit.concurrency = 1);
    let gated = common::Gated::new();
    let order = gated.order.clone();
    let gate = gated.gate.clone();
    let layer = common::layer(config, gated);
    let backend = BackendId::ConversationalAi;

    let blocker = layer.enqueue(backend, json!({"tag": "blocker"}), SubmitOptions::new());
    while order.lock().unwrap().is_empty() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let submissions: Vec<_> = [
        ("low", Priority::Low),
        ("high-1", Priority::High),
        ("normal", Priority::Normal),
        ("high-2", Priority::High),
    ]
    .into_iter()
    .map(|(tag, priority)| {
        layer.enqueue(
            backend,
            json!({ "tag": tag }),
            SubmitOptions::new().priority(priority),
        )
    })
    .collect();
    assert_eq!(layer.queue_len(backend), 5);

    gate.notify_one();
    blocker.wait().await.unwrap();
    for submission in submissions {
        submission.wait().await.unwrap();
    }

    let order = order.lock().unwrap().clone();
    assert_eq!(order, vec!["blocker", "high-1", "high-2", "normal", "low"]);
    assert_eq!(layer.queue_len(backend), 0);
}

#[tokio::test(start_paused = true)]
async fn test_network_failure_uses_every_attempt() {
    let config = common::config_with(|b| b.fallback.enabled = false);
    let (caller, calls) = common::Failing::new(BackendFailure::new("connection refused"));
    let layer = common::layer(config, caller);

    let err = layer
        .submit(
            BackendId::SpeechToText,
            json!({"audio": "base64..."}),
            SubmitOptions::new().max_attempts(3),
        )
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(err.to_string().contains("3 attempt"), "{err}");
    assert_eq!(err.kind(), Some(ErrorKind::NetworkError));
    let recovery = err.recovery().unwrap();
    assert!(!recovery.fallback_available);
    assert!(!recovery.user_actions.is_empty());

    let stats = layer.stats();
    assert_eq!(stats.errors_of(ErrorKind::NetworkError), 1);
    assert_eq!(stats.failed_attempts, 3);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.queued, 0);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_backend_times_out_at_deadline() {
    let layer = common::layer(common::config_with(|_| {}), common::Hanging);
    let backend = BackendId::TextToSpeech;

    let started = Instant::now();
    let err = layer
        .submit(
            backend,
            json!({"text": "hello"}),
            SubmitOptions::new().timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, ResilienceError::TimedOut { .. }), "{err:?}");
    assert!(elapsed >= Duration::from_millis(50), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(150), "{elapsed:?}");
    assert_eq!(layer.queue_len(backend), 0);
    assert_eq!(layer.stats().timed_out, 1);
}

#[tokio::test]
async fn test_health_report_is_idempotent() {
    let layer = common::layer(common::config_with(|_| {}), common::Echo);
    layer
        .submit(BackendId::TextToSpeech, json!({"text": "hi"}), SubmitOptions::new())
        .await
        .unwrap();

    let first = serde_json::to_value(layer.health_report()).unwrap();
    let second = serde_json::to_value(layer.health_report()).unwrap();
    assert_eq!(first, second);
    assert_eq!(first["overallHealth"], "healthy");
    assert_eq!(first["stats"]["processed"], 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_reports_retry_after() {
    let failure = BackendFailure::new("Rate limit exceeded")
        .with_status(429)
        .with_header("retry-after", "2");
    let (caller, calls) = common::Failing::new(failure);
    let layer = common::layer(common::config_with(|_| {}), caller);
    let backend = BackendId::SpeechToText;

    for _ in 0..3 {
        let err = layer
            .submit(backend, json!({"audio": "base64..."}), SubmitOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::RateLimit));
        assert_eq!(err.retry_after(), Some(Duration::from_millis(2000)));
        assert_eq!(err.http_status(), 429);
    }

    // Every submission spends its three default attempts.
    assert_eq!(calls.load(Ordering::SeqCst), 9);
    let stats = serde_json::to_value(layer.stats()).unwrap();
    assert_eq!(stats["byType"]["rate-limit"], 3);
    assert_eq!(stats["failedAttempts"], 9);
    assert_eq!(layer.breaker(backend).state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_past_deadline_rejects_as_rate_limit() {
    let failure = BackendFailure::new("Rate limit exceeded")
        .with_status(429)
        .with_header("retry-after", "60");
    let (caller, calls) = common::Failing::new(failure);
    let layer = common::layer(common::config_with(|_| {}), caller);

    let err = layer
        .submit(
            BackendId::SpeechToText,
            json!({"audio": "base64..."}),
            SubmitOptions::new()
                .max_attempts(3)
                .timeout(Duration::from_secs(30)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ResilienceError::Exhausted { .. }), "{err:?}");
    assert_eq!(err.kind(), Some(ErrorKind::RateLimit));
    assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
    assert_eq!(err.http_status(), 429);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(layer.stats().timed_out, 0);
}

#[tokio::test]
async fn test_crisis_message_gets_support_resources_when_backend_is_down() {
    let (caller, _calls) =
        common::Failing::new(BackendFailure::new("Service Unavailable").with_status(503));
    let layer = common::layer(common::config_with(|_| {}), caller);

    let outcome = layer
        .submit(
            BackendId::ConversationalAi,
            json!({"message": "some days I think I should just kill myself"}),
            SubmitOptions::new().max_attempts(1),
        )
        .await
        .unwrap();

    assert!(outcome.is_fallback());
    assert_eq!(outcome.kind, Some(ErrorKind::ServiceUnavailable));
    assert_eq!(outcome.result["crisis"], true);
    assert_eq!(outcome.result["degraded"], true);
    let phones: Vec<_> = outcome.result["resources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["phone"].as_str().unwrap())
        .collect();
    assert!(phones.contains(&"988"));
    assert_eq!(layer.stats().fallbacks, 1);
}

#[tokio::test]
async fn test_breaker_opens_after_repeated_failures() {
    let config = common::config_with(|b| b.fallback.enabled = false);
    let (caller, calls) = common::Failing::new(BackendFailure::new("connection refused"));
    let layer = common::layer(config, caller);
    let backend = BackendId::SpeechToText;

    for _ in 0..5 {
        let err = layer
            .submit(backend, json!({}), SubmitOptions::new().max_attempts(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NetworkError));
    }
    assert_eq!(layer.breaker(backend).state(), CircuitState::Open);
    assert!(!layer.is_available(backend));
    assert!(layer.is_available(BackendId::TextToSpeech));

    let err = layer
        .submit(backend, json!({}), SubmitOptions::new().max_attempts(1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::ServiceUnavailable));
    assert_eq!(calls.load(Ordering::SeqCst), 5);

    let report = layer.health_report();
    assert_eq!(report.overall_health, OverallHealth::Degraded);
    assert!(!report.per_backend[&backend].available);
}

//! The HTTP surface served over a real socket.

use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use resilience_layer::{BackendFailure, HttpServer};

mod common;

async fn serve(layer: resilience_layer::ResilienceLayer) -> (String, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = oneshot::channel::<()>();
    let server = HttpServer::new(Arc::new(layer));
    tokio::spawn(async move {
        let _ = server
            .run(listener, async {
                let _ = rx.await;
            })
            .await;
    });
    (base, tx)
}

#[tokio::test]
async fn test_submit_and_health_over_tcp() {
    let layer = common::layer(common::config_with(|_| {}), common::Echo);
    let (base, stop) = serve(layer).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{base}/v1/backends/text-to-speech"))
        .header("x-request-id", "req-42")
        .json(&json!({"payload": {"text": "breathe in"}, "priority": "high"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-request-id"], "req-42");
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["source"], "primary");
    assert_eq!(body["result"]["echo"]["text"], "breathe in");

    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["overallHealth"], "healthy");
    assert_eq!(health["stats"]["processed"], 1);

    let res = client
        .get(format!("{base}/backends/image-gen/available"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let _ = stop.send(());
}

#[tokio::test]
async fn test_rate_limited_submission_carries_retry_after() {
    let config = common::config_with(|b| b.fallback.enabled = false);
    let failure = BackendFailure::new("rate limit exceeded")
        .with_status(429)
        .with_header("retry-after", "3");
    let (caller, _calls) = common::Failing::new(failure);
    let (base, stop) = serve(common::layer(config, caller)).await;

    let res = reqwest::Client::new()
        .post(format!("{base}/v1/backends/speech-to-text"))
        .json(&json!({"payload": {"audio": "..."}, "maxAttempts": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.headers()["retry-after"], "3");
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["type"], "rate-limit");
    assert_eq!(body["recovery"]["retryAfter"], 3000);
    assert_eq!(body["recovery"]["fallbackAvailable"], false);

    let _ = stop.send(());
}

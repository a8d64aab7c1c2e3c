//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (request ID, tracing, request timeout)
//! - Bind server to listener and stop on the shutdown future
//!
//! # Routes
//! - `POST /v1/backends/{backend}`: submit a payload through the resilience layer
//! - `GET /health`: health report
//! - `GET /stats`: statistics snapshot
//! - `GET /backends/{backend}/available`: breaker availability

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, Request};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::backend::BackendId;
use crate::error::ResilienceError;
use crate::http::request::{request_id, SubmitRequest, X_REQUEST_ID};
use crate::http::response::{ApiError, Availability};
use crate::layer::ResilienceLayer;
use crate::observability::redact;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub layer: Arc<ResilienceLayer>,
}

/// HTTP surface of the resilience layer.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(layer: Arc<ResilienceLayer>) -> Self {
        let request_timeout = Duration::from_secs(layer.config().server.request_timeout_secs);
        let router = Self::build_router(AppState { layer }, request_timeout);
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
        let x_request_id = HeaderName::from_static(X_REQUEST_ID);
        Router::new()
            .route("/v1/backends/{backend}", post(submit_handler))
            .route("/backends/{backend}/available", get(available_handler))
            .route("/health", get(health_handler))
            .route("/stats", get(stats_handler))
            .with_state(state)
            .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
            .layer(TimeoutLayer::new(request_timeout))
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id(request.headers()),
                )
            }))
            .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` resolves.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

fn parse_backend(raw: &str) -> Result<BackendId, ApiError> {
    raw.parse::<BackendId>()
        .map_err(|e| ApiError(ResilienceError::from(e)))
}

async fn submit_handler(
    State(state): State<AppState>,
    Path(backend): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SubmitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let backend = parse_backend(&backend)?;
    tracing::debug!(
        backend = %backend,
        request_id = %request_id(&headers),
        priority = ?body.priority,
        payload = %redact::redact(&body.payload),
        "Submission received"
    );

    let options = body.options();
    match state.layer.submit(backend, body.payload, options).await {
        Ok(outcome) => Ok(Json(outcome)),
        Err(err) => {
            tracing::info!(
                backend = %backend,
                request_id = %request_id(&headers),
                status = err.http_status(),
                error = %err,
                "Submission rejected"
            );
            Err(ApiError(err))
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.layer.health_report())
}

async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.layer.stats())
}

async fn available_handler(
    State(state): State<AppState>,
    Path(backend): Path<String>,
) -> Result<Json<Availability>, ApiError> {
    let backend = parse_backend(&backend)?;
    Ok(Json(Availability {
        backend,
        available: state.layer.is_available(backend),
    }))
}

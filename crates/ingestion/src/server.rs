//! HTTP surface
//!
//! # Endpoints
//!
//! - `POST /webhook` - validates the body and hands it to the dispatcher (202)
//! - `GET /health` - 200 unless the broker circuit is open (503)

use std::future::Future;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use contracts::{CircuitState, CorrelationId, DispatchHandoff};

use crate::config::IngestionConfig;
use crate::error::IngestionError;
use crate::worker::IngestionWorker;

/// 202 body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedResponse {
    pub status: &'static str,
    pub correlation_id: CorrelationId,
}

/// `/health` body
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub circuit: CircuitState,
}

/// Builds the axum Router with all endpoints.
pub fn build_router<H: DispatchHandoff>(
    worker: IngestionWorker<H>,
    config: &IngestionConfig,
) -> Router {
    Router::new()
        .route("/webhook", post(webhook_handler::<H>))
        .route("/health", get(health_handler::<H>))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(worker)
}

/// Webhook handler.
///
/// Answers as soon as the envelope is handed off; a client disconnecting
/// afterwards has no effect on delivery.
pub async fn webhook_handler<H: DispatchHandoff>(
    State(worker): State<IngestionWorker<H>>,
    body: Bytes,
) -> Result<(StatusCode, Json<AcceptedResponse>), IngestionError> {
    let correlation_id = worker.handle(&body)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            status: "accepted",
            correlation_id,
        }),
    ))
}

pub async fn health_handler<H: DispatchHandoff>(
    State(worker): State<IngestionWorker<H>>,
) -> (StatusCode, Json<HealthResponse>) {
    match worker.circuit_state() {
        CircuitState::Open => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "degraded",
                circuit: CircuitState::Open,
            }),
        ),
        circuit => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                circuit,
            }),
        ),
    }
}

/// Serve `router` on `listener` until `shutdown` resolves, then finish
/// in-flight requests.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = ?listener.local_addr().ok(), "HTTP server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

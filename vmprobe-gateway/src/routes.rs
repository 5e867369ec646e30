//! Axum route handlers for the vmprobe gateway API.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use vmprobe_core::{ScanRequest, ScanRequestBody};
use vmprobe_scanner::ScanCoordinator;

use crate::{error::GatewayError, pool::ScanRegistry};

// ── Shared state ─────────────────────────────────────────────────────────────

/// Process-wide state shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub coordinator: Arc<ScanCoordinator>,
    pub registry: Arc<ScanRegistry>,
}

impl AppState {
    #[must_use]
    pub fn new(coordinator: Arc<ScanCoordinator>) -> Self {
        Self { coordinator, registry: Arc::new(ScanRegistry::new()) }
    }
}

// ── Response types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub manifest_loaded: bool,
    pub scans_in_flight: usize,
}

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/scans", post(create_scan))
        .route("/v1/hardware", post(read_hardware))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// `GET /health`: liveness probe.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let manifest_loaded = state.coordinator.manifest_loaded();
    let body = HealthResponse {
        status: if manifest_loaded { "ok" } else { "degraded" },
        manifest_loaded,
        scans_in_flight: state.registry.len(),
    };
    (StatusCode::OK, Json(body))
}

/// `POST /v1/scans`: run a full inventory scan and return the inventory.
///
/// The scan runs as its own task: if the client disconnects, the scan still
/// finishes and tears down, and the VM stays registered until it has.
///
/// # Errors
/// Returns [`GatewayError::InvalidRequest`] for a malformed body,
/// [`GatewayError::ScanInProgress`] if the VM is already being scanned, and
/// [`GatewayError::Scan`] for any scan failure.
pub async fn create_scan(
    State(state): State<AppState>,
    payload: Result<Json<ScanRequestBody>, JsonRejection>,
) -> Result<impl IntoResponse, GatewayError> {
    let request = parse_request(payload)?;
    let guard = state.registry.begin(&request.vm_id)?;
    let scan_id = guard.scan_id();
    tracing::info!(scan_id = %scan_id, vm_id = %request.vm_id, provider = ?request.provider, "scan accepted");

    let coordinator = Arc::clone(&state.coordinator);
    let task = tokio::spawn(async move {
        let _guard = guard;
        coordinator.scan_as(scan_id, &request).await
    });
    let inventory = task.await.map_err(|e| GatewayError::TaskFailed(e.to_string()))??;
    Ok(Json(inventory))
}

/// `POST /v1/hardware`: read the VM's hardware without snapshotting it.
///
/// # Errors
/// Returns [`GatewayError::InvalidRequest`] for a malformed body and
/// [`GatewayError::Scan`] for session or lookup failures.
pub async fn read_hardware(
    State(state): State<AppState>,
    payload: Result<Json<ScanRequestBody>, JsonRejection>,
) -> Result<impl IntoResponse, GatewayError> {
    let request = parse_request(payload)?;
    let coordinator = Arc::clone(&state.coordinator);
    let task = tokio::spawn(async move { coordinator.hardware(&request).await });
    let hardware = task.await.map_err(|e| GatewayError::TaskFailed(e.to_string()))??;
    Ok(Json(hardware))
}

fn parse_request(payload: Result<Json<ScanRequestBody>, JsonRejection>) -> Result<ScanRequest, GatewayError> {
    let Json(body) = payload.map_err(|e| GatewayError::InvalidRequest(e.body_text()))?;
    Ok(ScanRequest::try_from(body)?)
}

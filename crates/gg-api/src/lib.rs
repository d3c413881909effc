//! Guard Gateway API
//!
//! HTTP API endpoints for:
//! - Unified guard processing
//! - Aggregate and per-service health of the guard fleet
//! - Registry listing and gateway statistics
//! - Kubernetes probes (liveness/readiness)
//! - Prometheus metrics

use std::collections::BTreeMap;
use std::sync::Arc;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;
use utoipa::{OpenApi, ToSchema};

use gg_common::{GuardServiceConfig, ProcessRequest, ProcessResponse, ServiceHealth, ServiceStatus};
use gg_router::{GatewayStats, GuardGateway};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GuardGateway>,
    pub metrics: Option<PrometheusHandle>,
}

/// Simple health response for basic health check
#[derive(Serialize, ToSchema)]
pub struct SimpleHealthResponse {
    /// Health status: UP
    pub status: String,
    /// Application version
    pub version: String,
}

/// Kubernetes probe response
#[derive(Serialize, ToSchema)]
pub struct ProbeResponse {
    /// Probe status: LIVE, READY, NOT_READY
    pub status: String,
}

/// Error body for non-processing endpoints
#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(OpenApi)]
#[openapi(
    info(title = "Guard Gateway API"),
    paths(
        process_handler,
        health_table_handler,
        service_health_handler,
        services_handler,
        stats_handler,
        health_handler,
        liveness_probe,
        readiness_probe,
    ),
    components(schemas(
        ProcessRequest,
        ProcessResponse,
        ServiceHealth,
        ServiceStatus,
        GuardServiceConfig,
        GatewayStats,
        SimpleHealthResponse,
        ProbeResponse,
        ErrorResponse,
    )),
    tags((name = "guards", description = "Guard service routing and health"))
)]
pub struct ApiDoc;

/// Create the full router with all endpoints
pub fn create_router(gateway: Arc<GuardGateway>, metrics: Option<PrometheusHandle>) -> Router {
    let state = AppState { gateway, metrics };

    Router::new()
        // Guard routing
        .route("/api/v1/guards/process", post(process_handler))
        .route("/api/v1/guards/health", get(health_table_handler))
        .route("/api/v1/guards/health/:service", get(service_health_handler))
        .route("/api/v1/guards/services", get(services_handler))
        .route("/api/v1/guards/stats", get(stats_handler))
        // Basic health and probes
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        // Prometheus metrics
        .route("/metrics", get(metrics_handler))
        // OpenAPI document
        .route("/api-docs/openapi.json", get(openapi_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Route a request to a guard service
///
/// Backend failures are reported in the body with `success: false`, never as a 5xx.
#[utoipa::path(
    post,
    path = "/api/v1/guards/process",
    tag = "guards",
    request_body = ProcessRequest,
    responses((status = 200, description = "Dispatch outcome", body = ProcessResponse))
)]
async fn process_handler(
    State(state): State<AppState>,
    Json(request): Json<ProcessRequest>,
) -> Json<ProcessResponse> {
    debug!(
        service = %request.service_type,
        priority = request.priority,
        "Process request received"
    );
    Json(state.gateway.process(request).await)
}

/// Health of every registered guard service
#[utoipa::path(
    get,
    path = "/api/v1/guards/health",
    tag = "guards",
    responses((status = 200, description = "Health table keyed by service name", body = BTreeMap<String, ServiceHealth>))
)]
async fn health_table_handler(State(state): State<AppState>) -> Json<BTreeMap<String, ServiceHealth>> {
    Json(state.gateway.health_snapshot())
}

/// Health of one guard service
#[utoipa::path(
    get,
    path = "/api/v1/guards/health/{service}",
    tag = "guards",
    params(("service" = String, Path, description = "Service name")),
    responses(
        (status = 200, description = "Latest health record", body = ServiceHealth),
        (status = 404, description = "Unknown or not yet checked service", body = ErrorResponse)
    )
)]
async fn service_health_handler(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Response {
    match state.gateway.status_of(&service) {
        Some(health) => Json(health).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("no health record for service '{}'", service),
            }),
        )
            .into_response(),
    }
}

/// Registered guard services
#[utoipa::path(
    get,
    path = "/api/v1/guards/services",
    tag = "guards",
    responses((status = 200, description = "Service configurations", body = Vec<GuardServiceConfig>))
)]
async fn services_handler(State(state): State<AppState>) -> Json<Vec<GuardServiceConfig>> {
    Json(state.gateway.services())
}

/// Aggregate request statistics
#[utoipa::path(
    get,
    path = "/api/v1/guards/stats",
    tag = "guards",
    responses((status = 200, description = "Gateway statistics", body = GatewayStats))
)]
async fn stats_handler(State(state): State<AppState>) -> Json<GatewayStats> {
    Json(state.gateway.stats())
}

/// Basic health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "monitoring",
    responses((status = 200, description = "Gateway is up", body = SimpleHealthResponse))
)]
async fn health_handler() -> Json<SimpleHealthResponse> {
    Json(SimpleHealthResponse {
        status: "UP".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Kubernetes liveness probe
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "monitoring",
    responses((status = 200, description = "Process is alive", body = ProbeResponse))
)]
async fn liveness_probe() -> Json<ProbeResponse> {
    Json(ProbeResponse {
        status: "LIVE".to_string(),
    })
}

/// Kubernetes readiness probe
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "monitoring",
    responses(
        (status = 200, description = "Priming sweep done", body = ProbeResponse),
        (status = 503, description = "Starting or shutting down", body = ProbeResponse)
    )
)]
async fn readiness_probe(State(state): State<AppState>) -> (StatusCode, Json<ProbeResponse>) {
    if state.gateway.is_ready() {
        (StatusCode::OK, Json(ProbeResponse { status: "READY".to_string() }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ProbeResponse { status: "NOT_READY".to_string() }),
        )
    }
}

/// Prometheus metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

async fn openapi_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

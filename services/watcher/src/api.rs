//! Status HTTP API.
//!
//! Read-only endpoints over the registry plus the Prometheus exposition.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::metrics::PrometheusMetrics;
use crate::registry::GroupRegistry;

/// Shared state of the status API.
#[derive(Clone)]
pub struct ApiState {
    pub registry: GroupRegistry,
    pub metrics: Arc<PrometheusMetrics>,
    pub startup: DateTime<Utc>,
}

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub startup: DateTime<Utc>,

    /// Number of tier groups.
    pub groups: usize,
}

/// Create the status router.
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/state", get(group_states))
        .route("/items", get(group_items))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        startup: state.startup,
        groups: state.registry.group_keys().await.len(),
    })
}

/// Status of every group keyed by tier.
async fn group_states(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.registry.states().await)
}

/// Current items of every group keyed by tier.
async fn group_items(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.registry.items().await)
}

async fn metrics(State(state): State<ApiState>) -> Response {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

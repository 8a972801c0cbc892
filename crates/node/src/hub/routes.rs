//! Read-only REST routes served on the application port

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use gateway_core::protocol::GatewayRole;
use gateway_core::GatewayFilter;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use super::manager::MainHub;
use crate::status::StatusCell;

#[derive(Clone)]
pub(crate) struct ApiState {
    hub: Arc<MainHub>,
    status: Arc<StatusCell>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    gateway_id: String,
    role: GatewayRole,
}

async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        gateway_id: state.hub.gateway_id().to_string(),
        role: GatewayRole::Main,
    })
}

async fn status(State(state): State<ApiState>) -> Response {
    Json(state.hub.status_snapshot(state.status.get()).await).into_response()
}

async fn list_gateways(
    State(state): State<ApiState>,
    Query(filter): Query<GatewayFilter>,
) -> Response {
    Json(state.hub.list_gateways(&filter).await).into_response()
}

async fn get_task(State(state): State<ApiState>, Path(task_id): Path<String>) -> Response {
    match state.hub.task(&task_id).await {
        Some(record) => Json(record).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("Task {} not found", task_id) })),
        )
            .into_response(),
    }
}

pub(crate) fn router(hub: Arc<MainHub>, status: Arc<StatusCell>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(self::status))
        .route("/api/gateways", get(list_gateways))
        .route("/api/tasks/{task_id}", get(get_task))
        .with_state(ApiState { hub, status })
        .layer(TraceLayer::new_for_http())
}

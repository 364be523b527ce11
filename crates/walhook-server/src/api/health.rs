//! Liveness and readiness probes

use super::ApiState;
use crate::db;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

/// Process is up.
pub async fn liveness() -> Json<serde_json::Value> {
    Json(json!({ "status": "up" }))
}

/// Process can reach the change store.
pub async fn readiness(State(state): State<ApiState>) -> impl IntoResponse {
    match db::ping(&state.pool).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "up", "postgres": "up" })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "down", "postgres": "down", "error": e.to_string() })),
        ),
    }
}

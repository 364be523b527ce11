//! Webhook registration CRUD handlers

use super::error::ApiError;
use super::ApiState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use crate::registry::{Hook, HookFilter, HookUpdate, NewHook};

pub async fn create_hook(
    State(state): State<ApiState>,
    Json(new): Json<NewHook>,
) -> Result<(StatusCode, Json<Hook>), ApiError> {
    let hook = state.store.create(&new).await?;
    Ok((StatusCode::CREATED, Json(hook)))
}

pub async fn list_hooks(
    State(state): State<ApiState>,
    Query(filter): Query<HookFilter>,
) -> Result<Json<Vec<Hook>>, ApiError> {
    Ok(Json(state.store.list(&filter).await?))
}

pub async fn get_hook(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<Hook>, ApiError> {
    Ok(Json(state.store.get(id).await?))
}

pub async fn update_hook(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(update): Json<HookUpdate>,
) -> Result<Json<Hook>, ApiError> {
    Ok(Json(state.store.update(id, &update).await?))
}

pub async fn delete_hook(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.store.delete(id).await?;
    Ok(Json(json!({ "success": true })))
}

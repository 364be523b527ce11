//! Management API guard
//!
//! Every `/webhooks` route requires the static key from
//! `WEBHOOKS_API_KEY` in the `x-api-key` header.

use super::error::ApiError;
use super::ApiState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

pub const API_KEY_HEADER: &str = "x-api-key";

pub async fn require_api_key(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if provided != Some(state.api_key.as_str()) {
        return ApiError::unauthorized().into_response();
    }

    next.run(request).await
}

//! Management API
//!
//! axum router exposing webhook registration CRUD under `/webhooks`
//! (guarded by the `x-api-key` header) plus unauthenticated health
//! probes. The API is the sole writer of `webhook.hooks`.

pub mod auth;
pub mod error;
pub mod health;
pub mod routes;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use deadpool_postgres::Pool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::registry::HookStore;

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    pub store: HookStore,
    pub pool: Pool,
    pub api_key: Arc<String>,
}

/// Build the service router.
pub fn router(state: ApiState) -> Router {
    let guarded = Router::new()
        .route(
            "/webhooks",
            post(routes::create_hook).get(routes::list_hooks),
        )
        .route(
            "/webhooks/{id}",
            get(routes::get_hook)
                .patch(routes::update_hook)
                .delete(routes::delete_hook),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .merge(guarded)
        .route("/health", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

//! HTTP route tree

pub mod billing;
pub mod quota;
pub mod webhooks;

use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;

use crate::auth::resolve_account_middleware;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    // Webhook and internal quota routes carry their own authentication
    // (signature / service mesh); only user-facing billing routes go
    // through account resolution
    let user_routes = Router::new()
        .route("/billing/subscription", get(billing::get_subscription))
        .route("/billing/subscription", put(billing::update_subscription))
        .route("/billing/subscription/cancel", post(billing::cancel_subscription))
        .route(
            "/billing/subscription/reactivate",
            post(billing::reactivate_subscription),
        )
        .route("/billing/checkout", post(billing::create_checkout))
        .route("/billing/portal", post(billing::create_portal))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            resolve_account_middleware,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/webhooks/billing", post(webhooks::receive_webhook))
        .route("/internal/quota/check", post(quota::check_quota))
        .merge(user_routes)
        .with_state(state)
}

async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") })),
    )
}

//! Billing provider webhook endpoint
//!
//! 400 for a missing signature header, 401 for a failed verification,
//! 200 for everything after that: duplicates, unknown accounts, and even
//! downstream application failures all acknowledge the delivery so the
//! provider does not retry-storm us over transient internal errors.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use memohub_billing::BillingError;
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let billing = state
        .billing
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("billing is not configured".to_string()))?;

    let header_name = billing.provider.signature_header();
    let signature = headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .ok_or(BillingError::MissingWebhookHeader(header_name))?;

    let outcome = billing
        .webhooks
        .process(billing.provider.as_ref(), &body, signature)
        .await?;

    tracing::debug!(outcome = ?outcome, "Webhook delivery handled");
    Ok((StatusCode::OK, Json(json!({ "received": true }))))
}

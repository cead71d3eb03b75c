//! Internal quota-check endpoint for the memory-storage service
//!
//! Sits on the service mesh, not the public edge, so it takes the account
//! id directly. Without a billing service the response is a fail-open
//! allow: quota is a monetization control, never an availability one.

use axum::extract::State;
use axum::Json;
use memohub_billing::QuotaResource;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct QuotaCheckRequest {
    pub account_id: Uuid,
    pub resource: String,
}

fn parse_resource(raw: &str) -> ApiResult<QuotaResource> {
    match raw {
        "api_calls" => Ok(QuotaResource::ApiCalls),
        "stored_memories" => Ok(QuotaResource::StoredMemories),
        other => Err(ApiError::BadRequest(format!(
            "unknown quota resource '{}'",
            other
        ))),
    }
}

pub async fn check_quota(
    State(state): State<AppState>,
    Json(req): Json<QuotaCheckRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let resource = parse_resource(&req.resource)?;

    let Some(billing) = state.billing.as_ref() else {
        tracing::warn!(
            account_id = %req.account_id,
            "Quota check without billing service, failing open"
        );
        return Ok(Json(json!({
            "allowed": true,
            "reason": "billing unavailable",
        })));
    };

    let decision = billing.quota.check(req.account_id, resource).await;
    Ok(Json(serde_json::to_value(decision).map_err(anyhow::Error::from)?))
}

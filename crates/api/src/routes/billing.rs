//! User-initiated billing endpoints
//!
//! All handlers run behind account resolution and a sliding-window rate
//! limit; these calls fan out to the payment provider, so they are the
//! cheapest abuse target in the API.

use axum::extract::{Extension, State};
use axum::Json;
use memohub_billing::{BillingService, CheckoutSessionInfo, PortalSessionInfo};
use memohub_shared::{BillingInterval, PlanId};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::auth::AuthAccount;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub plan: String,
    #[serde(default)]
    pub interval: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSubscriptionRequest {
    pub plan: String,
    #[serde(default)]
    pub interval: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub immediate: bool,
}

fn parse_plan(raw: &str) -> ApiResult<PlanId> {
    PlanId::from_str(raw)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown plan '{}'", raw)))
}

fn parse_interval(raw: Option<&str>) -> ApiResult<BillingInterval> {
    match raw {
        None => Ok(BillingInterval::Monthly),
        Some(s) => BillingInterval::from_str(s)
            .ok_or_else(|| ApiError::BadRequest(format!("unknown billing interval '{}'", s))),
    }
}

async fn billing_action_guard(
    state: &AppState,
    auth: &AuthAccount,
) -> ApiResult<Arc<BillingService>> {
    let limit = state.rate_limiter.check_billing_action(auth.account_id).await;
    if !limit.allowed {
        return Err(ApiError::RateLimited {
            retry_after_seconds: limit.retry_after_seconds.unwrap_or(60),
        });
    }
    state
        .billing
        .clone()
        .ok_or_else(|| ApiError::ServiceUnavailable("billing is not configured".to_string()))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthAccount>,
) -> ApiResult<Json<serde_json::Value>> {
    let billing = state
        .billing
        .clone()
        .ok_or_else(|| ApiError::ServiceUnavailable("billing is not configured".to_string()))?;

    let overview = billing.subscriptions.overview(auth.account_id).await?;
    Ok(Json(json!({ "subscription": overview })))
}

pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthAccount>,
    Json(req): Json<CheckoutRequest>,
) -> ApiResult<Json<CheckoutSessionInfo>> {
    let billing = billing_action_guard(&state, &auth).await?;
    let plan = parse_plan(&req.plan)?;
    let interval = parse_interval(req.interval.as_deref())?;

    let base = &state.config.app_base_url;
    let session = billing
        .subscriptions
        .start_checkout(
            auth.account_id,
            plan,
            interval,
            format!("{}/billing/success?session_id={{CHECKOUT_SESSION_ID}}", base),
            format!("{}/billing/canceled", base),
        )
        .await?;

    Ok(Json(session))
}

pub async fn create_portal(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthAccount>,
) -> ApiResult<Json<PortalSessionInfo>> {
    let billing = billing_action_guard(&state, &auth).await?;
    let return_url = format!("{}/settings/billing", state.config.app_base_url);
    let session = billing
        .subscriptions
        .open_portal(auth.account_id, &return_url)
        .await?;
    Ok(Json(session))
}

pub async fn update_subscription(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthAccount>,
    Json(req): Json<UpdateSubscriptionRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let billing = billing_action_guard(&state, &auth).await?;
    let plan = parse_plan(&req.plan)?;
    let interval = parse_interval(req.interval.as_deref())?;

    let snapshot = billing
        .subscriptions
        .change_plan(auth.account_id, plan, interval)
        .await?;
    Ok(Json(json!({ "subscription": snapshot })))
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthAccount>,
    Json(req): Json<CancelRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let billing = billing_action_guard(&state, &auth).await?;
    let snapshot = billing
        .subscriptions
        .cancel(auth.account_id, req.immediate)
        .await?;
    Ok(Json(json!({ "subscription": snapshot })))
}

pub async fn reactivate_subscription(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthAccount>,
) -> ApiResult<Json<serde_json::Value>> {
    let billing = billing_action_guard(&state, &auth).await?;
    billing.subscriptions.reactivate(auth.account_id).await?;
    Ok(Json(json!({ "reactivated": true })))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_parse_plan() {
        assert_eq!(parse_plan("starter").unwrap(), PlanId::Starter);
        assert!(parse_plan("platinum").is_err());
    }

    #[test]
    fn test_parse_interval_defaults_monthly() {
        assert_eq!(parse_interval(None).unwrap(), BillingInterval::Monthly);
        assert_eq!(parse_interval(Some("yearly")).unwrap(), BillingInterval::Yearly);
        assert_eq!(parse_interval(Some("annual")).unwrap(), BillingInterval::Yearly);
        assert!(parse_interval(Some("weekly")).is_err());
    }
}

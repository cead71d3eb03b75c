//! Account resolution at the identity boundary
//!
//! Authentication itself lives with the identity provider in front of this
//! service; by the time a request arrives here it carries a trusted
//! external user id (and email) in headers set by the gateway. The
//! middleware resolves those to an account row, creating it on first sight.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use memohub_shared::PlanId;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub const EXTERNAL_USER_HEADER: &str = "x-external-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

/// The resolved account attached to every authenticated request
#[derive(Debug, Clone)]
pub struct AuthAccount {
    pub account_id: Uuid,
    pub external_user_id: String,
    pub email: String,
    pub plan: PlanId,
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Resolve the gateway identity headers to an account and attach it as a
/// request extension
pub async fn resolve_account_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let external_user_id = header_value(request.headers(), EXTERNAL_USER_HEADER)
        .ok_or(ApiError::Unauthorized)?
        .to_string();
    let email = header_value(request.headers(), USER_EMAIL_HEADER)
        .unwrap_or_default()
        .to_string();

    let billing = state
        .billing
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("billing is not configured".to_string()))?;

    let account = billing
        .accounts
        .resolve_or_create(&external_user_id, &email)
        .await?;

    request.extensions_mut().insert(AuthAccount {
        account_id: account.id,
        external_user_id: account.external_user_id,
        email: account.email,
        plan: account.plan,
    });

    Ok(next.run(request).await)
}

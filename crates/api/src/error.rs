//! API error responses
//!
//! Every failure maps to a stable error id plus a generic message; raw
//! provider or database detail never reaches the client. The correlation
//! id in the body is logged server-side with the full error so support can
//! join the two.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use memohub_billing::BillingError;
use serde_json::json;
use uuid::Uuid;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited")]
    RateLimited { retry_after_seconds: u64 },

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("upstream provider failure")]
    Provider(String),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Provider(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable identifier clients and support can key on
    fn error_id(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized => "unauthorized",
            ApiError::NotFound(_) => "not_found",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
            ApiError::Provider(_) => "billing_provider_error",
            ApiError::Internal(_) => "internal_error",
        }
    }

    /// Message safe to show an end user
    fn public_message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Unauthorized => "Authentication required".to_string(),
            ApiError::NotFound(msg) => msg.clone(),
            ApiError::RateLimited { retry_after_seconds } => {
                format!("Too many requests; retry in {} seconds", retry_after_seconds)
            }
            ApiError::ServiceUnavailable(_) => "Billing is not available right now".to_string(),
            ApiError::Provider(_) => {
                "The billing provider could not complete the request".to_string()
            }
            ApiError::Internal(_) => "Something went wrong".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let correlation_id = Uuid::new_v4();
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(
                correlation_id = %correlation_id,
                status = %status,
                error = %self,
                detail = ?self,
                "Request failed"
            );
        } else {
            tracing::debug!(
                correlation_id = %correlation_id,
                status = %status,
                error = %self,
                "Request rejected"
            );
        }

        let body = Json(json!({
            "error": self.error_id(),
            "message": self.public_message(),
            "correlation_id": correlation_id,
        }));

        let mut response = (status, body).into_response();
        if let ApiError::RateLimited { retry_after_seconds } = self {
            if let Ok(value) = retry_after_seconds.to_string().parse() {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::WebhookSignatureInvalid => ApiError::Unauthorized,
            BillingError::MissingWebhookHeader(name) => {
                ApiError::BadRequest(format!("missing required header '{}'", name))
            }
            BillingError::NotConfigured(detail) => ApiError::ServiceUnavailable(detail),
            BillingError::NotFound(what) => ApiError::NotFound(what),
            BillingError::Validation(msg) => ApiError::BadRequest(msg),
            BillingError::Provider(detail) => ApiError::Provider(detail),
            BillingError::VersionConflict | BillingError::Database(_) => {
                ApiError::Internal(anyhow::anyhow!(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_billing_error_mapping() {
        assert_eq!(
            ApiError::from(BillingError::WebhookSignatureInvalid).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(BillingError::MissingWebhookHeader("stripe-signature")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(BillingError::NotConfigured("x".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(BillingError::Validation("malformed webhook payload".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(BillingError::Provider("x".into())).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_provider_detail_not_leaked() {
        let err = ApiError::from(BillingError::Provider("stripe said: card_declined".into()));
        assert!(!err.public_message().contains("stripe"));
    }
}

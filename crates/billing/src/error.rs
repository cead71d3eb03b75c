//! Billing error taxonomy
//!
//! Webhook-triggered failures are absorbed by the ingress (the provider must
//! not retry-storm us); user-initiated action failures surface to the caller
//! through the API layer with a generic message. Quota denial is not an
//! error, it is a decision carried by `QuotaDecision`.

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Webhook authenticity failure. Always fatal to the request, never
    /// retried internally.
    #[error("webhook signature verification failed")]
    WebhookSignatureInvalid,

    /// A provider-required webhook header was absent from the delivery
    #[error("missing webhook header: {0}")]
    MissingWebhookHeader(&'static str),

    /// Billing provider is not configured; billing endpoints are unavailable
    #[error("billing provider not configured: {0}")]
    NotConfigured(String),

    /// Account or subscription absent. Surfaced for user actions; webhook
    /// events referencing unknown accounts are dropped, not raised.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input to a billing endpoint, rejected before any provider call
    #[error("validation failed: {0}")]
    Validation(String),

    /// External provider call failed or timed out
    #[error("billing provider error: {0}")]
    Provider(String),

    /// Optimistic-lock conflict on an account row; retried a bounded number
    /// of times before surfacing
    #[error("concurrent account modification detected")]
    VersionConflict,

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(e: stripe::StripeError) -> Self {
        BillingError::Provider(e.to_string())
    }
}

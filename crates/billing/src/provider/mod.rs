//! Provider Adapter
//!
//! Everything provider-specific lives behind the `BillingProvider`
//! capability trait: request/response shapes, webhook wire format, price-id
//! mapping. The Event Router and Quota Gate never learn which provider is in
//! use. The concrete implementation is selected once at process start from
//! `BILLING_PROVIDER`; there are no provider-name checks anywhere else.

pub mod stripe;

use std::sync::Arc;

use async_trait::async_trait;
use memohub_shared::{BillingInterval, PlanId, SubscriptionStatus};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::events::NormalizedEvent;

pub use self::stripe::{StripeConfig, StripeProvider};

/// Parameters for a new checkout session
#[derive(Debug, Clone)]
pub struct NewCheckout {
    pub plan: PlanId,
    pub interval: BillingInterval,
    pub account_id: Uuid,
    pub account_email: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// A hosted checkout session created at the provider
#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckoutSessionInfo {
    pub session_id: String,
    pub url: String,
}

/// A hosted billing portal session created at the provider
#[derive(Debug, Clone, serde::Serialize)]
pub struct PortalSessionInfo {
    pub url: String,
}

/// Provider-agnostic snapshot of a subscription after an outbound call
#[derive(Debug, Clone, serde::Serialize)]
pub struct SubscriptionSnapshot {
    pub subscription_id: String,
    pub customer_id: Option<String>,
    pub plan: Option<PlanId>,
    pub interval: Option<BillingInterval>,
    pub status: SubscriptionStatus,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
}

/// Capability interface for one external billing provider
#[async_trait]
pub trait BillingProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// HTTP header carrying the webhook signature for this provider
    fn signature_header(&self) -> &'static str;

    /// Verify a signed webhook delivery and normalize it.
    ///
    /// Rejects unsigned, mis-signed, and stale deliveries with
    /// `WebhookSignatureInvalid`; signature failure is always fatal to the
    /// request.
    fn verify_webhook(&self, payload: &str, signature: &str) -> BillingResult<NormalizedEvent>;

    async fn create_checkout_session(
        &self,
        checkout: NewCheckout,
    ) -> BillingResult<CheckoutSessionInfo>;

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> BillingResult<PortalSessionInfo>;

    async fn update_subscription(
        &self,
        subscription_id: &str,
        plan: PlanId,
        interval: BillingInterval,
    ) -> BillingResult<SubscriptionSnapshot>;

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        immediate: bool,
    ) -> BillingResult<SubscriptionSnapshot>;

    async fn reactivate_subscription(&self, subscription_id: &str) -> BillingResult<()>;
}

/// Construct the configured provider. Called once at process start.
pub fn from_env() -> BillingResult<Arc<dyn BillingProvider>> {
    let name = std::env::var("BILLING_PROVIDER").unwrap_or_else(|_| "stripe".to_string());
    match name.as_str() {
        "stripe" => Ok(Arc::new(StripeProvider::from_env()?)),
        other => Err(BillingError::NotConfigured(format!(
            "unsupported billing provider '{}'",
            other
        ))),
    }
}

//! Stripe implementation of the billing provider
//!
//! Outbound calls go through async-stripe. Webhook verification is manual
//! HMAC-SHA256 over `timestamp.payload` against the shared webhook secret,
//! with a 5 minute clock-skew tolerance; the delivery id and event payload
//! sit inside the signed envelope, so dedup keys on an authenticated id.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use memohub_shared::{BillingInterval, PlanId, SubscriptionStatus};
use serde::Deserialize;
use sha2::Sha256;
use stripe::generated::billing::subscription::SubscriptionProrationBehavior;
use subtle::ConstantTimeEq;
use stripe::{
    BillingPortalSession, CancelSubscription, CheckoutSession, CheckoutSessionMode, Client,
    CreateBillingPortalSession, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionSubscriptionData, CustomerId, Expandable, RecurringInterval,
    Subscription, SubscriptionId, UpdateSubscription, UpdateSubscriptionItems,
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::events::{NormalizedEvent, NormalizedEventType};
use crate::provider::{
    BillingProvider, CheckoutSessionInfo, NewCheckout, PortalSessionInfo, SubscriptionSnapshot,
};

type HmacSha256 = Hmac<Sha256>;

/// Accepted clock skew for webhook timestamps
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Stripe credentials and price-id mapping
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub price_starter_monthly: String,
    pub price_starter_yearly: String,
    pub price_pro_monthly: String,
    pub price_pro_yearly: String,
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        let var = |name: &str| {
            std::env::var(name)
                .map_err(|_| BillingError::NotConfigured(format!("{} is not set", name)))
        };
        Ok(Self {
            secret_key: var("STRIPE_SECRET_KEY")?,
            webhook_secret: var("STRIPE_WEBHOOK_SECRET")?,
            price_starter_monthly: var("STRIPE_PRICE_STARTER_MONTHLY")?,
            price_starter_yearly: var("STRIPE_PRICE_STARTER_YEARLY")?,
            price_pro_monthly: var("STRIPE_PRICE_PRO_MONTHLY")?,
            price_pro_yearly: var("STRIPE_PRICE_PRO_YEARLY")?,
        })
    }

    pub fn price_id(&self, plan: PlanId, interval: BillingInterval) -> BillingResult<&str> {
        match (plan, interval) {
            (PlanId::Starter, BillingInterval::Monthly) => Ok(&self.price_starter_monthly),
            (PlanId::Starter, BillingInterval::Yearly) => Ok(&self.price_starter_yearly),
            (PlanId::Pro, BillingInterval::Monthly) => Ok(&self.price_pro_monthly),
            (PlanId::Pro, BillingInterval::Yearly) => Ok(&self.price_pro_yearly),
            (PlanId::Free, _) => Err(BillingError::Validation(
                "the free plan has no checkout price".to_string(),
            )),
        }
    }

    pub fn plan_for_price(&self, price_id: &str) -> Option<(PlanId, BillingInterval)> {
        if price_id == self.price_starter_monthly {
            Some((PlanId::Starter, BillingInterval::Monthly))
        } else if price_id == self.price_starter_yearly {
            Some((PlanId::Starter, BillingInterval::Yearly))
        } else if price_id == self.price_pro_monthly {
            Some((PlanId::Pro, BillingInterval::Monthly))
        } else if price_id == self.price_pro_yearly {
            Some((PlanId::Pro, BillingInterval::Yearly))
        } else {
            None
        }
    }
}

/// Stripe-backed billing provider
pub struct StripeProvider {
    client: Client,
    config: StripeConfig,
}

impl StripeProvider {
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::new(config.secret_key.clone());
        Self { client, config }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    fn snapshot(&self, sub: &Subscription) -> SubscriptionSnapshot {
        let price = sub.items.data.first().and_then(|item| item.price.as_ref());
        let mapped = price.and_then(|p| self.config.plan_for_price(p.id.as_str()));
        let plan = mapped.map(|(plan, _)| plan).or_else(|| {
            sub.metadata
                .get("plan")
                .and_then(|s| PlanId::from_str(s))
        });
        let interval = price
            .and_then(|p| p.recurring.as_ref())
            .map(|r| match r.interval {
                RecurringInterval::Year => BillingInterval::Yearly,
                _ => BillingInterval::Monthly,
            })
            .or(mapped.map(|(_, interval)| interval));

        SubscriptionSnapshot {
            subscription_id: sub.id.to_string(),
            customer_id: Some(customer_id_of(sub)),
            plan,
            interval,
            status: map_stripe_status(sub.status),
            current_period_end: OffsetDateTime::from_unix_timestamp(sub.current_period_end).ok(),
            cancel_at_period_end: sub.cancel_at_period_end,
        }
    }

    fn parse_subscription_id(subscription_id: &str) -> BillingResult<SubscriptionId> {
        subscription_id.parse().map_err(|_| {
            BillingError::Validation(format!("invalid subscription id '{}'", subscription_id))
        })
    }
}

// Extract the customer id from Expandable<Customer>
fn customer_id_of(sub: &Subscription) -> String {
    match &sub.customer {
        Expandable::Id(id) => id.to_string(),
        Expandable::Object(customer) => customer.id.to_string(),
    }
}

/// Verify a `t=...,v1=...` signature header against the payload.
///
/// `now` is injected so tolerance checks are testable.
pub(crate) fn verify_signature(
    payload: &str,
    signature_header: &str,
    webhook_secret: &str,
    now: i64,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<&str> = None;

    for part in signature_header.split(',') {
        let kv: Vec<&str> = part.splitn(2, '=').collect();
        if kv.len() == 2 {
            match kv[0].trim() {
                "t" => timestamp = kv[1].parse().ok(),
                "v1" => v1_signature = Some(kv[1]),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or(BillingError::WebhookSignatureInvalid)?;
    let v1_signature = v1_signature.ok_or(BillingError::WebhookSignatureInvalid)?;

    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::warn!(
            timestamp = timestamp,
            now = now,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let secret_key = webhook_secret
        .strip_prefix("whsec_")
        .unwrap_or(webhook_secret);
    let signed_payload = format!("{}.{}", timestamp, payload);

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|_| BillingError::WebhookSignatureInvalid)?;
    mac.update(signed_payload.as_bytes());
    let computed = mac.finalize().into_bytes();

    let claimed =
        hex::decode(v1_signature).map_err(|_| BillingError::WebhookSignatureInvalid)?;

    // Constant-time comparison; a mismatched length compares unequal
    if !bool::from(computed.as_slice().ct_eq(&claimed)) {
        return Err(BillingError::WebhookSignatureInvalid);
    }

    Ok(())
}

/// Sign a payload the way the provider does. Test support.
#[cfg(test)]
pub(crate) fn sign_payload(payload: &str, webhook_secret: &str, timestamp: i64) -> String {
    #![allow(clippy::unwrap_used)]
    let secret_key = webhook_secret
        .strip_prefix("whsec_")
        .unwrap_or(webhook_secret);
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes()).unwrap();
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

/// The provider's event envelope; the interesting fields live in
/// `data.object` and vary by event type.
#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EnvelopeData,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    object: serde_json::Value,
}

fn object_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => map
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        _ => None,
    }
}

fn metadata_account_id(object: &serde_json::Value) -> Option<Uuid> {
    object
        .get("metadata")
        .and_then(|m| m.get("account_id"))
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn metadata_str<'a>(object: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    object
        .get("metadata")
        .and_then(|m| m.get(key))
        .and_then(|v| v.as_str())
}

fn map_stripe_status(status: stripe::SubscriptionStatus) -> SubscriptionStatus {
    use stripe::SubscriptionStatus as StripeSubStatus;
    match status {
        StripeSubStatus::Active => SubscriptionStatus::Active,
        StripeSubStatus::Trialing => SubscriptionStatus::Trialing,
        StripeSubStatus::PastDue | StripeSubStatus::Unpaid => SubscriptionStatus::PastDue,
        StripeSubStatus::Canceled => SubscriptionStatus::Canceled,
        StripeSubStatus::Paused => SubscriptionStatus::Paused,
        StripeSubStatus::Incomplete => SubscriptionStatus::Incomplete,
        StripeSubStatus::IncompleteExpired => SubscriptionStatus::IncompleteExpired,
    }
}

/// Map a raw status string from a webhook object
pub(crate) fn map_subscription_status(status: &str) -> SubscriptionStatus {
    match status {
        "trialing" => SubscriptionStatus::Trialing,
        "past_due" | "unpaid" => SubscriptionStatus::PastDue,
        "canceled" => SubscriptionStatus::Canceled,
        "paused" => SubscriptionStatus::Paused,
        "incomplete" => SubscriptionStatus::Incomplete,
        "incomplete_expired" => SubscriptionStatus::IncompleteExpired,
        _ => SubscriptionStatus::Active,
    }
}

/// Translate a verified envelope into the internal event vocabulary.
fn normalize(envelope: WebhookEnvelope, config: &StripeConfig) -> NormalizedEvent {
    let object = &envelope.data.object;

    let mut event = NormalizedEvent {
        delivery_id: envelope.id,
        provider: "stripe",
        event_type: NormalizedEventType::Unhandled(envelope.event_type.clone()),
        customer_id: object.get("customer").and_then(object_id),
        subscription_id: object.get("subscription").and_then(object_id),
        account_id: metadata_account_id(object),
        plan: metadata_str(object, "plan").and_then(PlanId::from_str),
        interval: metadata_str(object, "interval").and_then(BillingInterval::from_str),
        status: None,
        current_period_end: None,
        cancel_at_period_end: None,
        immediate_cancellation: false,
    };

    match envelope.event_type.as_str() {
        "checkout.session.completed" => {
            event.event_type = NormalizedEventType::CheckoutCompleted;
            // A completed checkout implies a live subscription; the
            // subscription.created event that follows fills in period end.
            event.status = Some(SubscriptionStatus::Active);
            event.cancel_at_period_end = Some(false);
        }
        "customer.subscription.created"
        | "customer.subscription.updated"
        | "customer.subscription.deleted" => {
            event.subscription_id = object.get("id").and_then(object_id);
            event.status = object
                .get("status")
                .and_then(|v| v.as_str())
                .map(map_subscription_status);
            event.current_period_end = object
                .get("current_period_end")
                .and_then(|v| v.as_i64())
                .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok());
            let cancel_at_period_end = object
                .get("cancel_at_period_end")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            event.cancel_at_period_end = Some(cancel_at_period_end);

            // Prefer the price-id mapping over metadata for plan/interval
            if let Some(price_id) = object
                .pointer("/items/data/0/price/id")
                .and_then(|v| v.as_str())
            {
                if let Some((plan, interval)) = config.plan_for_price(price_id) {
                    event.plan = Some(plan);
                    event.interval = Some(interval);
                }
            }

            event.event_type = match envelope.event_type.as_str() {
                "customer.subscription.created" => NormalizedEventType::SubscriptionCreated,
                "customer.subscription.updated" => NormalizedEventType::SubscriptionUpdated,
                _ => {
                    event.immediate_cancellation = !cancel_at_period_end;
                    NormalizedEventType::SubscriptionCanceled
                }
            };
        }
        "invoice.payment_failed" => {
            event.event_type = NormalizedEventType::PaymentFailed;
        }
        "customer.deleted" => {
            event.event_type = NormalizedEventType::CustomerDeleted;
            event.customer_id = object.get("id").and_then(object_id);
        }
        _ => {}
    }

    event
}

#[async_trait::async_trait]
impl BillingProvider for StripeProvider {
    fn name(&self) -> &'static str {
        "stripe"
    }

    fn signature_header(&self) -> &'static str {
        "stripe-signature"
    }

    fn verify_webhook(&self, payload: &str, signature: &str) -> BillingResult<NormalizedEvent> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        verify_signature(payload, signature, &self.config.webhook_secret, now)?;

        // The body is authentic but unparseable; a retry can never succeed,
        // so reject it as bad input rather than an upstream failure
        let envelope: WebhookEnvelope = serde_json::from_str(payload).map_err(|e| {
            tracing::warn!(error = %e, "Webhook payload failed to parse after valid signature");
            BillingError::Validation(format!("malformed webhook payload: {}", e))
        })?;

        Ok(normalize(envelope, &self.config))
    }

    async fn create_checkout_session(
        &self,
        checkout: NewCheckout,
    ) -> BillingResult<CheckoutSessionInfo> {
        let price_id = self.config.price_id(checkout.plan, checkout.interval)?.to_string();
        let account_id = checkout.account_id.to_string();

        let metadata: HashMap<String, String> = HashMap::from([
            ("account_id".to_string(), account_id.clone()),
            ("plan".to_string(), checkout.plan.to_string()),
            ("interval".to_string(), checkout.interval.to_string()),
        ]);

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.success_url = Some(&checkout.success_url);
        params.cancel_url = Some(&checkout.cancel_url);
        params.customer_email = Some(&checkout.account_email);
        params.client_reference_id = Some(&account_id);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price_id),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.metadata = Some(metadata.clone());
        // Propagate the account id onto the subscription so every later
        // webhook resolves without a customer lookup
        params.subscription_data = Some(CreateCheckoutSessionSubscriptionData {
            metadata: Some(metadata),
            ..Default::default()
        });

        let session = CheckoutSession::create(&self.client, params).await?;
        let url = session
            .url
            .ok_or_else(|| BillingError::Provider("checkout session has no url".to_string()))?;

        Ok(CheckoutSessionInfo {
            session_id: session.id.to_string(),
            url,
        })
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> BillingResult<PortalSessionInfo> {
        let customer: CustomerId = customer_id.parse().map_err(|_| {
            BillingError::Validation(format!("invalid customer id '{}'", customer_id))
        })?;

        let mut params = CreateBillingPortalSession::new(customer);
        params.return_url = Some(return_url);

        let session = BillingPortalSession::create(&self.client, params).await?;
        Ok(PortalSessionInfo { url: session.url })
    }

    async fn update_subscription(
        &self,
        subscription_id: &str,
        plan: PlanId,
        interval: BillingInterval,
    ) -> BillingResult<SubscriptionSnapshot> {
        let sub_id = Self::parse_subscription_id(subscription_id)?;
        let price_id = self.config.price_id(plan, interval)?.to_string();

        let current = Subscription::retrieve(&self.client, &sub_id, &[]).await?;
        let item_id = current
            .items
            .data
            .first()
            .map(|item| item.id.to_string())
            .ok_or_else(|| {
                BillingError::Provider("subscription has no items to update".to_string())
            })?;

        // Prorate so the customer is charged the difference on upgrade
        let params = UpdateSubscription {
            items: Some(vec![UpdateSubscriptionItems {
                id: Some(item_id),
                price: Some(price_id),
                ..Default::default()
            }]),
            cancel_at_period_end: Some(false),
            proration_behavior: Some(SubscriptionProrationBehavior::CreateProrations),
            ..Default::default()
        };

        let updated = Subscription::update(&self.client, &sub_id, params).await?;
        Ok(self.snapshot(&updated))
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        immediate: bool,
    ) -> BillingResult<SubscriptionSnapshot> {
        let sub_id = Self::parse_subscription_id(subscription_id)?;

        let sub = if immediate {
            let params = CancelSubscription {
                cancellation_details: None,
                invoice_now: None,
                prorate: None,
            };
            Subscription::cancel(&self.client, &sub_id, params).await?
        } else {
            let params = UpdateSubscription {
                cancel_at_period_end: Some(true),
                ..Default::default()
            };
            Subscription::update(&self.client, &sub_id, params).await?
        };

        Ok(self.snapshot(&sub))
    }

    async fn reactivate_subscription(&self, subscription_id: &str) -> BillingResult<()> {
        let sub_id = Self::parse_subscription_id(subscription_id)?;

        let params = UpdateSubscription {
            cancel_at_period_end: Some(false),
            ..Default::default()
        };
        Subscription::update(&self.client, &sub_id, params).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn config() -> StripeConfig {
        StripeConfig {
            secret_key: "sk_test".to_string(),
            webhook_secret: SECRET.to_string(),
            price_starter_monthly: "price_starter_m".to_string(),
            price_starter_yearly: "price_starter_y".to_string(),
            price_pro_monthly: "price_pro_m".to_string(),
            price_pro_yearly: "price_pro_y".to_string(),
        }
    }

    fn parse(payload: &str) -> WebhookEnvelope {
        serde_json::from_str(payload).unwrap()
    }

    #[test]
    fn test_signature_round_trip() {
        let payload = r#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;
        let header = sign_payload(payload, SECRET, now);
        assert!(verify_signature(payload, &header, SECRET, now).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = r#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;
        let header = sign_payload(payload, "whsec_other_secret", now);
        assert!(matches!(
            verify_signature(payload, &header, SECRET, now),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let now = 1_700_000_000;
        let header = sign_payload(r#"{"id":"evt_1"}"#, SECRET, now);
        assert!(matches!(
            verify_signature(r#"{"id":"evt_2"}"#, &header, SECRET, now),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn test_timestamp_tolerance_boundary() {
        let payload = "{}";
        let now = 1_700_000_000;
        let header = sign_payload(payload, SECRET, now - SIGNATURE_TOLERANCE_SECS);
        assert!(verify_signature(payload, &header, SECRET, now).is_ok());

        let stale = sign_payload(payload, SECRET, now - SIGNATURE_TOLERANCE_SECS - 1);
        assert!(verify_signature(payload, &stale, SECRET, now).is_err());
    }

    #[test]
    fn test_missing_signature_parts_rejected() {
        assert!(verify_signature("{}", "t=123", SECRET, 123).is_err());
        assert!(verify_signature("{}", "v1=abc", SECRET, 123).is_err());
        assert!(verify_signature("{}", "", SECRET, 123).is_err());
    }

    #[test]
    fn test_truncated_or_non_hex_signature_rejected() {
        let payload = r#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;
        let header = sign_payload(payload, SECRET, now);
        assert!(verify_signature(payload, &header[..header.len() - 2], SECRET, now).is_err());
        assert!(
            verify_signature(payload, &format!("t={},v1=zz", now), SECRET, now).is_err()
        );
    }

    // A well-signed but unparseable body can never succeed on retry; it
    // must surface as bad input, not an upstream failure
    #[test]
    fn test_signed_but_malformed_payload_is_validation_error() {
        let provider = StripeProvider::new(config());
        let payload = "not json";
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let header = sign_payload(payload, SECRET, now);
        assert!(matches!(
            provider.verify_webhook(payload, &header),
            Err(BillingError::Validation(_))
        ));
    }

    #[test]
    fn test_normalize_checkout_completed() {
        let account_id = Uuid::new_v4();
        let payload = format!(
            r#"{{
                "id": "evt_checkout",
                "type": "checkout.session.completed",
                "data": {{"object": {{
                    "id": "cs_1",
                    "customer": "cus_1",
                    "subscription": "sub_1",
                    "metadata": {{"account_id": "{}", "plan": "starter", "interval": "monthly"}}
                }}}}
            }}"#,
            account_id
        );

        let event = normalize(parse(&payload), &config());
        assert_eq!(event.event_type, NormalizedEventType::CheckoutCompleted);
        assert_eq!(event.delivery_id, "evt_checkout");
        assert_eq!(event.customer_id.as_deref(), Some("cus_1"));
        assert_eq!(event.subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(event.account_id, Some(account_id));
        assert_eq!(event.plan, Some(PlanId::Starter));
        assert_eq!(event.interval, Some(BillingInterval::Monthly));
        assert_eq!(event.status, Some(SubscriptionStatus::Active));
    }

    #[test]
    fn test_normalize_subscription_updated_prefers_price_mapping() {
        let payload = r#"{
            "id": "evt_sub",
            "type": "customer.subscription.updated",
            "data": {"object": {
                "id": "sub_1",
                "customer": {"id": "cus_1", "object": "customer"},
                "status": "past_due",
                "current_period_end": 1700000000,
                "cancel_at_period_end": true,
                "metadata": {"plan": "starter"},
                "items": {"data": [{"price": {"id": "price_pro_y"}}]}
            }}
        }"#;

        let event = normalize(parse(payload), &config());
        assert_eq!(event.event_type, NormalizedEventType::SubscriptionUpdated);
        assert_eq!(event.customer_id.as_deref(), Some("cus_1"));
        assert_eq!(event.subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(event.plan, Some(PlanId::Pro));
        assert_eq!(event.interval, Some(BillingInterval::Yearly));
        assert_eq!(event.status, Some(SubscriptionStatus::PastDue));
        assert_eq!(event.cancel_at_period_end, Some(true));
        assert_eq!(
            event.current_period_end,
            OffsetDateTime::from_unix_timestamp(1_700_000_000).ok()
        );
    }

    #[test]
    fn test_normalize_subscription_deleted_immediacy() {
        let immediate = r#"{
            "id": "evt_del",
            "type": "customer.subscription.deleted",
            "data": {"object": {"id": "sub_1", "customer": "cus_1", "status": "canceled", "cancel_at_period_end": false}}
        }"#;
        let event = normalize(parse(immediate), &config());
        assert_eq!(event.event_type, NormalizedEventType::SubscriptionCanceled);
        assert!(event.immediate_cancellation);

        let scheduled = r#"{
            "id": "evt_del2",
            "type": "customer.subscription.deleted",
            "data": {"object": {"id": "sub_1", "customer": "cus_1", "status": "canceled", "cancel_at_period_end": true}}
        }"#;
        let event = normalize(parse(scheduled), &config());
        assert!(!event.immediate_cancellation);
    }

    #[test]
    fn test_normalize_payment_failed() {
        let payload = r#"{
            "id": "evt_inv",
            "type": "invoice.payment_failed",
            "data": {"object": {"id": "in_1", "customer": "cus_1", "subscription": "sub_1"}}
        }"#;
        let event = normalize(parse(payload), &config());
        assert_eq!(event.event_type, NormalizedEventType::PaymentFailed);
        assert_eq!(event.customer_id.as_deref(), Some("cus_1"));
        assert_eq!(event.subscription_id.as_deref(), Some("sub_1"));
    }

    #[test]
    fn test_normalize_customer_deleted() {
        let payload = r#"{
            "id": "evt_cus",
            "type": "customer.deleted",
            "data": {"object": {"id": "cus_1", "object": "customer"}}
        }"#;
        let event = normalize(parse(payload), &config());
        assert_eq!(event.event_type, NormalizedEventType::CustomerDeleted);
        assert_eq!(event.customer_id.as_deref(), Some("cus_1"));
    }

    #[test]
    fn test_normalize_unknown_event_type() {
        let payload = r#"{
            "id": "evt_x",
            "type": "invoice.finalized",
            "data": {"object": {"id": "in_9"}}
        }"#;
        let event = normalize(parse(payload), &config());
        assert_eq!(
            event.event_type,
            NormalizedEventType::Unhandled("invoice.finalized".to_string())
        );
    }

    #[test]
    fn test_status_mapping_covers_unpaid() {
        assert_eq!(map_subscription_status("unpaid"), SubscriptionStatus::PastDue);
        assert_eq!(map_subscription_status("trialing"), SubscriptionStatus::Trialing);
        assert_eq!(map_subscription_status("active"), SubscriptionStatus::Active);
    }

    #[test]
    fn test_price_id_lookup_rejects_free() {
        let config = config();
        assert!(config.price_id(PlanId::Free, BillingInterval::Monthly).is_err());
        assert_eq!(
            config.price_id(PlanId::Pro, BillingInterval::Yearly).unwrap(),
            "price_pro_y"
        );
        assert_eq!(
            config.plan_for_price("price_starter_m"),
            Some((PlanId::Starter, BillingInterval::Monthly))
        );
        assert_eq!(config.plan_for_price("price_unknown"), None);
    }
}

// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge case tests for the billing system
//!
//! Boundary conditions and ordering hazards across:
//! - Quota decisions at and around plan limits
//! - Webhook event transitions on unusual account shapes
//! - Signature verification corner cases
//! - Usage period keys around month and year boundaries

mod quota_boundaries {
    use memohub_shared::{PlanCatalog, PlanId};

    // Denial is current >= limit; one call below the limit still passes
    #[test]
    fn test_last_call_under_limit_allowed() {
        let limits = PlanCatalog.limits(PlanId::Free);
        let current = limits.monthly_api_calls - 1;
        assert!(current < limits.monthly_api_calls);
    }

    #[test]
    fn test_limits_are_strictly_increasing_by_tier() {
        let free = PlanCatalog.limits(PlanId::Free);
        let starter = PlanCatalog.limits(PlanId::Starter);
        let pro = PlanCatalog.limits(PlanId::Pro);

        assert!(free.monthly_api_calls < starter.monthly_api_calls);
        assert!(starter.monthly_api_calls < pro.monthly_api_calls);
        assert!(free.max_memory_items < starter.max_memory_items);
        assert!(starter.max_memory_items < pro.max_memory_items);
    }
}

mod transition_edges {
    use crate::accounts::{Account, AccountPatch};
    use crate::events::{NormalizedEvent, NormalizedEventType};
    use crate::router::{plan_transition, Transition};
    use memohub_shared::{BillingInterval, PlanId, SubscriptionStatus};
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn account_on(plan: PlanId) -> Account {
        Account {
            id: Uuid::new_v4(),
            external_user_id: "ext_edge".to_string(),
            email: "edge@example.com".to_string(),
            plan,
            billing_customer_id: Some("cus_edge".to_string()),
            subscription_id: Some("sub_edge".to_string()),
            subscription_status: Some(SubscriptionStatus::Active),
            billing_interval: Some(BillingInterval::Yearly),
            current_period_end: Some(OffsetDateTime::now_utc()),
            cancel_at_period_end: false,
            version: 1,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    fn bare_event(event_type: NormalizedEventType) -> NormalizedEvent {
        NormalizedEvent {
            delivery_id: "evt_edge".to_string(),
            provider: "stripe",
            event_type,
            customer_id: None,
            subscription_id: None,
            account_id: None,
            plan: None,
            interval: None,
            status: None,
            current_period_end: None,
            cancel_at_period_end: None,
            immediate_cancellation: false,
        }
    }

    fn apply(event: &NormalizedEvent) -> AccountPatch {
        match plan_transition(event) {
            Transition::Apply { patch, .. } => patch,
            Transition::Ignore => panic!("expected a patch for {:?}", event.event_type),
        }
    }

    // A completely empty update event must not wipe any account field
    #[test]
    fn test_sparse_update_is_a_field_noop() {
        let account = account_on(PlanId::Pro);
        let patch = apply(&bare_event(NormalizedEventType::SubscriptionUpdated));
        let fields = patch.resolve(&account);

        assert_eq!(fields.plan, PlanId::Pro);
        assert_eq!(fields.subscription_id.as_deref(), Some("sub_edge"));
        assert_eq!(fields.subscription_status, Some(SubscriptionStatus::Active));
        assert_eq!(fields.billing_interval, Some(BillingInterval::Yearly));
        assert!(!fields.cancel_at_period_end);
    }

    // Cancellation of an account already on free must stay on free and
    // still clear leftover subscription fields
    #[test]
    fn test_immediate_cancel_on_free_account() {
        let account = account_on(PlanId::Free);
        let mut event = bare_event(NormalizedEventType::SubscriptionCanceled);
        event.immediate_cancellation = true;

        let fields = apply(&event).resolve(&account);
        assert_eq!(fields.plan, PlanId::Free);
        assert_eq!(fields.subscription_id, None);
        assert_eq!(fields.subscription_status, None);
    }

    // Payment failure after a scheduled cancellation keeps the cancel flag
    #[test]
    fn test_payment_failed_preserves_cancel_flag() {
        let mut account = account_on(PlanId::Starter);
        account.cancel_at_period_end = true;

        let fields = apply(&bare_event(NormalizedEventType::PaymentFailed)).resolve(&account);
        assert!(fields.cancel_at_period_end);
        assert_eq!(fields.subscription_status, Some(SubscriptionStatus::PastDue));
    }

    // A checkout event that carries no period end leaves the column null
    // until the subscription.created event fills it in
    #[test]
    fn test_checkout_without_period_end() {
        let mut account = account_on(PlanId::Free);
        account.subscription_id = None;
        account.current_period_end = None;

        let mut event = bare_event(NormalizedEventType::CheckoutCompleted);
        event.customer_id = Some("cus_new".to_string());
        event.plan = Some(PlanId::Starter);

        let fields = apply(&event).resolve(&account);
        assert_eq!(fields.plan, PlanId::Starter);
        assert_eq!(fields.current_period_end, None);
        assert_eq!(fields.billing_customer_id.as_deref(), Some("cus_new"));
    }

    // Reactivation arrives as an update clearing the cancel flag
    #[test]
    fn test_update_can_clear_scheduled_cancellation() {
        let mut account = account_on(PlanId::Starter);
        account.cancel_at_period_end = true;

        let mut event = bare_event(NormalizedEventType::SubscriptionUpdated);
        event.cancel_at_period_end = Some(false);

        let fields = apply(&event).resolve(&account);
        assert!(!fields.cancel_at_period_end);
        assert_eq!(fields.plan, PlanId::Starter);
    }
}

mod signature_edges {
    use crate::error::BillingError;
    use crate::provider::stripe::{sign_payload, verify_signature};

    const SECRET: &str = "whsec_edge_secret";

    // Extra unknown header fields must not break parsing
    #[test]
    fn test_extra_signature_scheme_versions_tolerated() {
        let payload = r#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;
        let header = format!("{},v0=deadbeef", sign_payload(payload, SECRET, now));
        assert!(verify_signature(payload, &header, SECRET, now).is_ok());
    }

    // Whitespace around parts appears in the wild
    #[test]
    fn test_signature_header_with_spaces() {
        let payload = r#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;
        let header = sign_payload(payload, SECRET, now).replace(',', ", ");
        assert!(verify_signature(payload, &header, SECRET, now).is_ok());
    }

    // A future-dated timestamp outside tolerance is as bad as a stale one
    #[test]
    fn test_future_timestamp_rejected() {
        let payload = "{}";
        let now = 1_700_000_000;
        let header = sign_payload(payload, SECRET, now + 301);
        assert!(matches!(
            verify_signature(payload, &header, SECRET, now),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    // Secrets with and without the whsec_ prefix sign identically
    #[test]
    fn test_secret_prefix_is_optional() {
        let payload = r#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;
        let header = sign_payload(payload, "whsec_abc", now);
        assert!(verify_signature(payload, &header, "abc", now).is_ok());
    }

    #[test]
    fn test_empty_payload_still_signed() {
        let now = 1_700_000_000;
        let header = sign_payload("", SECRET, now);
        assert!(verify_signature("", &header, SECRET, now).is_ok());
        assert!(verify_signature(" ", &header, SECRET, now).is_err());
    }
}

mod period_edges {
    use crate::usage::period_key;
    use time::macros::datetime;

    #[test]
    fn test_year_boundary() {
        assert_eq!(period_key(datetime!(2025-12-31 23:59:59 UTC)), "2025-12");
        assert_eq!(period_key(datetime!(2026-01-01 00:00:00 UTC)), "2026-01");
    }

    #[test]
    fn test_keys_sort_chronologically() {
        let keys = [
            period_key(datetime!(2025-09-01 00:00 UTC)),
            period_key(datetime!(2025-10-01 00:00 UTC)),
            period_key(datetime!(2025-12-01 00:00 UTC)),
            period_key(datetime!(2026-01-01 00:00 UTC)),
        ];
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}

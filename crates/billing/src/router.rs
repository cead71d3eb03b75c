//! Applies normalized webhook events to account state
//!
//! The transition itself is a pure function from event to account patch;
//! the router wraps it with account resolution and the transactional
//! patch-plus-audit write. Events that reference no known account are
//! dropped, never raised: the provider can legitimately send events for
//! customers this system has no record of.

use memohub_shared::{PlanId, SubscriptionStatus};
use serde_json::json;

use crate::accounts::{Account, AccountPatch, AccountStore};
use crate::error::BillingResult;
use crate::events::{AuditEventType, NormalizedEvent, NormalizedEventType};

/// What the router decided to do with an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Patch and audit entry committed; account version advanced by one
    Applied { audit: AuditEventType },
    /// No account matched the event's identifiers
    Dropped,
    /// Event type carries no account effect
    Ignored,
}

/// The account effect of one event type
#[derive(Debug, Clone)]
pub enum Transition {
    Apply {
        patch: AccountPatch,
        audit: AuditEventType,
    },
    Ignore,
}

/// Transition table: event snapshot to account patch.
///
/// Pure so every row is testable without a database. Fields absent from
/// the event leave the corresponding column untouched.
pub fn plan_transition(event: &NormalizedEvent) -> Transition {
    match &event.event_type {
        NormalizedEventType::CheckoutCompleted | NormalizedEventType::SubscriptionCreated => {
            let mut patch = AccountPatch {
                cancel_at_period_end: Some(false),
                ..Default::default()
            };
            if let Some(customer_id) = &event.customer_id {
                patch.billing_customer_id = Some(Some(customer_id.clone()));
            }
            if let Some(subscription_id) = &event.subscription_id {
                patch.subscription_id = Some(Some(subscription_id.clone()));
            }
            if let Some(plan) = event.plan {
                patch.plan = Some(plan);
            }
            if let Some(interval) = event.interval {
                patch.billing_interval = Some(Some(interval));
            }
            if let Some(status) = event.status {
                patch.subscription_status = Some(Some(status));
            }
            if let Some(period_end) = event.current_period_end {
                patch.current_period_end = Some(Some(period_end));
            }
            Transition::Apply {
                patch,
                audit: AuditEventType::SubscriptionCreated,
            }
        }
        NormalizedEventType::SubscriptionUpdated => {
            let mut patch = AccountPatch::default();
            if let Some(plan) = event.plan {
                patch.plan = Some(plan);
            }
            if let Some(interval) = event.interval {
                patch.billing_interval = Some(Some(interval));
            }
            if let Some(status) = event.status {
                patch.subscription_status = Some(Some(status));
            }
            if let Some(period_end) = event.current_period_end {
                patch.current_period_end = Some(Some(period_end));
            }
            if let Some(cancel) = event.cancel_at_period_end {
                patch.cancel_at_period_end = Some(cancel);
            }
            Transition::Apply {
                patch,
                audit: AuditEventType::SubscriptionUpdated,
            }
        }
        NormalizedEventType::SubscriptionCanceled => {
            let patch = if event.immediate_cancellation {
                // Downgrade now and clear the subscription; the customer
                // link survives for future checkouts
                AccountPatch {
                    plan: Some(PlanId::Free),
                    subscription_id: Some(None),
                    subscription_status: Some(None),
                    billing_interval: Some(None),
                    current_period_end: Some(None),
                    cancel_at_period_end: Some(false),
                    ..Default::default()
                }
            } else {
                // Paid access runs until period end; the reconciliation
                // sweep downgrades once the period lapses
                AccountPatch {
                    subscription_status: event.status.map(Some),
                    current_period_end: event.current_period_end.map(Some),
                    cancel_at_period_end: Some(true),
                    ..Default::default()
                }
            };
            Transition::Apply {
                patch,
                audit: AuditEventType::SubscriptionCanceled,
            }
        }
        NormalizedEventType::PaymentFailed => Transition::Apply {
            patch: AccountPatch {
                subscription_status: Some(Some(SubscriptionStatus::PastDue)),
                ..Default::default()
            },
            audit: AuditEventType::PaymentFailed,
        },
        NormalizedEventType::CustomerDeleted => Transition::Apply {
            patch: AccountPatch {
                plan: Some(PlanId::Free),
                billing_customer_id: Some(None),
                subscription_id: Some(None),
                subscription_status: Some(None),
                billing_interval: Some(None),
                current_period_end: Some(None),
                cancel_at_period_end: Some(false),
                ..Default::default()
            },
            audit: AuditEventType::CustomerDeleted,
        },
        NormalizedEventType::Unhandled(_) => Transition::Ignore,
    }
}

/// Prior and post field values recorded with every applied transition
fn audit_payload(event: &NormalizedEvent, account: &Account, patch: &AccountPatch) -> serde_json::Value {
    let fields = patch.resolve(account);
    json!({
        "provider": event.provider,
        "delivery_id": event.delivery_id,
        "event": event.event_type.to_string(),
        "prior": {
            "plan": account.plan,
            "subscription_id": account.subscription_id,
            "subscription_status": account.subscription_status,
            "billing_interval": account.billing_interval,
            "current_period_end": account.current_period_end,
            "cancel_at_period_end": account.cancel_at_period_end,
        },
        "new": {
            "plan": fields.plan,
            "subscription_id": fields.subscription_id,
            "subscription_status": fields.subscription_status,
            "billing_interval": fields.billing_interval,
            "current_period_end": fields.current_period_end,
            "cancel_at_period_end": fields.cancel_at_period_end,
        },
    })
}

#[derive(Clone)]
pub struct EventRouter {
    accounts: AccountStore,
}

impl EventRouter {
    pub fn new(accounts: AccountStore) -> Self {
        Self { accounts }
    }

    /// Resolve the event's account and apply its transition.
    ///
    /// Metadata account id wins; the customer id is the fallback. The
    /// patch and its audit entry commit in one transaction with the
    /// version guard, retried a bounded number of times on conflict.
    pub async fn route(&self, event: &NormalizedEvent) -> BillingResult<RouteOutcome> {
        let transition = plan_transition(event);
        let (patch, audit) = match transition {
            Transition::Apply { patch, audit } => (patch, audit),
            Transition::Ignore => {
                tracing::debug!(
                    delivery_id = %event.delivery_id,
                    event_type = %event.event_type,
                    "Ignoring unhandled event type"
                );
                return Ok(RouteOutcome::Ignored);
            }
        };

        let account = match self.resolve_account(event).await? {
            Some(account) => account,
            None => {
                tracing::debug!(
                    delivery_id = %event.delivery_id,
                    event_type = %event.event_type,
                    customer_id = ?event.customer_id,
                    "No account matches event, dropping"
                );
                return Ok(RouteOutcome::Dropped);
            }
        };

        let updated = self
            .accounts
            .update_with_audit(account.id, audit, |current| {
                (patch.clone(), audit_payload(event, current, &patch))
            })
            .await?;

        tracing::info!(
            account_id = %updated.id,
            event_type = %event.event_type,
            plan = %updated.plan,
            status = ?updated.subscription_status,
            version = updated.version,
            "Applied billing event"
        );

        Ok(RouteOutcome::Applied { audit })
    }

    async fn resolve_account(&self, event: &NormalizedEvent) -> BillingResult<Option<Account>> {
        if let Some(account_id) = event.account_id {
            if let Some(account) = self.accounts.get(account_id).await? {
                return Ok(Some(account));
            }
        }
        if let Some(customer_id) = &event.customer_id {
            return self.accounts.find_by_customer(customer_id).await;
        }
        Ok(None)
    }
}

//! User-initiated subscription actions
//!
//! Checkout, portal, plan change, cancel, reactivate. Input is validated
//! before anything reaches the provider. After a provider call succeeds the
//! local account is synced best-effort; the authoritative update arrives by
//! webhook, so a sync failure is logged and not surfaced.

use std::sync::Arc;

use memohub_shared::{BillingInterval, PlanCatalog, PlanId, SubscriptionStatus};
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::accounts::{Account, AccountPatch, AccountStore};
use crate::error::{BillingError, BillingResult};
use crate::events::AuditEventType;
use crate::provider::{
    BillingProvider, CheckoutSessionInfo, NewCheckout, PortalSessionInfo, SubscriptionSnapshot,
};

/// Current subscription state as shown to the account owner
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionOverview {
    pub plan: PlanId,
    pub status: Option<SubscriptionStatus>,
    pub interval: Option<BillingInterval>,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub monthly_api_calls: i64,
    pub max_memory_items: i64,
}

#[derive(Clone)]
pub struct SubscriptionService {
    accounts: AccountStore,
    provider: Arc<dyn BillingProvider>,
}

impl SubscriptionService {
    pub fn new(accounts: AccountStore, provider: Arc<dyn BillingProvider>) -> Self {
        Self { accounts, provider }
    }

    pub async fn overview(&self, account_id: Uuid) -> BillingResult<SubscriptionOverview> {
        let account = self.accounts.get_required(account_id).await?;
        let limits = PlanCatalog.limits(account.plan);
        Ok(SubscriptionOverview {
            plan: account.plan,
            status: account.subscription_status,
            interval: account.billing_interval,
            current_period_end: account.current_period_end,
            cancel_at_period_end: account.cancel_at_period_end,
            monthly_api_calls: limits.monthly_api_calls,
            max_memory_items: limits.max_memory_items,
        })
    }

    /// Start a checkout for a paid plan
    pub async fn start_checkout(
        &self,
        account_id: Uuid,
        plan: PlanId,
        interval: BillingInterval,
        success_url: String,
        cancel_url: String,
    ) -> BillingResult<CheckoutSessionInfo> {
        if !PlanCatalog::purchasable_plans().contains(&plan) {
            return Err(BillingError::Validation(format!(
                "plan '{}' cannot be purchased",
                plan
            )));
        }

        let account = self.accounts.get_required(account_id).await?;
        if account
            .subscription_status
            .is_some_and(|status| status.is_live())
        {
            return Err(BillingError::Validation(
                "account already has an active subscription; change the plan instead".to_string(),
            ));
        }

        let session = self
            .provider
            .create_checkout_session(NewCheckout {
                account_id: account.id,
                account_email: account.email.clone(),
                plan,
                interval,
                success_url,
                cancel_url,
            })
            .await?;

        tracing::info!(
            account_id = %account.id,
            plan = %plan,
            interval = %interval,
            session_id = %session.session_id,
            "Created checkout session"
        );
        Ok(session)
    }

    /// Open the provider's self-serve billing portal
    pub async fn open_portal(
        &self,
        account_id: Uuid,
        return_url: &str,
    ) -> BillingResult<PortalSessionInfo> {
        let account = self.accounts.get_required(account_id).await?;
        let customer_id = account.billing_customer_id.as_deref().ok_or_else(|| {
            BillingError::Validation("account has no billing profile yet".to_string())
        })?;
        self.provider.create_portal_session(customer_id, return_url).await
    }

    /// Switch an existing subscription to a different plan or interval
    pub async fn change_plan(
        &self,
        account_id: Uuid,
        plan: PlanId,
        interval: BillingInterval,
    ) -> BillingResult<SubscriptionSnapshot> {
        if !PlanCatalog::purchasable_plans().contains(&plan) {
            return Err(BillingError::Validation(format!(
                "cannot switch to plan '{}'; cancel the subscription instead",
                plan
            )));
        }

        let account = self.accounts.get_required(account_id).await?;
        let subscription_id = Self::require_subscription(&account)?;

        let snapshot = self
            .provider
            .update_subscription(subscription_id, plan, interval)
            .await?;

        self.sync_snapshot(account.id, &snapshot, AuditEventType::SubscriptionUpdated)
            .await;
        Ok(snapshot)
    }

    /// Cancel now (downgrade immediately) or at period end (flag only)
    pub async fn cancel(
        &self,
        account_id: Uuid,
        immediate: bool,
    ) -> BillingResult<SubscriptionSnapshot> {
        let account = self.accounts.get_required(account_id).await?;
        let subscription_id = Self::require_subscription(&account)?;

        let snapshot = self
            .provider
            .cancel_subscription(subscription_id, immediate)
            .await?;

        let patch = if immediate {
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
            AccountPatch {
                cancel_at_period_end: Some(true),
                ..Default::default()
            }
        };
        self.sync_patch(account.id, patch, AuditEventType::SubscriptionCanceled)
            .await;

        tracing::info!(
            account_id = %account.id,
            immediate = immediate,
            "Canceled subscription"
        );
        Ok(snapshot)
    }

    /// Clear a scheduled cancellation before the period lapses
    pub async fn reactivate(&self, account_id: Uuid) -> BillingResult<()> {
        let account = self.accounts.get_required(account_id).await?;
        let subscription_id = Self::require_subscription(&account)?;

        if !account.cancel_at_period_end {
            return Err(BillingError::Validation(
                "subscription is not scheduled for cancellation".to_string(),
            ));
        }

        self.provider.reactivate_subscription(subscription_id).await?;

        self.sync_patch(
            account.id,
            AccountPatch {
                cancel_at_period_end: Some(false),
                ..Default::default()
            },
            AuditEventType::SubscriptionReactivated,
        )
        .await;

        tracing::info!(account_id = %account.id, "Reactivated subscription");
        Ok(())
    }

    fn require_subscription(account: &Account) -> BillingResult<&str> {
        account
            .subscription_id
            .as_deref()
            .ok_or_else(|| BillingError::NotFound("account has no subscription".to_string()))
    }

    async fn sync_snapshot(
        &self,
        account_id: Uuid,
        snapshot: &SubscriptionSnapshot,
        audit: AuditEventType,
    ) {
        let patch = AccountPatch {
            plan: snapshot.plan,
            subscription_id: Some(Some(snapshot.subscription_id.clone())),
            billing_customer_id: snapshot.customer_id.clone().map(Some),
            subscription_status: Some(Some(snapshot.status)),
            billing_interval: snapshot.interval.map(Some),
            current_period_end: snapshot.current_period_end.map(Some),
            cancel_at_period_end: Some(snapshot.cancel_at_period_end),
        };
        self.sync_patch(account_id, patch, audit).await;
    }

    // The webhook is authoritative; local sync just narrows the window
    // where the UI shows stale state, so failures only log
    async fn sync_patch(&self, account_id: Uuid, patch: AccountPatch, audit: AuditEventType) {
        let result = self
            .accounts
            .update_with_audit(account_id, audit, |account| {
                let fields = patch.resolve(account);
                (
                    patch.clone(),
                    serde_json::json!({
                        "source": "user_action",
                        "prior": { "plan": account.plan, "cancel_at_period_end": account.cancel_at_period_end },
                        "new": { "plan": fields.plan, "cancel_at_period_end": fields.cancel_at_period_end },
                    }),
                )
            })
            .await;

        if let Err(e) = result {
            tracing::warn!(
                account_id = %account_id,
                audit = %audit,
                error = %e,
                "Local subscription sync failed; webhook will reconcile"
            );
        }
    }
}

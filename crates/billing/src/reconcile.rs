//! Scheduled reconciliation between provider truth and local accounts
//!
//! Two passes. Orphan detection reports accounts that still look subscribed
//! after their paid period lapsed; the correct target state is unknown
//! without asking the provider, so these are alerted, never auto-repaired.
//! Expiration enforcement downgrades accounts whose scheduled cancellation
//! has passed its period end, one transaction per account so a single
//! failure cannot abort the rest of the sweep.

use memohub_shared::PlanId;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::accounts::{Account, AccountPatch, AccountStore};
use crate::error::BillingResult;
use crate::events::AuditEventType;

/// Whole days between period end and now, clamped at zero
fn days_overdue(now: OffsetDateTime, period_end: OffsetDateTime) -> i64 {
    (now - period_end).whole_days().max(0)
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum SweepAction {
    Downgraded { prior_plan: PlanId },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepAccountResult {
    pub account_id: Uuid,
    #[serde(flatten)]
    pub action: SweepAction,
}

/// Structured summary of one sweep run
#[derive(Debug, Clone, Serialize)]
pub struct SweepSummary {
    pub processed_count: usize,
    pub orphaned_count: usize,
    pub results: Vec<SweepAccountResult>,
}

#[derive(Clone)]
pub struct ReconciliationSweep {
    accounts: AccountStore,
}

impl ReconciliationSweep {
    pub fn new(accounts: AccountStore) -> Self {
        Self { accounts }
    }

    pub async fn run(&self) -> BillingResult<SweepSummary> {
        let now = OffsetDateTime::now_utc();

        let orphaned = self.report_orphans(now).await?;
        let results = self.enforce_expirations(now).await?;

        let summary = SweepSummary {
            processed_count: results.len(),
            orphaned_count: orphaned,
            results,
        };
        tracing::info!(
            processed = summary.processed_count,
            orphaned = summary.orphaned_count,
            "Reconciliation sweep finished"
        );
        Ok(summary)
    }

    /// Alert on accounts whose subscription looks live past its period end.
    /// Operator action required; alert routing watches this log stream.
    async fn report_orphans(&self, now: OffsetDateTime) -> BillingResult<usize> {
        let orphans = self.accounts.find_orphaned(now).await?;
        for account in &orphans {
            let overdue = account
                .current_period_end
                .map(|end| days_overdue(now, end))
                .unwrap_or(0);
            tracing::error!(
                severity = "critical",
                account_id = %account.id,
                email = %account.email,
                plan = %account.plan,
                subscription_id = ?account.subscription_id,
                days_overdue = overdue,
                "Orphaned subscription: period lapsed without a closing webhook"
            );
        }
        Ok(orphans.len())
    }

    async fn enforce_expirations(
        &self,
        now: OffsetDateTime,
    ) -> BillingResult<Vec<SweepAccountResult>> {
        let expired = self.accounts.find_cancellation_expired(now).await?;
        let mut results = Vec::with_capacity(expired.len());

        for account in expired {
            let action = match self.downgrade(&account).await {
                Ok(()) => SweepAction::Downgraded {
                    prior_plan: account.plan,
                },
                Err(e) => {
                    tracing::error!(
                        account_id = %account.id,
                        error = %e,
                        "Failed to downgrade expired subscription"
                    );
                    SweepAction::Failed {
                        error: e.to_string(),
                    }
                }
            };
            results.push(SweepAccountResult {
                account_id: account.id,
                action,
            });
        }
        Ok(results)
    }

    async fn downgrade(&self, account: &Account) -> BillingResult<()> {
        let patch = AccountPatch {
            plan: Some(PlanId::Free),
            subscription_id: Some(None),
            subscription_status: Some(None),
            billing_interval: Some(None),
            current_period_end: Some(None),
            cancel_at_period_end: Some(false),
            ..Default::default()
        };

        self.accounts
            .update_with_audit(account.id, AuditEventType::SubscriptionExpired, |current| {
                (
                    patch.clone(),
                    serde_json::json!({
                        "source": "reconciliation_sweep",
                        "prior_plan": current.plan,
                        "subscription_id": current.subscription_id,
                        "current_period_end": current.current_period_end,
                    }),
                )
            })
            .await?;

        tracing::info!(
            account_id = %account.id,
            prior_plan = %account.plan,
            "Downgraded expired subscription to free"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_days_overdue() {
        let now = datetime!(2026-06-10 12:00 UTC);
        assert_eq!(days_overdue(now, datetime!(2026-06-07 12:00 UTC)), 3);
        assert_eq!(days_overdue(now, datetime!(2026-06-10 06:00 UTC)), 0);
        // Future period ends never report negative
        assert_eq!(days_overdue(now, datetime!(2026-06-12 00:00 UTC)), 0);
    }
}

//! Plan-limit enforcement for API calls and stored memories
//!
//! The gate reads, it never blocks on writes: an allowed API-call check
//! spawns the ledger increment in the background so the hot path only pays
//! for one SELECT. Any internal failure fails open with a degraded reason,
//! because billing must not take the product down.

use std::sync::Arc;

use memohub_shared::{PlanCatalog, PlanId};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::accounts::AccountStore;
use crate::error::BillingResult;
use crate::usage::UsageLedger;

/// Resource classes the gate meters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaResource {
    ApiCalls,
    StoredMemories,
}

impl QuotaResource {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaResource::ApiCalls => "api_calls",
            QuotaResource::StoredMemories => "stored_memories",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotaUsage {
    pub current: i64,
    pub limit: i64,
    /// Integer percentage, capped at 100
    pub percentage: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<QuotaUsage>,
}

impl QuotaDecision {
    fn allowed(usage: QuotaUsage) -> Self {
        Self {
            allowed: true,
            reason: None,
            usage: Some(usage),
        }
    }

    fn denied(reason: impl Into<String>, usage: QuotaUsage) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            usage: Some(usage),
        }
    }

    fn degraded(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: Some(reason.into()),
            usage: None,
        }
    }
}

/// Whole-percent usage, floored, capped at 100
pub(crate) fn usage_percentage(current: i64, limit: i64) -> u8 {
    if limit <= 0 {
        return 100;
    }
    let pct = (current.max(0).saturating_mul(100)) / limit;
    pct.min(100) as u8
}

/// Counts stored memory items; the storage service owns that table
#[async_trait::async_trait]
pub trait StoredItemCounter: Send + Sync {
    async fn count_items(&self, account_id: Uuid) -> BillingResult<i64>;
}

/// Counts rows in the `memories` table directly
pub struct PgStoredItemCounter {
    pool: PgPool,
}

impl PgStoredItemCounter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl StoredItemCounter for PgStoredItemCounter {
    async fn count_items(&self, account_id: Uuid) -> BillingResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM memories WHERE account_id = $1")
                .bind(account_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

#[derive(Clone)]
pub struct QuotaGate {
    accounts: AccountStore,
    ledger: UsageLedger,
    items: Arc<dyn StoredItemCounter>,
    catalog: PlanCatalog,
}

impl QuotaGate {
    pub fn new(accounts: AccountStore, ledger: UsageLedger, items: Arc<dyn StoredItemCounter>) -> Self {
        Self {
            accounts,
            ledger,
            items,
            catalog: PlanCatalog,
        }
    }

    /// Decide whether `account_id` may consume one unit of `resource`.
    ///
    /// Denies iff current usage has reached the plan limit. Internal read
    /// errors fail open; the decision carries the degraded reason so
    /// callers can tell a clean allow from a shrug.
    pub async fn check(&self, account_id: Uuid, resource: QuotaResource) -> QuotaDecision {
        let plan = match self.accounts.get(account_id).await {
            Ok(Some(account)) => account.plan,
            Ok(None) => {
                tracing::warn!(account_id = %account_id, "Quota check for unknown account");
                PlanId::Free
            }
            Err(e) => {
                tracing::error!(account_id = %account_id, error = %e, "Quota check failed to load account, failing open");
                return QuotaDecision::degraded("account lookup failed");
            }
        };

        let limits = self.catalog.limits(plan);
        let (current, limit) = match resource {
            QuotaResource::ApiCalls => {
                match self.ledger.current_calls(account_id).await {
                    Ok(current) => (current, limits.monthly_api_calls),
                    Err(e) => {
                        tracing::error!(account_id = %account_id, error = %e, "Quota check failed to read usage, failing open");
                        return QuotaDecision::degraded("usage read failed");
                    }
                }
            }
            QuotaResource::StoredMemories => {
                match self.items.count_items(account_id).await {
                    Ok(current) => (current, limits.max_memory_items),
                    Err(e) => {
                        tracing::error!(account_id = %account_id, error = %e, "Quota check failed to count items, failing open");
                        return QuotaDecision::degraded("item count failed");
                    }
                }
            }
        };

        let usage = QuotaUsage {
            current,
            limit,
            percentage: usage_percentage(current, limit),
        };

        if current >= limit {
            tracing::info!(
                account_id = %account_id,
                resource = resource.as_str(),
                current = current,
                limit = limit,
                plan = %plan,
                "Quota exceeded"
            );
            return QuotaDecision::denied(
                format!("{} limit reached for the {} plan", resource.as_str(), plan),
                usage,
            );
        }

        // The caller is about to do the work; count it without blocking them
        if resource == QuotaResource::ApiCalls {
            let ledger = self.ledger.clone();
            tokio::spawn(async move {
                if let Err(e) = ledger.record_call(account_id).await {
                    tracing::error!(account_id = %account_id, error = %e, "Failed to record API call");
                }
            });
        }

        QuotaDecision::allowed(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_floors() {
        // 4999/5000 is 99.98%, reported as 99 so a UI never shows 100
        // until the limit is actually reached
        assert_eq!(usage_percentage(4999, 5000), 99);
        assert_eq!(usage_percentage(5000, 5000), 100);
        assert_eq!(usage_percentage(0, 5000), 0);
        assert_eq!(usage_percentage(1, 5000), 0);
    }

    #[test]
    fn test_percentage_caps_at_100() {
        assert_eq!(usage_percentage(12_000, 5000), 100);
        assert_eq!(usage_percentage(i64::MAX, 5000), 100);
    }

    #[test]
    fn test_percentage_degenerate_limit() {
        assert_eq!(usage_percentage(0, 0), 100);
        assert_eq!(usage_percentage(5, -1), 100);
        assert_eq!(usage_percentage(-3, 100), 0);
    }
}

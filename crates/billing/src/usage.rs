//! Per-account, per-month API call counters
//!
//! Counters are keyed by (account, calendar month UTC) and incremented with
//! a single atomic upsert, so concurrent requests never lose an increment.
//! Rows are created lazily and kept indefinitely; a missing row reads as 0.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Calendar-month period key, `YYYY-MM` in UTC
pub fn period_key(at: OffsetDateTime) -> String {
    format!("{:04}-{:02}", at.year(), u8::from(at.month()))
}

pub fn current_period_key() -> String {
    period_key(OffsetDateTime::now_utc())
}

/// Storage contract for usage counters. `add_calls` must be atomic: two
/// concurrent adds to the same (account, period) both land in full.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn add_calls(&self, account_id: Uuid, period: &str, count: i64) -> BillingResult<()>;

    async fn calls(&self, account_id: Uuid, period: &str) -> BillingResult<i64>;
}

/// Counters in the `usage_records` table. The single-statement upsert is
/// what makes the increment atomic; this must never become a
/// read-modify-write in application code.
pub struct PgUsageStore {
    pool: PgPool,
}

impl PgUsageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageStore for PgUsageStore {
    async fn add_calls(&self, account_id: Uuid, period: &str, count: i64) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_records (account_id, period, api_calls)
            VALUES ($1, $2, $3)
            ON CONFLICT (account_id, period)
            DO UPDATE SET
                api_calls = usage_records.api_calls + EXCLUDED.api_calls,
                updated_at = NOW()
            "#,
        )
        .bind(account_id)
        .bind(period)
        .bind(count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn calls(&self, account_id: Uuid, period: &str) -> BillingResult<i64> {
        let count: Option<i64> = sqlx::query_scalar(
            "SELECT api_calls FROM usage_records WHERE account_id = $1 AND period = $2",
        )
        .bind(account_id)
        .bind(period)
        .fetch_optional(&self.pool)
        .await?;
        Ok(count.unwrap_or(0))
    }
}

#[derive(Clone)]
pub struct UsageLedger {
    store: Arc<dyn UsageStore>,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self { store }
    }

    /// Record one API call against the current period
    pub async fn record_call(&self, account_id: Uuid) -> BillingResult<()> {
        self.record_calls(account_id, 1).await
    }

    /// Record `count` API calls in one atomic increment
    pub async fn record_calls(&self, account_id: Uuid, count: i64) -> BillingResult<()> {
        if count <= 0 {
            return Ok(());
        }
        self.store
            .add_calls(account_id, &current_period_key(), count)
            .await
    }

    /// API calls recorded for the current period; 0 when no row exists
    pub async fn current_calls(&self, account_id: Uuid) -> BillingResult<i64> {
        self.calls_for_period(account_id, &current_period_key())
            .await
    }

    pub async fn calls_for_period(&self, account_id: Uuid, period: &str) -> BillingResult<i64> {
        self.store.calls(account_id, period).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use time::macros::datetime;

    #[test]
    fn test_period_key_zero_pads_month() {
        assert_eq!(period_key(datetime!(2026-03-15 10:30 UTC)), "2026-03");
        assert_eq!(period_key(datetime!(2026-11-01 00:00 UTC)), "2026-11");
    }

    #[test]
    fn test_period_key_month_boundary() {
        assert_eq!(period_key(datetime!(2026-01-31 23:59:59 UTC)), "2026-01");
        assert_eq!(period_key(datetime!(2026-02-01 00:00:00 UTC)), "2026-02");
    }

    struct InMemoryUsageStore {
        counters: Mutex<HashMap<(Uuid, String), i64>>,
    }

    impl InMemoryUsageStore {
        fn new() -> Self {
            Self {
                counters: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl UsageStore for InMemoryUsageStore {
        async fn add_calls(
            &self,
            account_id: Uuid,
            period: &str,
            count: i64,
        ) -> BillingResult<()> {
            let mut counters = self.counters.lock().unwrap();
            *counters.entry((account_id, period.to_string())).or_insert(0) += count;
            Ok(())
        }

        async fn calls(&self, account_id: Uuid, period: &str) -> BillingResult<i64> {
            let counters = self.counters.lock().unwrap();
            Ok(*counters
                .get(&(account_id, period.to_string()))
                .unwrap_or(&0))
        }
    }

    // N concurrent increments for the same account must converge to
    // exactly N; the storage contract forbids lost updates
    #[tokio::test]
    async fn test_parallel_increments_converge() {
        let ledger = UsageLedger::new(Arc::new(InMemoryUsageStore::new()));
        let account_id = Uuid::new_v4();

        let mut handles = Vec::new();
        for _ in 0..100 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move { ledger.record_call(account_id).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(ledger.current_calls(account_id).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_non_positive_counts_are_noops() {
        let ledger = UsageLedger::new(Arc::new(InMemoryUsageStore::new()));
        let account_id = Uuid::new_v4();

        ledger.record_calls(account_id, 0).await.unwrap();
        ledger.record_calls(account_id, -5).await.unwrap();
        assert_eq!(ledger.current_calls(account_id).await.unwrap(), 0);

        ledger.record_calls(account_id, 3).await.unwrap();
        assert_eq!(ledger.current_calls(account_id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_periods_are_isolated() {
        let store = Arc::new(InMemoryUsageStore::new());
        let ledger = UsageLedger::new(store.clone());
        let account_id = Uuid::new_v4();

        store.add_calls(account_id, "2026-01", 7).await.unwrap();
        store.add_calls(account_id, "2026-02", 2).await.unwrap();

        assert_eq!(ledger.calls_for_period(account_id, "2026-01").await.unwrap(), 7);
        assert_eq!(ledger.calls_for_period(account_id, "2026-02").await.unwrap(), 2);
        assert_eq!(ledger.calls_for_period(account_id, "2025-12").await.unwrap(), 0);
    }
}

//! Account Store
//!
//! Durable table of billable accounts. The account row is the primary shared
//! mutable resource in the billing system; every mutation goes through a
//! conditional update on the `version` column so concurrent writers detect
//! each other instead of overwriting blindly.

use memohub_shared::{BillingInterval, PlanId, SubscriptionStatus};
use sqlx::{PgConnection, PgPool};
use time::OffsetDateTime;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Bounded retries for optimistic-lock conflicts
const VERSION_CONFLICT_RETRIES: usize = 3;

/// Run `attempt` under the bounded optimistic-lock retry policy. Only
/// version conflicts are retried; every other error surfaces immediately.
pub(crate) async fn retry_version_conflict<T, F, Fut>(attempt: F) -> BillingResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = BillingResult<T>>,
{
    let strategy = FixedInterval::from_millis(25).take(VERSION_CONFLICT_RETRIES);
    RetryIf::spawn(strategy, attempt, |e: &BillingError| {
        matches!(e, BillingError::VersionConflict)
    })
    .await
}

/// A billable tenant
#[derive(Debug, Clone)]
pub struct Account {
    pub id: Uuid,
    pub external_user_id: String,
    pub email: String,
    pub plan: PlanId,
    pub billing_customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub subscription_status: Option<SubscriptionStatus>,
    pub billing_interval: Option<BillingInterval>,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub version: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    external_user_id: String,
    email: String,
    plan: String,
    billing_customer_id: Option<String>,
    subscription_id: Option<String>,
    subscription_status: Option<String>,
    billing_interval: Option<String>,
    current_period_end: Option<OffsetDateTime>,
    cancel_at_period_end: bool,
    version: i64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<AccountRow> for Account {
    type Error = BillingError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let plan = PlanId::from_str(&row.plan)
            .ok_or_else(|| BillingError::Database(format!("unknown plan '{}'", row.plan)))?;
        let subscription_status = match row.subscription_status.as_deref() {
            Some(s) => Some(SubscriptionStatus::from_str(s).ok_or_else(|| {
                BillingError::Database(format!("unknown subscription status '{}'", s))
            })?),
            None => None,
        };
        let billing_interval = row
            .billing_interval
            .as_deref()
            .and_then(BillingInterval::from_str);

        Ok(Account {
            id: row.id,
            external_user_id: row.external_user_id,
            email: row.email,
            plan,
            billing_customer_id: row.billing_customer_id,
            subscription_id: row.subscription_id,
            subscription_status,
            billing_interval,
            current_period_end: row.current_period_end,
            cancel_at_period_end: row.cancel_at_period_end,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Partial update to an account. `None` leaves a field untouched; the inner
/// option expresses set-to-null for nullable columns.
#[derive(Debug, Clone, Default)]
pub struct AccountPatch {
    pub plan: Option<PlanId>,
    pub billing_customer_id: Option<Option<String>>,
    pub subscription_id: Option<Option<String>>,
    pub subscription_status: Option<Option<SubscriptionStatus>>,
    pub billing_interval: Option<Option<BillingInterval>>,
    pub current_period_end: Option<Option<OffsetDateTime>>,
    pub cancel_at_period_end: Option<bool>,
}

impl AccountPatch {
    /// Resolve the post-patch field values against an account snapshot.
    /// Pure, so transition logic is testable without a database.
    pub fn resolve(&self, account: &Account) -> ResolvedAccountFields {
        ResolvedAccountFields {
            plan: self.plan.unwrap_or(account.plan),
            billing_customer_id: self
                .billing_customer_id
                .clone()
                .unwrap_or_else(|| account.billing_customer_id.clone()),
            subscription_id: self
                .subscription_id
                .clone()
                .unwrap_or_else(|| account.subscription_id.clone()),
            subscription_status: self
                .subscription_status
                .unwrap_or(account.subscription_status),
            billing_interval: self.billing_interval.unwrap_or(account.billing_interval),
            current_period_end: self
                .current_period_end
                .unwrap_or(account.current_period_end),
            cancel_at_period_end: self
                .cancel_at_period_end
                .unwrap_or(account.cancel_at_period_end),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.plan.is_none()
            && self.billing_customer_id.is_none()
            && self.subscription_id.is_none()
            && self.subscription_status.is_none()
            && self.billing_interval.is_none()
            && self.current_period_end.is_none()
            && self.cancel_at_period_end.is_none()
    }
}

/// Fully-resolved account fields after applying a patch
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAccountFields {
    pub plan: PlanId,
    pub billing_customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub subscription_status: Option<SubscriptionStatus>,
    pub billing_interval: Option<BillingInterval>,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
}

/// Durable store for account rows
#[derive(Clone)]
pub struct AccountStore {
    pool: PgPool,
}

impl AccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, account_id: Uuid) -> BillingResult<Option<Account>> {
        let row: Option<AccountRow> = sqlx::query_as("SELECT * FROM accounts WHERE id = $1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Account::try_from).transpose()
    }

    pub async fn get_required(&self, account_id: Uuid) -> BillingResult<Account> {
        self.get(account_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("account {}", account_id)))
    }

    pub async fn find_by_customer(&self, customer_id: &str) -> BillingResult<Option<Account>> {
        let row: Option<AccountRow> =
            sqlx::query_as("SELECT * FROM accounts WHERE billing_customer_id = $1")
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Account::try_from).transpose()
    }

    pub async fn find_by_subscription(&self, subscription_id: &str) -> BillingResult<Option<Account>> {
        let row: Option<AccountRow> =
            sqlx::query_as("SELECT * FROM accounts WHERE subscription_id = $1")
                .bind(subscription_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Account::try_from).transpose()
    }

    /// Accounts that still look subscribed but whose paid period has
    /// lapsed. A missed or failed webhook is the usual cause.
    pub async fn find_orphaned(&self, now: OffsetDateTime) -> BillingResult<Vec<Account>> {
        let rows: Vec<AccountRow> = sqlx::query_as(
            r#"
            SELECT * FROM accounts
            WHERE subscription_status IN ('active', 'trialing')
              AND plan != 'free'
              AND current_period_end IS NOT NULL
              AND current_period_end < $1
            ORDER BY current_period_end
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Account::try_from).collect()
    }

    /// Accounts with a scheduled cancellation whose period end has passed,
    /// due for downgrade to free.
    pub async fn find_cancellation_expired(
        &self,
        now: OffsetDateTime,
    ) -> BillingResult<Vec<Account>> {
        let rows: Vec<AccountRow> = sqlx::query_as(
            r#"
            SELECT * FROM accounts
            WHERE cancel_at_period_end = TRUE
              AND subscription_status = 'canceled'
              AND plan != 'free'
              AND current_period_end IS NOT NULL
              AND current_period_end < $1
            ORDER BY current_period_end
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Account::try_from).collect()
    }

    /// Resolve the account for an external identity, creating it on first
    /// sight. New accounts start on the free plan.
    pub async fn resolve_or_create(
        &self,
        external_user_id: &str,
        email: &str,
    ) -> BillingResult<Account> {
        let row: AccountRow = sqlx::query_as(
            r#"
            INSERT INTO accounts (external_user_id, email)
            VALUES ($1, $2)
            ON CONFLICT (external_user_id) DO UPDATE SET email = EXCLUDED.email
            RETURNING *
            "#,
        )
        .bind(external_user_id)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Account::try_from(row)
    }

    /// Apply a patch to an account row inside an existing transaction.
    ///
    /// The conditional `WHERE version = $expected` makes concurrent writers
    /// visible: zero rows affected means someone else won the race and the
    /// caller must refetch and retry.
    pub async fn apply_patch(
        &self,
        conn: &mut PgConnection,
        account: &Account,
        patch: &AccountPatch,
    ) -> BillingResult<bool> {
        let fields = patch.resolve(account);
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET plan = $2,
                billing_customer_id = $3,
                subscription_id = $4,
                subscription_status = $5,
                billing_interval = $6,
                current_period_end = $7,
                cancel_at_period_end = $8,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $9
            "#,
        )
        .bind(account.id)
        .bind(fields.plan.as_str())
        .bind(&fields.billing_customer_id)
        .bind(&fields.subscription_id)
        .bind(fields.subscription_status.map(|s| s.as_str()))
        .bind(fields.billing_interval.map(|i| i.as_str()))
        .bind(fields.current_period_end)
        .bind(fields.cancel_at_period_end)
        .bind(account.version)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Apply a patch with its audit payload builder under bounded
    /// optimistic-lock retry. The closure sees the fresh account snapshot on
    /// every attempt; patch and audit entry commit in one transaction.
    pub async fn update_with_audit<F>(
        &self,
        account_id: Uuid,
        audit_type: crate::events::AuditEventType,
        build: F,
    ) -> BillingResult<Account>
    where
        F: Fn(&Account) -> (AccountPatch, serde_json::Value),
    {
        retry_version_conflict(|| async {
            let account = self.get_required(account_id).await?;
            let (patch, payload) = build(&account);

            let mut tx = self.pool.begin().await?;
            if !self.apply_patch(&mut tx, &account, &patch).await? {
                return Err(BillingError::VersionConflict);
            }
            crate::events::AuditLogger::record_in(&mut tx, account_id, audit_type, payload)
                .await?;
            tx.commit().await?;

            self.get_required(account_id).await
        })
        .await
    }

    /// Hard-delete an account (full account deletion only). Usage ledger
    /// rows cascade at the schema level.
    pub async fn delete(&self, account_id: Uuid) -> BillingResult<()> {
        sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

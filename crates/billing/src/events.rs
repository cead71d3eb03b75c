//! Normalized billing events and the audit log
//!
//! The provider adapter turns each inbound webhook delivery into a
//! `NormalizedEvent`; the rest of the system never sees provider wire
//! formats. Events are ephemeral, but every application of one writes an
//! append-only `billing_audit_log` entry in the same transaction as the
//! account mutation it documents.

use memohub_shared::{BillingInterval, PlanId, SubscriptionStatus};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Provider-agnostic webhook event type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedEventType {
    CheckoutCompleted,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionCanceled,
    PaymentFailed,
    CustomerDeleted,
    /// Event types we receive but do not act on; carried for logging
    Unhandled(String),
}

impl std::fmt::Display for NormalizedEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NormalizedEventType::CheckoutCompleted => "checkout.completed",
            NormalizedEventType::SubscriptionCreated => "subscription.created",
            NormalizedEventType::SubscriptionUpdated => "subscription.updated",
            NormalizedEventType::SubscriptionCanceled => "subscription.canceled",
            NormalizedEventType::PaymentFailed => "payment.failed",
            NormalizedEventType::CustomerDeleted => "customer.deleted",
            NormalizedEventType::Unhandled(raw) => raw,
        };
        write!(f, "{}", s)
    }
}

/// Provider-agnostic representation of one webhook delivery
#[derive(Debug, Clone)]
pub struct NormalizedEvent {
    /// Provider-assigned delivery id, the dedup key
    pub delivery_id: String,
    /// Which provider adapter produced this event
    pub provider: &'static str,
    pub event_type: NormalizedEventType,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    /// Internal account id propagated through provider metadata
    pub account_id: Option<Uuid>,
    pub plan: Option<PlanId>,
    pub interval: Option<BillingInterval>,
    pub status: Option<SubscriptionStatus>,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: Option<bool>,
    /// For cancellations: the subscription ends now rather than at period end
    pub immediate_cancellation: bool,
}

/// Audit log entry type, stored as the dotted event name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventType {
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionCanceled,
    SubscriptionReactivated,
    /// Written by the reconciliation sweep when a scheduled cancellation
    /// passes its period end
    SubscriptionExpired,
    PaymentFailed,
    CustomerDeleted,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::SubscriptionCreated => "subscription.created",
            AuditEventType::SubscriptionUpdated => "subscription.updated",
            AuditEventType::SubscriptionCanceled => "subscription.canceled",
            AuditEventType::SubscriptionReactivated => "subscription.reactivated",
            AuditEventType::SubscriptionExpired => "subscription.expired",
            AuditEventType::PaymentFailed => "payment.failed",
            AuditEventType::CustomerDeleted => "customer.deleted",
        }
    }
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted audit log entry
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub account_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: OffsetDateTime,
}

/// Append-only audit log over `billing_audit_log`
#[derive(Clone)]
pub struct AuditLogger {
    pool: PgPool,
}

impl AuditLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Write an entry inside the caller's transaction. All account mutations
    /// go through this so the entry commits or rolls back with the change it
    /// documents.
    pub async fn record_in(
        conn: &mut PgConnection,
        account_id: Uuid,
        event_type: AuditEventType,
        payload: serde_json::Value,
    ) -> BillingResult<Uuid> {
        let id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO billing_audit_log (account_id, event_type, payload)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(account_id)
        .bind(event_type.as_str())
        .bind(&payload)
        .fetch_one(conn)
        .await?;
        Ok(id.0)
    }

    /// Recent entries for an account, newest first
    pub async fn for_account(
        &self,
        account_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<AuditLogEntry>> {
        let entries = sqlx::query_as(
            r#"
            SELECT id, account_id, event_type, payload, created_at
            FROM billing_audit_log
            WHERE account_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names_are_dotted() {
        assert_eq!(
            NormalizedEventType::CheckoutCompleted.to_string(),
            "checkout.completed"
        );
        assert_eq!(
            NormalizedEventType::Unhandled("invoice.finalized".to_string()).to_string(),
            "invoice.finalized"
        );
        assert_eq!(
            AuditEventType::SubscriptionExpired.to_string(),
            "subscription.expired"
        );
    }
}

//! Webhook delivery intake: verify, dedup, dispatch
//!
//! Verification happens first; nothing unauthenticated touches the
//! database. The delivery id is then claimed with an insert-if-absent
//! before the router runs, so a provider retry arriving mid-processing
//! sees its id already claimed and short-circuits. Router failures are
//! absorbed: once a delivery is authenticated and claimed the endpoint
//! reports success, and missed side effects surface through the
//! reconciliation sweep instead of provider retry storms.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};

use crate::error::BillingResult;
use crate::events::NormalizedEvent;
use crate::provider::BillingProvider;
use crate::router::{EventRouter, RouteOutcome};

/// Deliveries must stay deduplicatable at least this long
const DEDUP_WINDOW: Duration = Duration::hours(24);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressOutcome {
    /// First time we have seen this delivery; router ran
    Processed(RouteOutcome),
    /// Delivery id already claimed; replay acknowledged without effect
    Duplicate,
    /// Claimed, but event application failed; drift is picked up by the sweep
    Failed,
}

/// Records older than the dedup window are eligible for purge; a shorter
/// retention request is clamped up, never down.
fn purge_cutoff(now: OffsetDateTime, retention: Duration) -> OffsetDateTime {
    now - retention.max(DEDUP_WINDOW)
}

/// Durable record of which delivery ids have been seen
#[async_trait]
pub trait DeliveryClaimStore: Send + Sync {
    /// Claim a delivery id; false means another request already holds it
    async fn claim(&self, delivery_id: &str) -> BillingResult<bool>;

    /// Delete claims recorded before the cutoff; returns rows removed
    async fn purge_before(&self, cutoff: OffsetDateTime) -> BillingResult<u64>;
}

/// Claims backed by the `webhook_deliveries` table. The insert-if-absent
/// makes the claim atomic across instances.
pub struct PgDeliveryClaimStore {
    pool: PgPool,
}

impl PgDeliveryClaimStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryClaimStore for PgDeliveryClaimStore {
    async fn claim(&self, delivery_id: &str) -> BillingResult<bool> {
        let result = sqlx::query(
            "INSERT INTO webhook_deliveries (delivery_id) VALUES ($1) ON CONFLICT (delivery_id) DO NOTHING",
        )
        .bind(delivery_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn purge_before(&self, cutoff: OffsetDateTime) -> BillingResult<u64> {
        let result = sqlx::query("DELETE FROM webhook_deliveries WHERE received_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Where claimed events go; the router in production
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn apply(&self, event: &NormalizedEvent) -> BillingResult<RouteOutcome>;
}

#[async_trait]
impl EventSink for EventRouter {
    async fn apply(&self, event: &NormalizedEvent) -> BillingResult<RouteOutcome> {
        self.route(event).await
    }
}

#[derive(Clone)]
pub struct WebhookIngress {
    claims: Arc<dyn DeliveryClaimStore>,
    sink: Arc<dyn EventSink>,
}

impl WebhookIngress {
    pub fn new(claims: Arc<dyn DeliveryClaimStore>, sink: Arc<dyn EventSink>) -> Self {
        Self { claims, sink }
    }

    /// Handle one delivery end to end.
    ///
    /// Signature failures propagate (the caller maps them to 401);
    /// everything after a successful claim is absorbed.
    pub async fn process(
        &self,
        provider: &dyn BillingProvider,
        payload: &str,
        signature: &str,
    ) -> BillingResult<IngressOutcome> {
        let event = provider.verify_webhook(payload, signature)?;

        if !self.claims.claim(&event.delivery_id).await? {
            tracing::info!(
                delivery_id = %event.delivery_id,
                event_type = %event.event_type,
                "Duplicate webhook delivery, skipping"
            );
            return Ok(IngressOutcome::Duplicate);
        }

        match self.sink.apply(&event).await {
            Ok(outcome) => Ok(IngressOutcome::Processed(outcome)),
            Err(e) => {
                tracing::error!(
                    delivery_id = %event.delivery_id,
                    event_type = %event.event_type,
                    error = %e,
                    "Webhook event application failed, acknowledging anyway"
                );
                Ok(IngressOutcome::Failed)
            }
        }
    }

    /// Delete delivery records older than the retention window
    pub async fn purge_expired(&self, retention: Duration) -> BillingResult<u64> {
        let cutoff = purge_cutoff(OffsetDateTime::now_utc(), retention);
        let purged = self.claims.purge_before(cutoff).await?;
        if purged > 0 {
            tracing::info!(purged = purged, "Purged expired webhook delivery records");
        }
        Ok(purged)
    }
}

// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! MemoHub Billing Module
//!
//! Subscription lifecycle for a multi-tenant SaaS: provider-agnostic
//! adapter, signed webhook ingress with delivery dedup, a transactional
//! event router over versioned account rows, per-month usage metering, and
//! fail-open quota enforcement.
//!
//! ## Features
//!
//! - **Accounts**: versioned rows with optimistic-lock updates and audit
//! - **Provider Adapter**: `BillingProvider` trait, Stripe implementation
//! - **Webhooks**: signature verification, idempotent delivery claims
//! - **Event Router**: webhook events to account transitions, audited
//! - **Usage Ledger**: atomic per-month API call counters
//! - **Quota Gate**: plan-limit checks that fail open
//! - **Reconciliation**: orphan alerts and expiration downgrades

pub mod accounts;
pub mod error;
pub mod events;
pub mod provider;
pub mod quota;
pub mod reconcile;
pub mod router;
pub mod subscriptions;
pub mod usage;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Accounts
pub use accounts::{Account, AccountPatch, AccountStore, ResolvedAccountFields};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{AuditEventType, AuditLogEntry, AuditLogger, NormalizedEvent, NormalizedEventType};

// Provider
pub use provider::{
    BillingProvider, CheckoutSessionInfo, NewCheckout, PortalSessionInfo, StripeConfig,
    StripeProvider, SubscriptionSnapshot,
};

// Quota
pub use quota::{
    PgStoredItemCounter, QuotaDecision, QuotaGate, QuotaResource, QuotaUsage, StoredItemCounter,
};

// Reconciliation
pub use reconcile::{ReconciliationSweep, SweepAccountResult, SweepAction, SweepSummary};

// Router
pub use router::{EventRouter, RouteOutcome};

// Subscriptions
pub use subscriptions::{SubscriptionOverview, SubscriptionService};

// Usage
pub use usage::{current_period_key, period_key, PgUsageStore, UsageLedger, UsageStore};

// Webhooks
pub use webhooks::{
    DeliveryClaimStore, EventSink, IngressOutcome, PgDeliveryClaimStore, WebhookIngress,
};

use std::sync::Arc;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub accounts: AccountStore,
    pub audit: AuditLogger,
    pub usage: UsageLedger,
    pub quota: QuotaGate,
    pub subscriptions: SubscriptionService,
    pub webhooks: WebhookIngress,
    pub sweep: ReconciliationSweep,
    pub provider: Arc<dyn BillingProvider>,
}

impl BillingService {
    /// Create a billing service with the provider selected from the
    /// environment (`BILLING_PROVIDER`, default stripe)
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        Ok(Self::new(pool, provider::from_env()?))
    }

    pub fn new(pool: PgPool, provider: Arc<dyn BillingProvider>) -> Self {
        let accounts = AccountStore::new(pool.clone());
        let usage = UsageLedger::new(Arc::new(PgUsageStore::new(pool.clone())));
        let items = Arc::new(PgStoredItemCounter::new(pool.clone()));
        let claims = Arc::new(PgDeliveryClaimStore::new(pool.clone()));
        let router = Arc::new(EventRouter::new(accounts.clone()));

        Self {
            audit: AuditLogger::new(pool),
            quota: QuotaGate::new(accounts.clone(), usage.clone(), items),
            subscriptions: SubscriptionService::new(accounts.clone(), provider.clone()),
            webhooks: WebhookIngress::new(claims, router),
            sweep: ReconciliationSweep::new(accounts.clone()),
            accounts,
            usage,
            provider,
        }
    }
}

// Shared crate clippy configuration
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! MemoHub Shared Types
//!
//! Billing vocabulary shared across the API server, billing core, and
//! background worker: the plan catalog, subscription state enums, database
//! pool construction, and the in-memory sliding-window rate limiter.

pub mod db;
pub mod rate_limit;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use rate_limit::{RateLimitResult, RateLimiter, BILLING_ACTIONS_PER_MINUTE};
pub use types::{BillingInterval, PlanCatalog, PlanId, PlanLimits, SubscriptionStatus};

//! Plan catalog and subscription vocabulary
//!
//! The plan catalog is a read-only lookup table: plan identifiers map to the
//! metered limits each plan includes. Pricing lives with the billing
//! provider; this side only knows what a plan entitles an account to.

use serde::{Deserialize, Serialize};

/// Subscription plan identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanId {
    Free,
    Starter,
    Pro,
}

impl PlanId {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanId::Free => "free",
            PlanId::Starter => "starter",
            PlanId::Pro => "pro",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "free" => Some(PlanId::Free),
            "starter" => Some(PlanId::Starter),
            "pro" => Some(PlanId::Pro),
            _ => None,
        }
    }

    pub fn is_paid(&self) -> bool {
        !matches!(self, PlanId::Free)
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subscription status as reported by the billing provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Paused,
    Incomplete,
    IncompleteExpired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "trialing" => Some(SubscriptionStatus::Trialing),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "canceled" => Some(SubscriptionStatus::Canceled),
            "paused" => Some(SubscriptionStatus::Paused),
            "incomplete" => Some(SubscriptionStatus::Incomplete),
            "incomplete_expired" => Some(SubscriptionStatus::IncompleteExpired),
            _ => None,
        }
    }

    /// Statuses that count as "the subscription is live" for drift detection
    pub fn is_live(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Billing interval for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    #[default]
    Monthly,
    Yearly,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Monthly => "monthly",
            BillingInterval::Yearly => "yearly",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "monthly" => Some(BillingInterval::Monthly),
            "yearly" | "annual" => Some(BillingInterval::Yearly),
            _ => None,
        }
    }
}

impl std::fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metered limits included with a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    /// API calls included per calendar month
    pub monthly_api_calls: i64,
    /// Stored memory items allowed at any one time
    pub max_memory_items: i64,
}

/// Read-only mapping from plan id to included limits
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanCatalog;

impl PlanCatalog {
    /// Free plan: 1K API calls/month, 200 stored memories
    /// Starter: 10K API calls/month, 2K stored memories
    /// Pro: 100K API calls/month, 20K stored memories
    pub fn limits(&self, plan: PlanId) -> PlanLimits {
        match plan {
            PlanId::Free => PlanLimits {
                monthly_api_calls: 1_000,
                max_memory_items: 200,
            },
            PlanId::Starter => PlanLimits {
                monthly_api_calls: 10_000,
                max_memory_items: 2_000,
            },
            PlanId::Pro => PlanLimits {
                monthly_api_calls: 100_000,
                max_memory_items: 20_000,
            },
        }
    }

    /// Plans a user may check out into (everything except free)
    pub fn purchasable_plans() -> &'static [PlanId] {
        &[PlanId::Starter, PlanId::Pro]
    }
}

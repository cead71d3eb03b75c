//! Application state

use std::sync::Arc;

use memohub_billing::BillingService;
use memohub_shared::RateLimiter;
use sqlx::PgPool;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    /// Billing service; None when the provider is not configured, in which
    /// case billing endpoints answer 503 and quota checks fail open
    pub billing: Option<Arc<BillingService>>,
    /// Rate limiter for user-initiated billing actions
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let billing = if config.enable_billing {
            match BillingService::from_env(pool.clone()) {
                Ok(svc) => {
                    tracing::info!(provider = svc.provider.name(), "Billing service initialized");
                    Some(Arc::new(svc))
                }
                Err(e) => {
                    tracing::warn!("Billing not configured: {}", e);
                    None
                }
            }
        } else {
            tracing::info!("Billing disabled via config (ENABLE_BILLING=false)");
            None
        };

        Self {
            pool,
            config,
            billing,
            rate_limiter: RateLimiter::new_in_memory(),
        }
    }
}

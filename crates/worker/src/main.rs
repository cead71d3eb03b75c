//! MemoHub Background Worker
//!
//! Handles scheduled jobs including:
//! - Daily reconciliation sweep (orphan alerts + expiration downgrades)
//! - Webhook delivery-record purge past the dedup retention window
//! - Worker heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use memohub_billing::{BillingService, SweepAction, SweepSummary};
use sqlx::postgres::PgPoolOptions;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Webhook delivery records are kept this long before purge
const WEBHOOK_RETENTION: time::Duration = time::Duration::hours(24);

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    let database_url =
        std::env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

/// Log the outcome of one reconciliation run
fn log_sweep_summary(summary: &SweepSummary) {
    let failed = summary
        .results
        .iter()
        .filter(|r| matches!(r.action, SweepAction::Failed { .. }))
        .count();

    info!(
        processed = summary.processed_count,
        orphaned = summary.orphaned_count,
        failed = failed,
        "Reconciliation sweep complete"
    );

    for result in &summary.results {
        if let SweepAction::Failed { error } = &result.action {
            error!(account_id = %result.account_id, error = %error, "Sweep failed for account");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting MemoHub Worker");

    let pool = create_db_pool().await?;

    // Create billing service
    let billing = match BillingService::from_env(pool.clone()) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            // Without provider credentials there is nothing to reconcile;
            // keep the process alive so deploys stay uniform
            warn!(error = %e, "Failed to create billing service - running in minimal mode");

            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                info!("Worker heartbeat (minimal mode)");
            }
        }
    };

    let scheduler = JobScheduler::new().await?;

    // Job 1: Reconciliation sweep, daily at 02:00 UTC
    let sweep_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 0 2 * * *", move |_uuid, _l| {
            let billing = sweep_billing.clone();
            Box::pin(async move {
                info!("Running scheduled reconciliation sweep");
                match billing.sweep.run().await {
                    Ok(summary) => log_sweep_summary(&summary),
                    Err(e) => error!(error = %e, "Reconciliation sweep failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Reconciliation sweep (daily at 02:00 UTC)");

    // Job 2: Webhook delivery-record purge, daily at 03:30 UTC
    let purge_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 30 3 * * *", move |_uuid, _l| {
            let billing = purge_billing.clone();
            Box::pin(async move {
                info!("Purging expired webhook delivery records");
                match billing.webhooks.purge_expired(WEBHOOK_RETENTION).await {
                    Ok(purged) => info!(purged = purged, "Webhook purge complete"),
                    Err(e) => error!(error = %e, "Webhook purge failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Webhook delivery purge (daily at 03:30 UTC)");

    // Job 3: Heartbeat every 5 minutes
    scheduler
        .add(Job::new_async("0 */5 * * * *", move |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat");
            })
        })?)
        .await?;
    info!("Scheduled: Worker heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("MemoHub Worker started successfully with {} scheduled jobs", 3);

    // Keep the main task running
    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}

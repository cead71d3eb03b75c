//! In-memory sliding-window rate limiting
//!
//! Billing endpoints call out to the external payment provider, so they carry
//! a per-account sliding-window limit to blunt abuse. The window state is
//! in-process; webhook dedup (which must survive restarts) is persisted
//! separately and does not use this limiter.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use uuid::Uuid;

/// Billing provider actions allowed per account per minute
pub const BILLING_ACTIONS_PER_MINUTE: u32 = 10;

const WINDOW: Duration = Duration::from_secs(60);

/// Outcome of a rate limit check
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    pub allowed: bool,
    /// Requests remaining in the current window
    pub remaining: u32,
    /// How long to wait before retrying, when denied
    pub retry_after_seconds: Option<u64>,
}

type WindowMap = HashMap<(Uuid, &'static str), VecDeque<Instant>>;

/// Sliding-window rate limiter keyed by (account, action)
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<Mutex<WindowMap>>,
}

impl RateLimiter {
    pub fn new_in_memory() -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check and consume one slot for a billing action
    pub async fn check_billing_action(&self, account_id: Uuid) -> RateLimitResult {
        self.check(account_id, "billing", BILLING_ACTIONS_PER_MINUTE)
            .await
    }

    /// Check and consume one slot for an arbitrary action key
    pub async fn check(&self, account_id: Uuid, action: &'static str, limit: u32) -> RateLimitResult {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let window = windows.entry((account_id, action)).or_default();

        while let Some(front) = window.front() {
            if now.duration_since(*front) >= WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() as u32 >= limit {
            let retry_after = window
                .front()
                .map(|oldest| WINDOW.saturating_sub(now.duration_since(*oldest)).as_secs() + 1);
            return RateLimitResult {
                allowed: false,
                remaining: 0,
                retry_after_seconds: retry_after,
            };
        }

        window.push_back(now);
        RateLimitResult {
            allowed: true,
            remaining: limit - window.len() as u32,
            retry_after_seconds: None,
        }
    }

    /// Drop windows with no activity inside the current window
    pub async fn cleanup(&self) {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        windows.retain(|_, window| {
            window
                .back()
                .is_some_and(|last| now.duration_since(*last) < WINDOW)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_request_allowed() {
        let limiter = RateLimiter::new_in_memory();
        let account_id = Uuid::new_v4();

        let result = limiter.check_billing_action(account_id).await;
        assert!(result.allowed, "First request should be allowed");
        assert_eq!(result.remaining, BILLING_ACTIONS_PER_MINUTE - 1);
    }

    #[tokio::test]
    async fn test_request_past_limit_rejected() {
        let limiter = RateLimiter::new_in_memory();
        let account_id = Uuid::new_v4();

        for i in 0..BILLING_ACTIONS_PER_MINUTE {
            let result = limiter.check_billing_action(account_id).await;
            assert!(result.allowed, "Request {} should be allowed", i);
        }

        let result = limiter.check_billing_action(account_id).await;
        assert!(!result.allowed, "Request past limit should be rejected");
        assert!(
            result.retry_after_seconds.is_some(),
            "Should have retry_after"
        );
    }

    #[tokio::test]
    async fn test_accounts_are_isolated() {
        let limiter = RateLimiter::new_in_memory();
        let account_1 = Uuid::new_v4();
        let account_2 = Uuid::new_v4();

        for _ in 0..BILLING_ACTIONS_PER_MINUTE {
            limiter.check_billing_action(account_1).await;
        }

        let result1 = limiter.check_billing_action(account_1).await;
        assert!(!result1.allowed, "Account 1 should be blocked");

        let result2 = limiter.check_billing_action(account_2).await;
        assert!(result2.allowed, "Account 2 should be unaffected");
    }

    #[tokio::test]
    async fn test_action_keys_are_isolated() {
        let limiter = RateLimiter::new_in_memory();
        let account_id = Uuid::new_v4();

        for _ in 0..5 {
            limiter.check(account_id, "a", 5).await;
        }
        assert!(!limiter.check(account_id, "a", 5).await.allowed);
        assert!(limiter.check(account_id, "b", 5).await.allowed);
    }

    #[tokio::test]
    async fn test_concurrent_requests_respect_limit() {
        use tokio::sync::Barrier;

        let limiter = Arc::new(RateLimiter::new_in_memory());
        let account_id = Uuid::new_v4();

        // Use up 5 of 10 slots
        for _ in 0..5 {
            limiter.check_billing_action(account_id).await;
        }

        // 10 concurrent requests against the remaining 5 slots
        let barrier = Arc::new(Barrier::new(10));
        let mut handles = vec![];
        for _ in 0..10 {
            let limiter = Arc::clone(&limiter);
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                limiter.check_billing_action(account_id).await
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap().allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5, "Exactly the remaining slots should succeed");
    }

    #[tokio::test]
    async fn test_cleanup_keeps_active_windows() {
        let limiter = RateLimiter::new_in_memory();
        let account_id = Uuid::new_v4();

        for _ in 0..3 {
            limiter.check_billing_action(account_id).await;
        }
        limiter.cleanup().await;

        let result = limiter.check_billing_action(account_id).await;
        assert!(result.allowed);
        assert_eq!(
            result.remaining,
            BILLING_ACTIONS_PER_MINUTE - 4,
            "Cleanup must not reset an active window"
        );
    }
}

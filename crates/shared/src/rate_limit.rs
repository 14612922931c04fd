//! In-memory sliding-window rate limiting
//!
//! Keyed limiter used on the customer-facing message endpoints. Single
//! backend instance is assumed, so no external store is involved.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// A rate limit rule: at most `limit` events per `window`.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitRule {
    pub limit: usize,
    pub window: Duration,
}

impl RateLimitRule {
    pub fn per_minute(limit: usize) -> Self {
        Self {
            limit,
            window: Duration::from_secs(60),
        }
    }
}

/// Sliding-window limiter over monotonic timestamps.
#[derive(Debug, Default)]
pub struct RateLimiter {
    events: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event for `key` if the rule allows it. Returns `false`
    /// when the caller should be rejected.
    pub async fn allow(&self, key: &str, rule: RateLimitRule) -> bool {
        let now = Instant::now();
        let mut events = self.events.lock().await;
        let queue = events.entry(key.to_string()).or_default();

        while let Some(front) = queue.front() {
            if now.duration_since(*front) >= rule.window {
                queue.pop_front();
            } else {
                break;
            }
        }

        if queue.len() >= rule.limit {
            return false;
        }

        queue.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allows_up_to_limit() {
        let limiter = RateLimiter::new();
        let rule = RateLimitRule {
            limit: 3,
            window: Duration::from_secs(60),
        };

        assert!(limiter.allow("s1", rule).await);
        assert!(limiter.allow("s1", rule).await);
        assert!(limiter.allow("s1", rule).await);
        assert!(!limiter.allow("s1", rule).await);
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let limiter = RateLimiter::new();
        let rule = RateLimitRule {
            limit: 1,
            window: Duration::from_secs(60),
        };

        assert!(limiter.allow("s1", rule).await);
        assert!(!limiter.allow("s1", rule).await);
        assert!(limiter.allow("s2", rule).await);
    }

    #[tokio::test]
    async fn test_window_expiry() {
        let limiter = RateLimiter::new();
        let rule = RateLimitRule {
            limit: 1,
            window: Duration::from_millis(20),
        };

        assert!(limiter.allow("s1", rule).await);
        assert!(!limiter.allow("s1", rule).await);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(limiter.allow("s1", rule).await);
    }
}

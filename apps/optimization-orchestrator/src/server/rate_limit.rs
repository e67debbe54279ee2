//! Fixed-window request throttling for the status polling endpoint.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

struct Bucket {
    count: usize,
    window_start: DateTime<Utc>,
}

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests left in the current window.
    pub remaining: usize,
    /// When the current window expires.
    pub reset_at: DateTime<Utc>,
}

/// Per-process fixed-window rate limiter keyed by caller and path.
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// Allow `limit` requests per key within each `window`.
    #[must_use]
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Count a request against `key` and decide whether it may proceed.
    pub async fn check(&self, key: &str) -> RateDecision {
        let now = Utc::now();
        let window = chrono::Duration::from_std(self.window).unwrap_or_default();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            count: 0,
            window_start: now,
        });
        if now - bucket.window_start >= window {
            bucket.count = 0;
            bucket.window_start = now;
        }
        if bucket.count < self.limit {
            bucket.count += 1;
            return RateDecision {
                allowed: true,
                remaining: self.limit - bucket.count,
                reset_at: bucket.window_start + window,
            };
        }
        RateDecision {
            allowed: false,
            remaining: 0,
            reset_at: bucket.window_start + window,
        }
    }
}

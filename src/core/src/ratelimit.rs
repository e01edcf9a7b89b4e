use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// Outcome of a `RateLimiter::consume` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consume {
    Allow,
    Deny { retry_after_ms: u64 },
}

/// Sliding-window request counter keyed by session user id (once
/// authenticated) or remote IP (spec §4.4). Not configuring rate limiting
/// disables enforcement entirely — `consume` always allows.
pub struct RateLimiter {
    config: Option<(usize, Duration)>,
    buckets: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            config: Some((max_requests, window)),
            buckets: DashMap::new(),
        }
    }

    /// A rate limiter with no configured window — every call allows.
    pub fn disabled() -> Self {
        Self {
            config: None,
            buckets: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_some()
    }

    /// Consume one token from `key`'s window. Keys are never migrated
    /// between each other — the rate-limit key switch on login simply
    /// means subsequent calls use a different key, and the old key's
    /// bucket is left to expire untouched (spec §4.4, §5).
    pub fn consume(&self, key: &str) -> Consume {
        let Some((max_requests, window)) = self.config else {
            return Consume::Allow;
        };

        // `max_requests == 0` means every request is denied; there is no
        // window start to measure a `retryAfterMs` against, so fall back to
        // the window's own length rather than indexing an empty bucket.
        if max_requests == 0 {
            return Consume::Deny {
                retry_after_ms: window.as_millis().max(1) as u64,
            };
        }

        let now = Instant::now();
        let mut entry = self.buckets.entry(key.to_string()).or_default();
        while let Some(&front) = entry.front() {
            if now.duration_since(front) >= window {
                entry.pop_front();
            } else {
                break;
            }
        }

        if entry.len() < max_requests {
            entry.push_back(now);
            Consume::Allow
        } else {
            let oldest = *entry.front().expect("len >= max_requests > 0 implies non-empty");
            let elapsed = now.duration_since(oldest);
            let retry_after = window.saturating_sub(elapsed);
            Consume::Deny {
                retry_after_ms: retry_after.as_millis().max(1) as u64,
            }
        }
    }

    /// Drop a key's window entirely, e.g. when a connection tears down.
    pub fn clear(&self, key: &str) {
        self.buckets.remove(key);
    }
}

//! Keyed token-bucket rate limiting for WordPress write-backs.
//!
//! Providers throttle themselves internally; this set exists for the other
//! side of the pipeline, where many workers share one quota per WordPress
//! host. A worker that cannot get a permit within its patience window gets
//! [`Acquire::Deferred`] back and requeues the job instead of parking a pool
//! slot on a sleeping future.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::{Quota, RateLimiter};

type DirectLimiter =
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, DefaultClock>;

/// Result of a permit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// A permit was granted (possibly after a short wait).
    Acquired,
    /// The wait would exceed the caller's patience; requeue the job.
    Deferred,
}

/// A set of token-bucket limiters, one per key, all sharing the same quota.
///
/// Keys are WordPress hosts, so two clients on the same host share a budget
/// while unrelated sites never starve each other.
pub struct RateLimiterSet {
    limiters: DashMap<String, Arc<DirectLimiter>>,
    quota: Quota,
}

impl RateLimiterSet {
    /// Create a set where every key gets `requests_per_minute`.
    pub fn new(requests_per_minute: u32) -> Self {
        let rpm = NonZeroU32::new(requests_per_minute.max(1)).unwrap_or(NonZeroU32::MIN);
        Self {
            limiters: DashMap::new(),
            quota: Quota::per_minute(rpm),
        }
    }

    fn limiter_for(&self, key: &str) -> Arc<DirectLimiter> {
        self.limiters
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(RateLimiter::direct(self.quota)))
            .clone()
    }

    /// Request a permit without waiting.
    pub fn try_acquire(&self, key: &str) -> Acquire {
        match self.limiter_for(key).check() {
            Ok(()) => Acquire::Acquired,
            Err(_) => Acquire::Deferred,
        }
    }

    /// Request a permit, waiting at most `max_wait` for one to free up.
    pub async fn acquire_within(&self, key: &str, max_wait: Duration) -> Acquire {
        let limiter = self.limiter_for(key);
        match limiter.check() {
            Ok(()) => Acquire::Acquired,
            Err(not_until) => {
                let clock = DefaultClock::default();
                let wait = not_until.wait_time_from(clock.now());
                if wait > max_wait {
                    return Acquire::Deferred;
                }
                limiter.until_ready().await;
                Acquire::Acquired
            }
        }
    }

    /// Number of keys with an active limiter.
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}

/// Rate-limit key for a client's WordPress site: the host portion of its
/// base URL, so clients sharing an origin share the budget.
pub fn wp_key(base_url: &str) -> String {
    let trimmed = base_url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = trimmed.split('/').next().unwrap_or(trimmed);
    format!("wp:{}", host.to_ascii_lowercase())
}

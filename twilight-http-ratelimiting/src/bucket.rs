//! A single server-declared REST ratelimit bucket.

use crate::{
    headers::{Present, RatelimitHeaders},
    timed_lock::TimedLock,
};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

/// Default additive slack applied to a bucket's `reset_after`, matching
/// Discord's own recommendation to pad for clock drift between client and
/// server.
pub const DEFAULT_LAG: f64 = 0.2;

struct Inner {
    lock: TimedLock,
    hash: std::sync::Mutex<Option<Box<str>>>,
    limit: AtomicU64,
    remaining: AtomicU64,
    reset_after_millis: AtomicU64,
    enabled: std::sync::atomic::AtomicBool,
    lag: f64,
}

/// One server-declared ratelimit bucket.
///
/// Cheaply cloneable; clones share the same underlying counters and lock.
#[derive(Clone)]
pub struct Bucket {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("hash", &self.hash())
            .field("limit", &self.limit())
            .field("remaining", &self.remaining())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Bucket {
    /// Create a new bucket with the given additive lag, in seconds.
    pub fn new(lag: f64) -> Self {
        Self {
            inner: Arc::new(Inner {
                lock: TimedLock::new(),
                hash: std::sync::Mutex::new(None),
                limit: AtomicU64::new(1),
                remaining: AtomicU64::new(1),
                reset_after_millis: AtomicU64::new(0),
                enabled: std::sync::atomic::AtomicBool::new(true),
                lag,
            }),
        }
    }

    /// Create a new bucket with the default lag.
    pub fn with_default_lag() -> Self {
        Self::new(DEFAULT_LAG)
    }

    /// The server-issued bucket hash, once one has been seen.
    pub fn hash(&self) -> Option<Box<str>> {
        self.inner.hash.lock().unwrap().clone()
    }

    /// Maximum requests allotted per window.
    pub fn limit(&self) -> u64 {
        self.inner.limit.load(Ordering::Acquire)
    }

    /// Remaining requests in the current window.
    pub fn remaining(&self) -> u64 {
        self.inner.remaining.load(Ordering::Acquire)
    }

    /// Seconds until the bucket resets, as last reported by the server.
    pub fn reset_after(&self) -> Duration {
        Duration::from_millis(self.inner.reset_after_millis.load(Ordering::Acquire))
    }

    /// Whether this bucket is known to be ratelimited at all. A bucket that
    /// never receives ratelimit headers is permanently disabled.
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// Update bucket state from a parsed set of response headers.
    ///
    /// A response ordering race (two concurrent responses updating the same
    /// bucket out of order) is tolerated, not prevented: `remaining` only
    /// ever decreases (or resets from zero), and `reset_after` only ever
    /// grows, so a stale response cannot undo a fresher one's tightening of
    /// the bucket.
    pub fn update_from(&self, headers: &RatelimitHeaders) {
        if !self.inner.enabled.load(Ordering::Acquire) {
            return;
        }

        let present = match headers {
            RatelimitHeaders::Present(present) => present,
            RatelimitHeaders::GlobalLimited { .. } => {
                // Global ratelimits are the caller's concern, not this
                // bucket's; leave counters untouched.
                return;
            }
            RatelimitHeaders::None => {
                tracing::debug!("bucket has no ratelimit headers, disabling");
                self.inner.enabled.store(false, Ordering::Release);
                return;
            }
        };

        self.apply(present);
    }

    fn apply(&self, present: &Present) {
        if self.inner.hash.lock().unwrap().is_none() {
            if let Some(bucket) = &present.bucket {
                tracing::debug!(hash = %bucket, "bucket adopted hash");
            }
        }

        *self.inner.hash.lock().unwrap() = present.bucket.clone();

        self.inner.limit.store(present.limit, Ordering::Release);

        let current_remaining = self.inner.remaining.load(Ordering::Acquire);
        if present.remaining < current_remaining || current_remaining == 0 {
            self.inner
                .remaining
                .store(present.remaining, Ordering::Release);
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let new_reset_after_millis = ((present.reset_after + self.inner.lag) * 1000.0) as u64;
        let current_reset_after_millis = self.inner.reset_after_millis.load(Ordering::Acquire);
        if new_reset_after_millis > current_reset_after_millis {
            self.inner
                .reset_after_millis
                .store(new_reset_after_millis, Ordering::Release);
        }
    }

    /// Close the embedded lock for `duration`. A no-op if already closed.
    pub fn lock_for(&self, duration: Duration) {
        self.inner.lock.lock_for(duration);
    }

    /// Acquire a slot in this bucket, suspending if exhausted.
    ///
    /// If `auto_lock` is true and the bucket is exhausted, this closes the
    /// lock for the last-known `reset_after` before waiting, and
    /// pre-emptively sets `remaining` to 1 so a second, independent
    /// `acquire` doesn't immediately re-lock before the next real request
    /// has a chance to consume the window.
    pub async fn acquire(&self, auto_lock: bool) {
        if auto_lock && self.inner.remaining.load(Ordering::Acquire) == 0 {
            self.lock_for(self.reset_after());
            self.inner.remaining.store(1, Ordering::Release);
        }

        self.inner.lock.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::Bucket;
    use crate::headers::{Present, RatelimitHeaders};
    use static_assertions::assert_impl_all;

    assert_impl_all!(Bucket: Clone, Send, Sync);

    fn present(bucket: Option<&str>, limit: u64, remaining: u64, reset_after: f64) -> RatelimitHeaders {
        RatelimitHeaders::Present(Present {
            bucket: bucket.map(Into::into),
            limit,
            remaining,
            reset_after,
            reset: 0.0,
        })
    }

    #[test]
    fn missing_headers_disables_the_bucket() {
        let bucket = Bucket::with_default_lag();
        assert!(bucket.is_enabled());
        bucket.update_from(&RatelimitHeaders::None);
        assert!(!bucket.is_enabled());
    }

    #[test]
    fn global_headers_do_not_mutate_counters() {
        let bucket = Bucket::with_default_lag();
        bucket.update_from(&RatelimitHeaders::GlobalLimited { retry_after: 5.0 });
        assert_eq!(1, bucket.limit());
        assert_eq!(1, bucket.remaining());
    }

    #[test]
    fn remaining_only_decreases_or_resets_from_zero() {
        let bucket = Bucket::with_default_lag();
        bucket.update_from(&present(Some("abcd"), 5, 3, 1.0));
        assert_eq!(3, bucket.remaining());

        // Out-of-order response claiming a higher remaining is ignored.
        bucket.update_from(&present(Some("abcd"), 5, 4, 1.0));
        assert_eq!(3, bucket.remaining());

        bucket.update_from(&present(Some("abcd"), 5, 2, 1.0));
        assert_eq!(2, bucket.remaining());
    }

    #[test]
    fn reset_after_only_grows() {
        let bucket = Bucket::new(0.0);
        bucket.update_from(&present(Some("abcd"), 5, 3, 1.0));
        assert_eq!(std::time::Duration::from_millis(1000), bucket.reset_after());

        bucket.update_from(&present(Some("abcd"), 5, 3, 0.5));
        assert_eq!(std::time::Duration::from_millis(1000), bucket.reset_after());

        bucket.update_from(&present(Some("abcd"), 5, 3, 2.0));
        assert_eq!(std::time::Duration::from_millis(2000), bucket.reset_after());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn acquire_auto_locks_when_exhausted() {
        let bucket = Bucket::new(0.0);
        bucket.update_from(&present(Some("abcd"), 1, 0, 0.03));

        let started = std::time::Instant::now();
        bucket.acquire(true).await;
        assert!(started.elapsed() >= std::time::Duration::from_millis(20));

        // The pre-emptive remaining=1 prevents an immediate re-lock.
        assert_eq!(1, bucket.remaining());
    }
}

//! Identify-concurrency queue for gateway shards.
//!
//! Discord buckets IDENTIFY attempts by `shard_id mod max_concurrency`: every
//! shard that lands in the same bucket shares a single window allowing
//! `max_concurrency` identifies per 5 seconds. [`IdentifyQueue`] is that
//! bucketed limiter, handed to each shard so it can wait its turn before
//! sending IDENTIFY.

#![deny(unsafe_code)]

use std::{
    collections::HashMap,
    fmt::Debug,
    future::Future,
    pin::Pin,
    sync::Mutex,
    time::Duration,
};
use twilight_http_ratelimiting::WindowLimiter;

/// A shard requests permission to IDENTIFY through a `Queue` before sending
/// the payload.
///
/// The returned future must resolve only when the shard is clear to
/// IDENTIFY.
pub trait Queue: Debug + Send + Sync {
    /// Request permission to IDENTIFY for `[shard_id, shard_count]`.
    fn request<'a>(&'a self, shard: [u64; 2]) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// The server-advertised identify concurrency window: `max_concurrency`
/// IDENTIFYs per 5 seconds, partitioned by `shard_id mod max_concurrency`.
#[derive(Debug)]
pub struct IdentifyQueue {
    max_concurrency: u64,
    limiters: Mutex<HashMap<u64, WindowLimiter>>,
}

impl IdentifyQueue {
    /// Period over which `max_concurrency` identifies are admitted.
    pub const PERIOD: Duration = Duration::from_secs(5);

    /// Create a new queue for a server-advertised `max_concurrency`.
    pub fn new(max_concurrency: u64) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// The concurrency bucket a shard ID falls into.
    pub const fn bucket_key(&self, shard_id: u64) -> u64 {
        shard_id % self.max_concurrency
    }

    fn limiter_for(&self, shard_id: u64) -> WindowLimiter {
        let key = self.bucket_key(shard_id);
        let mut limiters = self.limiters.lock().unwrap();
        limiters
            .entry(key)
            .or_insert_with(|| WindowLimiter::new(self.max_concurrency, Self::PERIOD))
            .clone()
    }
}

impl Queue for IdentifyQueue {
    fn request<'a>(&'a self, [shard_id, shard_count]: [u64; 2]) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        let limiter = self.limiter_for(shard_id);

        Box::pin(async move {
            tracing::debug!(shard_id, shard_count, "waiting for identify allowance");
            limiter.acquire().await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{IdentifyQueue, Queue};
    use static_assertions::{assert_impl_all, assert_obj_safe};
    use std::time::Duration;

    assert_impl_all!(IdentifyQueue: Debug, Queue, Send, Sync);
    assert_obj_safe!(Queue);

    #[tokio::test(flavor = "multi_thread")]
    async fn shards_sharing_a_bucket_share_one_limiter() {
        let queue = IdentifyQueue::new(2);
        assert_eq!(queue.bucket_key(0), queue.bucket_key(2));
        assert_ne!(queue.bucket_key(0), queue.bucket_key(1));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn admits_up_to_max_concurrency_immediately() {
        let queue = IdentifyQueue::new(2);

        tokio::time::timeout(Duration::from_millis(50), queue.request([0, 4]))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_millis(50), queue.request([2, 4]))
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", start_paused = true)]
    async fn third_shard_in_bucket_waits_for_the_window() {
        let queue = IdentifyQueue::new(2);
        queue.request([0, 4]).await;
        queue.request([2, 4]).await;

        let handle = {
            let queue = std::sync::Arc::new(queue);
            let queue = queue.clone();
            tokio::spawn(async move { queue.request([4, 4]).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());

        tokio::time::sleep(IdentifyQueue::PERIOD + Duration::from_millis(50)).await;
        assert!(handle.is_finished());
    }
}

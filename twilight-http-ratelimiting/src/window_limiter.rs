//! A FIFO-fair ratelimiter admitting at most `limit` acquisitions per
//! rolling window of `per` seconds.
//!
//! Grounded on the `TimePer` primitive from the reference implementation:
//! a remaining-count plus a pending-waiter queue, with a single timer that
//! resets the count and wakes waiters in order.

use std::{collections::VecDeque, sync::Arc};
use tokio::{
    sync::{oneshot, Mutex},
    time::Duration,
};

struct Inner {
    limit: u64,
    per: Duration,
    remaining: u64,
    pending: VecDeque<oneshot::Sender<()>>,
    reset_scheduled: bool,
}

/// Window ratelimiter: `limit` acquisitions per `per` seconds, FIFO-fair.
#[derive(Clone)]
pub struct WindowLimiter {
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for WindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowLimiter").finish_non_exhaustive()
    }
}

impl WindowLimiter {
    /// Create a new limiter admitting `limit` acquisitions per `per`.
    pub fn new(limit: u64, per: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                limit,
                per,
                remaining: limit,
                pending: VecDeque::new(),
                reset_scheduled: false,
            })),
        }
    }

    /// Acquire one slot, suspending in FIFO order if the window is
    /// exhausted.
    ///
    /// Dropping the returned future before it resolves dequeues the waiter
    /// cleanly without disturbing other waiters.
    pub async fn acquire(&self) {
        let rx = {
            let mut inner = self.inner.lock().await;

            if inner.remaining > 0 {
                inner.remaining -= 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                inner.pending.push_back(tx);

                if !inner.reset_scheduled {
                    inner.reset_scheduled = true;
                    let weak_inner = Arc::clone(&self.inner);
                    let per = inner.per;
                    tokio::spawn(async move {
                        tokio::time::sleep(per).await;
                        Self::reset(&weak_inner).await;
                    });
                }

                Some(rx)
            }
        };

        if let Some(rx) = rx {
            // If the sender is dropped (cancellation elsewhere, which does
            // not happen in this implementation) treat it as immediate
            // admission rather than panicking.
            let _ = rx.await;
        }
    }

    async fn reset(inner: &Arc<Mutex<Inner>>) {
        let mut guard = inner.lock().await;
        guard.remaining = guard.limit;
        guard.reset_scheduled = false;

        // Wake queued waiters in FIFO order until `remaining` is exhausted.
        // A waiter whose receiver was already dropped (cancelled) is
        // discarded without consuming a slot, so cancellation never starves
        // the waiters behind it.
        while guard.remaining > 0 {
            match guard.pending.pop_front() {
                Some(tx) => {
                    if tx.send(()).is_ok() {
                        guard.remaining -= 1;
                    }
                }
                None => break,
            }
        }

        // Waiters beyond `limit` remain queued for the next period. If any
        // are left, arm another reset timer.
        if !guard.pending.is_empty() {
            guard.reset_scheduled = true;
            let per = guard.per;
            let inner = Arc::clone(inner);
            drop(guard);

            tokio::spawn(async move {
                tokio::time::sleep(per).await;
                Self::reset(&inner).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::WindowLimiter;
    use static_assertions::assert_impl_all;
    use std::time::Duration;

    assert_impl_all!(WindowLimiter: Clone, Send, Sync);

    #[tokio::test(flavor = "multi_thread")]
    async fn admits_up_to_limit_immediately() {
        let limiter = WindowLimiter::new(2, Duration::from_secs(5));
        tokio::time::timeout(Duration::from_millis(50), limiter.acquire())
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_millis(50), limiter.acquire())
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", start_paused = true)]
    async fn blocks_past_limit_until_window_resets() {
        let limiter = WindowLimiter::new(1, Duration::from_millis(100));
        limiter.acquire().await;

        let limiter2 = limiter.clone();
        let handle = tokio::spawn(async move {
            limiter2.acquire().await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());

        tokio::time::sleep(Duration::from_millis(110)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelling_a_waiter_does_not_block_others() {
        let limiter = WindowLimiter::new(1, Duration::from_millis(50));
        limiter.acquire().await;

        let cancelled = limiter.clone();
        let cancelled_handle = tokio::spawn(async move {
            cancelled.acquire().await;
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        cancelled_handle.abort();

        let survivor = limiter.clone();
        let survivor_handle = tokio::spawn(async move {
            survivor.acquire().await;
        });

        tokio::time::timeout(Duration::from_millis(200), survivor_handle)
            .await
            .expect("surviving waiter should still be woken")
            .unwrap();
    }
}

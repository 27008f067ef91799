//! A gate that is open by default and can be closed for a fixed duration.
//!
//! Unlike a mutex, a [`TimedLock`] does not serialize access between
//! waiters: it is a throttle that many callers observe simultaneously, not a
//! critical section.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::{sync::Notify, time::Duration};

#[derive(Debug, Default)]
struct Inner {
    closed: AtomicBool,
    notify: Notify,
}

/// A level-triggered gate: open by default, closeable for a fixed duration.
///
/// Cloning shares the same underlying gate; use this to hand the same lock
/// to many concurrent callers.
#[derive(Clone, Debug, Default)]
pub struct TimedLock {
    inner: Arc<Inner>,
}

impl TimedLock {
    /// Create a new, initially open, lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the lock is currently closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Suspend until the lock is open.
    ///
    /// Returns immediately if the lock is already open.
    pub async fn wait(&self) {
        loop {
            if !self.inner.closed.load(Ordering::Acquire) {
                return;
            }

            // Register for a wakeup before re-checking, so a concurrent
            // `open` cannot be missed between the check and the await.
            let notified = self.inner.notify.notified();

            if !self.inner.closed.load(Ordering::Acquire) {
                return;
            }

            notified.await;
        }
    }

    /// Close the lock for `duration`, reopening it automatically afterward.
    ///
    /// A no-op if the lock is already closed; closures never stack.
    pub fn lock_for(&self, duration: Duration) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("lock already closed, ignoring lock_for call");
            return;
        }

        tracing::debug!(?duration, "closing lock");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            inner.closed.store(false, Ordering::Release);
            inner.notify.notify_waiters();
        });
    }

    /// Reopen the lock immediately, waking all waiters.
    pub fn open(&self) {
        if self.inner.closed.swap(false, Ordering::AcqRel) {
            self.inner.notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TimedLock;
    use static_assertions::assert_impl_all;
    use std::time::Duration;

    assert_impl_all!(TimedLock: Clone, Send, Sync);

    #[tokio::test(flavor = "multi_thread")]
    async fn open_by_default() {
        let lock = TimedLock::new();
        assert!(!lock.is_closed());
        lock.wait().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lock_for_reopens_after_duration() {
        let lock = TimedLock::new();
        lock.lock_for(Duration::from_millis(20));
        assert!(lock.is_closed());

        lock.wait().await;
        assert!(!lock.is_closed());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lock_for_does_not_stack() {
        let lock = TimedLock::new();
        lock.lock_for(Duration::from_secs(60));
        // Should be a no-op: does not replace the long-running timer with a
        // short one.
        lock.lock_for(Duration::from_millis(1));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(lock.is_closed());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_wakes_waiters_immediately() {
        let lock = TimedLock::new();
        lock.lock_for(Duration::from_secs(60));

        let waiter = lock.clone();
        let handle = tokio::spawn(async move {
            waiter.wait().await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        lock.open();

        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("waiter should resolve promptly after open()")
            .unwrap();
    }
}

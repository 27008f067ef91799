//! Generic, key-addressed event dispatch for shards and the shard manager.
//!
//! Listeners register under a key and are invoked, each on its own spawned
//! task, whenever a value is dispatched under that key (or one of its
//! ancestor keys, for keys that have any). Global handlers see every
//! dispatch regardless of key. One-shot waiters let callers `await` the next
//! value matching a predicate, with a timeout.

use futures_util::FutureExt;
use std::{
    collections::HashMap, fmt::Debug, future::Future, hash::Hash, panic::AssertUnwindSafe, pin::Pin, sync::Mutex,
    time::Duration,
};
use tokio::{sync::oneshot, time::error::Elapsed};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A key under which events are dispatched.
///
/// `ancestors` returns the key itself followed by any broader keys the same
/// dispatch should also be delivered under, innermost first. Most keys have
/// no ancestors beyond themselves.
pub trait DispatchKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {
    /// Keys this dispatch should also be delivered under, starting with
    /// `self`.
    fn ancestors(&self) -> Vec<Self> {
        vec![self.clone()]
    }
}

struct Waiter<V> {
    predicate: Box<dyn Fn(&V) -> bool + Send + Sync>,
    tx: oneshot::Sender<V>,
}

/// Registry of listeners, global handlers, and one-shot waiters, addressed by
/// a key type `K` and carrying values of type `V`.
pub struct EventDispatcher<K, V> {
    listeners: Mutex<HashMap<K, Vec<Box<dyn Fn(V) -> BoxFuture + Send + Sync>>>>,
    handlers: Mutex<Vec<Box<dyn Fn(K, V) -> BoxFuture + Send + Sync>>>,
    waiters: Mutex<HashMap<K, Vec<Waiter<V>>>>,
}

impl<K, V> Debug for EventDispatcher<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher").finish_non_exhaustive()
    }
}

impl<K, V> Default for EventDispatcher<K, V> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            handlers: Mutex::new(Vec::new()),
            waiters: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> EventDispatcher<K, V>
where
    K: DispatchKey,
    V: Clone + Send + 'static,
{
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener under `key`.
    ///
    /// The listener is invoked on its own task for every dispatch under
    /// `key` or any key whose [`DispatchKey::ancestors`] includes `key`.
    pub fn add_listener<F, Fut>(&self, key: K, listener: F)
    where
        F: Fn(V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: Box<dyn Fn(V) -> BoxFuture + Send + Sync> =
            Box::new(move |value| Box::pin(listener(value)));

        self.listeners
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push(boxed);
    }

    /// Register a global handler, invoked for every dispatch regardless of
    /// key.
    pub fn add_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(K, V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: Box<dyn Fn(K, V) -> BoxFuture + Send + Sync> =
            Box::new(move |key, value| Box::pin(handler(key, value)));

        self.handlers.lock().unwrap().push(boxed);
    }

    /// Dispatch `value` under `key`.
    ///
    /// Waiters and listeners registered under `key` or any of its ancestors
    /// run; global handlers always run once, keyed by `key` itself.
    pub fn dispatch(&self, key: K, value: V) {
        let chain = key.ancestors();

        {
            let mut waiters = self.waiters.lock().unwrap();

            for ancestor in &chain {
                let Some(pending) = waiters.get_mut(ancestor) else {
                    continue;
                };

                let mut remaining = Vec::with_capacity(pending.len());

                for waiter in pending.drain(..) {
                    if waiter.tx.is_closed() {
                        continue;
                    }

                    if (waiter.predicate)(&value) {
                        let _ = waiter.tx.send(value.clone());
                    } else {
                        remaining.push(waiter);
                    }
                }

                *pending = remaining;
            }
        }

        let listeners = self.listeners.lock().unwrap();

        for ancestor in &chain {
            let Some(registered) = listeners.get(ancestor) else {
                continue;
            };

            for listener in registered {
                let fut = listener(value.clone());
                tokio::spawn(Self::guarded(fut));
            }
        }

        for handler in self.handlers.lock().unwrap().iter() {
            let fut = handler(key.clone(), value.clone());
            tokio::spawn(Self::guarded(fut));
        }
    }

    /// Run a listener/handler future, catching a panic so one caller's bug
    /// can't take down its sibling tasks.
    async fn guarded(fut: BoxFuture) {
        if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
            tracing::error!("a dispatcher listener panicked");
        }
    }

    /// Wait for the next value dispatched under `key` for which `predicate`
    /// returns `true`, or until `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`Elapsed`] if no matching value arrives before `timeout`.
    pub async fn wait_for<F>(&self, key: K, predicate: F, timeout: Duration) -> Result<V, Elapsed>
    where
        F: Fn(&V) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();

        self.waiters.lock().unwrap().entry(key.clone()).or_default().push(Waiter {
            predicate: Box::new(predicate),
            tx,
        });

        let result = tokio::time::timeout(timeout, rx).await;

        if let Some(pending) = self.waiters.lock().unwrap().get_mut(&key) {
            pending.retain(|waiter| !waiter.tx.is_closed());
        }

        match result {
            Ok(Ok(value)) => Ok(value),
            // The dispatcher was dropped (or the waiter was otherwise
            // discarded) without a match; `Elapsed` has no public
            // constructor, so manufacture one the same way a real timeout
            // would: race an already-expired timer against a future that
            // never resolves.
            Ok(Err(_)) => Err(tokio::time::timeout(Duration::ZERO, std::future::pending::<()>())
                .await
                .unwrap_err()),
            Err(elapsed) => Err(elapsed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DispatchKey, EventDispatcher};
    use std::{
        sync::{
            atomic::{AtomicU32, Ordering},
            Arc,
        },
        time::Duration,
    };

    #[derive(Clone, Debug, Eq, PartialEq, Hash)]
    enum Key {
        Named(&'static str),
        Any,
    }

    impl DispatchKey for Key {
        fn ancestors(&self) -> Vec<Self> {
            match self {
                Self::Named(_) => vec![self.clone(), Self::Any],
                Self::Any => vec![Self::Any],
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn listener_receives_dispatch_under_key_and_ancestor() {
        let dispatcher: EventDispatcher<Key, u32> = EventDispatcher::new();
        let direct = Arc::new(AtomicU32::new(0));
        let any = Arc::new(AtomicU32::new(0));

        {
            let direct = Arc::clone(&direct);
            dispatcher.add_listener(Key::Named("ready"), move |value| {
                let direct = Arc::clone(&direct);
                async move {
                    direct.store(value, Ordering::SeqCst);
                }
            });
        }
        {
            let any = Arc::clone(&any);
            dispatcher.add_listener(Key::Any, move |value| {
                let any = Arc::clone(&any);
                async move {
                    any.store(value, Ordering::SeqCst);
                }
            });
        }

        dispatcher.dispatch(Key::Named("ready"), 7);

        // Listeners run on spawned tasks; yield until scheduled.
        for _ in 0..50 {
            if direct.load(Ordering::SeqCst) == 7 && any.load(Ordering::SeqCst) == 7 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(7, direct.load(Ordering::SeqCst));
        assert_eq!(7, any.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn panicking_listener_does_not_stop_its_sibling() {
        let dispatcher: EventDispatcher<Key, u32> = EventDispatcher::new();
        let survived = Arc::new(AtomicU32::new(0));

        dispatcher.add_listener(Key::Named("ready"), |_value| async move {
            panic!("boom");
        });
        {
            let survived = Arc::clone(&survived);
            dispatcher.add_listener(Key::Named("ready"), move |value| {
                let survived = Arc::clone(&survived);
                async move {
                    survived.store(value, Ordering::SeqCst);
                }
            });
        }

        dispatcher.dispatch(Key::Named("ready"), 9);

        for _ in 0..50 {
            if survived.load(Ordering::SeqCst) == 9 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(9, survived.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn waiter_resolves_on_matching_predicate() {
        let dispatcher: EventDispatcher<Key, u32> = EventDispatcher::new();

        let wait = tokio::spawn({
            let dispatcher = Arc::new(dispatcher);
            let dispatcher2 = Arc::clone(&dispatcher);

            async move {
                let handle = tokio::spawn(async move {
                    dispatcher2
                        .wait_for(Key::Named("ready"), |v| *v == 42, Duration::from_secs(1))
                        .await
                });

                tokio::task::yield_now().await;
                dispatcher.dispatch(Key::Named("ready"), 1);
                dispatcher.dispatch(Key::Named("ready"), 42);

                handle.await.unwrap()
            }
        });

        let value = wait.await.unwrap().expect("waiter should resolve");
        assert_eq!(42, value);
    }

    #[tokio::test(flavor = "multi_thread", start_paused = true)]
    async fn waiter_times_out_without_a_match() {
        let dispatcher: EventDispatcher<Key, u32> = EventDispatcher::new();

        let result = dispatcher
            .wait_for(Key::Named("ready"), |_| false, Duration::from_millis(10))
            .await;

        assert!(result.is_err());
    }
}

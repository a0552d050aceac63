// src/core/observer.rs

//! A minimal signal/slot capability used for the router's three
//! observability signals (`on_instance_state_change`, `on_instance_ready`,
//! `on_not_in_cluster_mode`) and for readiness-change notifications.
//!
//! There is no signal/slot idiom elsewhere in this crate's dependency stack,
//! so this is purpose-built rather than adapted from an existing type.
//! Subscribers are invoked synchronously, outside the shard's own lock, in
//! registration order. A panicking subscriber is caught and logged — it
//! never propagates into the shard or poisons later subscribers.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

type Subscriber<T> = Arc<dyn Fn(T) + Send + Sync>;

/// A fan-out point for a single event type `T`.
///
/// Deliberately guarded by its own lock rather than the shard's `RwLock`:
/// registration may happen from any thread, and emission must never be
/// attempted while the shard's own lock is held (a re-entrant call from a
/// subscriber back into the shard would otherwise deadlock).
pub struct Observer<T: Clone> {
    subscribers: Mutex<Vec<Subscriber<T>>>,
}

impl<T: Clone> Observer<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Registers a new subscriber. Subscribers accumulate; there is no
    /// unsubscribe — shards are expected to live for the process lifetime of
    /// the topology they route for.
    pub fn subscribe(&self, subscriber: impl Fn(T) + Send + Sync + 'static) {
        self.subscribers.lock().push(Arc::new(subscriber));
    }

    /// Invokes every subscriber in registration order with a clone of
    /// `value`. Must be called with no shard lock held. A subscriber that
    /// panics is caught and logged; later subscribers still run.
    pub fn emit(&self, value: T) {
        // Snapshot the subscriber list under the lock, then drop the lock
        // before calling anything, so a subscriber that re-enters
        // `subscribe` (or causes another `emit`) cannot deadlock on it.
        let snapshot: Vec<Subscriber<T>> = self.subscribers.lock().clone();
        for subscriber in snapshot {
            let value = value.clone();
            if let Err(payload) =
                std::panic::catch_unwind(AssertUnwindSafe(|| subscriber(value)))
            {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "<non-string panic payload>".to_string());
                error!(message, "observer subscriber panicked; suppressing");
            }
        }
    }
}

impl<T: Clone> Default for Observer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> std::fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("subscribers", &self.subscribers.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emits_to_all_subscribers_in_order() {
        let observer = Observer::<i32>::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            observer.subscribe(move |v| order.lock().push((i, v)));
        }
        observer.emit(42);
        assert_eq!(*order.lock(), vec![(0, 42), (1, 42), (2, 42)]);
    }

    #[test]
    fn panicking_subscriber_does_not_stop_later_ones() {
        let observer = Observer::<i32>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        observer.subscribe(|_| panic!("boom"));
        let calls2 = calls.clone();
        observer.subscribe(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        observer.emit(1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

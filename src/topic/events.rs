//! Listener registration and dispatch for topic events
//!
//! Synchronous callbacks registered against a topic. Listeners fire in
//! registration order and a returned [`ListenerId`] removes exactly the
//! listener it was issued for. Emission snapshots the callback list first so
//! a listener may add or remove listeners without deadlocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Handle identifying one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Outcome delivered to subscription-result listeners after each
/// subscribe attempt settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionResult {
    pub succeeded: bool,
    /// Failure detail when `succeeded` is false.
    pub reason: Option<String>,
}

impl SubscriptionResult {
    pub fn success() -> Self {
        Self {
            succeeded: true,
            reason: None,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            reason: Some(reason.into()),
        }
    }
}

type Callback<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// Ordered set of listeners for one event kind.
pub struct ListenerSet<A> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, Callback<A>)>>,
}

impl<A> Default for ListenerSet<A> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<A> ListenerSet<A> {
    pub fn add<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock_entries().push((id, Arc::new(callback)));
        id
    }

    /// Remove a listener. Returns false when the id is unknown, which
    /// includes double removal.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.lock_entries();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    /// Invoke every listener in registration order. The list is snapshotted
    /// before any callback runs, so listeners added or removed mid-emission
    /// take effect from the next emission.
    pub fn emit(&self, event: &A) {
        let callbacks: Vec<Callback<A>> = self
            .lock_entries()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, Callback<A>)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_listeners_fire_in_registration_order() {
        let set: ListenerSet<u32> = ListenerSet::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            set.add(move |value: &u32| {
                seen.lock().unwrap().push((tag, *value));
            });
        }

        set.emit(&7);
        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![("first", 7), ("second", 7), ("third", 7)]);
    }

    #[test]
    fn test_remove_targets_exactly_one_listener() {
        let set: ListenerSet<()> = ListenerSet::default();
        let count = Arc::new(AtomicUsize::new(0));

        let keep = count.clone();
        let _keep_id = set.add(move |_| {
            keep.fetch_add(1, Ordering::SeqCst);
        });
        let drop = count.clone();
        let drop_id = set.add(move |_| {
            drop.fetch_add(10, Ordering::SeqCst);
        });

        assert!(set.remove(drop_id));
        assert!(!set.remove(drop_id), "double removal reports false");

        set.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_listener_may_register_another_during_emit() {
        let set: Arc<ListenerSet<()>> = Arc::new(ListenerSet::default());
        let count = Arc::new(AtomicUsize::new(0));

        let inner_set = set.clone();
        let inner_count = count.clone();
        set.add(move |_| {
            let count = inner_count.clone();
            inner_set.add(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        });

        set.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 0, "added next emission only");
        set.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_result_constructors() {
        assert_eq!(
            SubscriptionResult::success(),
            SubscriptionResult {
                succeeded: true,
                reason: None
            }
        );
        let failed = SubscriptionResult::failure("broker said no");
        assert!(!failed.succeeded);
        assert_eq!(failed.reason.as_deref(), Some("broker said no"));
    }
}

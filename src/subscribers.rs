//! Observer list for quality-level changes.
//!
//! Listeners are invoked synchronously, outside the registry lock, in
//! registration order. A listener may unsubscribe itself or any other
//! listener while a notification is in flight: removed entries are skipped
//! and everyone else is still notified.

use crate::quality_table::{QualityConfig, QualityLevel};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::error;

/// Callback invoked with the new level and its configuration.
pub type Listener = dyn Fn(QualityLevel, &QualityConfig) + Send + Sync;

struct Entry {
    id: u64,
    active: AtomicBool,
    listener: Box<Listener>,
}

/// Registry of level-change listeners.
#[derive(Default)]
pub struct SubscriberList {
    entries: Mutex<Vec<Arc<Entry>>>,
    next_id: AtomicU64,
}

impl SubscriberList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. The returned handle removes it again.
    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(QualityLevel, &QualityConfig) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(Entry {
            id,
            active: AtomicBool::new(true),
            listener: Box::new(listener),
        });

        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&entry));

        Subscription {
            list: Arc::downgrade(self),
            entry,
        }
    }

    /// Call every active listener with `level`.
    ///
    /// A panicking listener is logged and skipped; it does not stop the
    /// others from being notified.
    pub fn notify(&self, level: QualityLevel, config: &QualityConfig) {
        let snapshot: Vec<Arc<Entry>> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for entry in snapshot {
            if !entry.active.load(Ordering::SeqCst) {
                continue;
            }
            let result = catch_unwind(AssertUnwindSafe(|| (entry.listener)(level, config)));
            if result.is_err() {
                error!(subscriber = entry.id, "Quality listener panicked, continuing");
            }
        }
    }

    fn remove(&self, id: u64) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|entry| entry.id != id);
    }

    /// Drop every listener.
    pub fn clear(&self) {
        let drained: Vec<Arc<Entry>> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for entry in drained {
            entry.active.store(false, Ordering::SeqCst);
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by [`SubscriberList::subscribe`].
///
/// Dropping the handle does not unsubscribe; call
/// [`unsubscribe`](Self::unsubscribe).
#[must_use = "keep the Subscription to be able to unsubscribe later"]
pub struct Subscription {
    list: Weak<SubscriberList>,
    entry: Arc<Entry>,
}

impl Subscription {
    /// Remove the listener. Idempotent, and safe to call from inside a
    /// notification.
    pub fn unsubscribe(&self) {
        if self.entry.active.swap(false, Ordering::SeqCst) {
            if let Some(list) = self.list.upgrade() {
                list.remove(self.entry.id);
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.entry.active.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.entry.id)
            .field("active", &self.is_active())
            .finish()
    }
}

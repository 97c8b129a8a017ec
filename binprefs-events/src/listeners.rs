//! Change listeners.

use binprefs_core::{PrefKey, StoreName};
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Identifies a registered listener for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Called after a key changed, locally or through a remote event.
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, store: &StoreName, key: &PrefKey);
}

impl<F> ChangeListener for F
where
    F: Fn(&StoreName, &PrefKey) + Send + Sync,
{
    fn on_change(&self, store: &StoreName, key: &PrefKey) {
        self(store, key)
    }
}

/// Listeners of one store instance.
///
/// Notification works on a snapshot of the registered listeners, so a
/// listener may register or unregister listeners from inside its callback.
#[derive(Default)]
pub struct ListenerRegistry {
    store: StoreName,
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ChangeListener>)>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("store", &self.store)
            .field("listeners", &self.len())
            .finish()
    }
}

impl ListenerRegistry {
    pub fn new(store: StoreName) -> Self {
        Self {
            store,
            next_id: AtomicU64::new(0),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Returns whether `id` was registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Call every listener for `key`. A panicking listener is logged and
    /// skipped.
    pub fn notify(&self, key: &PrefKey) {
        let snapshot: Vec<_> = self
            .listeners
            .read()
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();

        for (id, listener) in snapshot {
            let result =
                panic::catch_unwind(AssertUnwindSafe(|| listener.on_change(&self.store, key)));
            if result.is_err() {
                warn!(store = %self.store, key = %key, listener = id.0, "Change listener panicked");
            }
        }
    }
}

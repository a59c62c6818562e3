//! Change events and listener registries

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::path::SyncPath;

/// Path-identified delta carried by every change event. Observers get
/// deltas, never full snapshots, so they can update incrementally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathDelta {
    pub added: Vec<SyncPath>,
    pub changed: Vec<SyncPath>,
    pub removed: Vec<SyncPath>,
}

impl PathDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// All paths named by this delta, in added/changed/removed order.
    pub fn touched(&self) -> impl Iterator<Item = &SyncPath> {
        self.added
            .iter()
            .chain(self.changed.iter())
            .chain(self.removed.iter())
    }
}

/// Observer of a [`DiffTree`](crate::tree::DiffTree).
///
/// Callbacks run synchronously on the thread applying the batch, in
/// registration order. A callback must not invoke a mutating operation
/// on the tree it observes; that deadlocks on the tree's apply lock.
pub trait TreeListener: Send + Sync {
    fn tree_changed(&self, delta: &PathDelta);
}

/// Observer of a derived output set produced by a filter pipeline.
///
/// Same delivery discipline as [`TreeListener`]: synchronous, ordered,
/// and isolated from other listeners' failures. Kept as a distinct trait
/// so each component carries its own typed subscription list.
pub trait OutputListener: Send + Sync {
    fn output_changed(&self, delta: &PathDelta);
}

/// Token returned by listener registration, used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

/// Ordered listener registry with panic isolation.
///
/// A panicking listener is logged and skipped; delivery always reaches
/// the remaining listeners and never rolls back the mutation that
/// triggered the event.
pub struct ListenerSet<L: ?Sized> {
    entries: Mutex<Vec<(ListenerHandle, std::sync::Arc<L>)>>,
    next_id: AtomicU64,
}

impl<L: ?Sized> Default for ListenerSet<L> {
    fn default() -> Self {
        ListenerSet {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<L: ?Sized> ListenerSet<L> {
    pub fn add(&self, listener: std::sync::Arc<L>) -> ListenerHandle {
        let handle = ListenerHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .lock()
            .expect("listener lock poisoned")
            .push((handle, listener));
        handle
    }

    pub fn remove(&self, handle: ListenerHandle) {
        self.entries
            .lock()
            .expect("listener lock poisoned")
            .retain(|(h, _)| *h != handle);
    }

    pub fn clear(&self) {
        self.entries.lock().expect("listener lock poisoned").clear();
    }

    /// Deliver to every listener in registration order.
    pub fn notify(&self, mut call: impl FnMut(&L)) {
        // Snapshot so a listener may deregister itself without deadlock.
        let entries: Vec<_> = self
            .entries
            .lock()
            .expect("listener lock poisoned")
            .clone();
        for (handle, listener) in entries {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| call(&listener))) {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                warn!(?handle, reason, "change listener panicked, continuing delivery");
            }
        }
    }
}

impl<L: ?Sized> std::fmt::Debug for ListenerSet<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.entries.lock().map(|e| e.len()).unwrap_or(0);
        f.debug_struct("ListenerSet").field("len", &len).finish()
    }
}

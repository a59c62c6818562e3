//! Per-context derived-data cache with event-driven invalidation

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::debug;

use drift_core::{DiffTree, ListenerHandle, PathDelta, SyncPath, TreeListener};

type Payload = Arc<dyn Any + Send + Sync>;

/// Memoizes per-node derived data (resolved handles, display strings)
/// keyed by tree path.
///
/// The cache subscribes to its owning tree and drops the entry for every
/// path named by a change event; entries are invalidated, never eagerly
/// recomputed. Payloads must be strictly per-node: nothing cached here
/// may depend on subtree aggregates, since invalidation does not fan out
/// to ancestors or descendants beyond what the tree's deltas name.
pub struct DiffCache {
    inner: Arc<CacheInner>,
    tree: Arc<DiffTree>,
    subscription: ListenerHandle,
    disposed: AtomicBool,
}

struct CacheInner {
    entries: DashMap<SyncPath, Payload>,
}

/// Weak tree-side handle so a dropped cache does not linger in the
/// listener list as a live object.
struct CacheWatch(Weak<CacheInner>);

impl TreeListener for CacheWatch {
    fn tree_changed(&self, delta: &PathDelta) {
        if let Some(inner) = self.0.upgrade() {
            for path in delta.touched() {
                inner.entries.remove(path);
            }
        }
    }
}

impl DiffCache {
    pub fn new(tree: Arc<DiffTree>) -> Self {
        let inner = Arc::new(CacheInner {
            entries: DashMap::new(),
        });
        let subscription = tree.add_listener(Arc::new(CacheWatch(Arc::downgrade(&inner))));
        DiffCache {
            inner,
            tree,
            subscription,
            disposed: AtomicBool::new(false),
        }
    }

    /// Typed lookup; `None` when absent, invalidated, or of another type.
    pub fn get<T: Send + Sync + 'static>(&self, path: &SyncPath) -> Option<Arc<T>> {
        self.get_raw(path).and_then(|p| p.downcast::<T>().ok())
    }

    pub fn get_raw(&self, path: &SyncPath) -> Option<Payload> {
        self.inner.entries.get(path).map(|e| e.value().clone())
    }

    pub fn put<T: Send + Sync + 'static>(&self, path: SyncPath, payload: T) {
        self.inner.entries.insert(path, Arc::new(payload));
    }

    pub fn invalidate(&self, path: &SyncPath) {
        self.inner.entries.remove(path);
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Clear all entries and unsubscribe from the tree. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.tree.remove_listener(self.subscription);
        self.inner.entries.clear();
        debug!("diff cache disposed");
    }
}

impl Drop for DiffCache {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for DiffCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffCache")
            .field("entries", &self.inner.entries.len())
            .field("disposed", &self.disposed.load(Ordering::Acquire))
            .finish()
    }
}

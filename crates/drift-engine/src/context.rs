//! Synchronization context — tree ownership, refresh, and lifecycle

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use drift_core::{
    CancelToken, Depth, DiffNode, DiffTree, DriftError, PathDelta, Result, SyncPath, SyncScope,
};

use crate::cache::DiffCache;
use crate::collab::{DiffComputer, Resource, ResourceResolver};

/// How a refresh ended when it did not fail.
#[derive(Debug)]
pub enum RefreshOutcome {
    /// The computed batch was applied; the delta describes the net
    /// change (possibly empty).
    Applied(PathDelta),
    /// Cancellation was observed before application began; the tree is
    /// untouched. This is a normal outcome, not an error.
    Cancelled,
}

/// A depth-bounded region of the item hierarchy, used to query diffs
/// for UI-chosen selections.
#[derive(Debug, Clone)]
pub struct Traversal {
    pub root: SyncPath,
    pub depth: Depth,
}

impl Traversal {
    pub fn new(root: SyncPath, depth: Depth) -> Self {
        Traversal { root, depth }
    }

    /// True if the resolved resource falls inside this traversal.
    pub fn contains(&self, resource: &Resource) -> bool {
        match self.depth {
            Depth::Infinite => self.root.contains(&resource.path),
            Depth::Children => {
                resource.path == self.root
                    || resource.path.parent().as_ref() == Some(&self.root)
                    || (self.root.is_empty() && resource.path.len() == 1)
            }
        }
    }
}

/// Binds a scope, the diff tree it constrains, and a lazily-created
/// derived-data cache; orchestrates refreshes against the injected
/// [`DiffComputer`].
///
/// Dropping or disposing the context stops cache invalidation; readers
/// holding the tree keep working against its final state.
pub struct SyncContext {
    scope: Arc<SyncScope>,
    tree: Arc<DiffTree>,
    computer: Arc<dyn DiffComputer>,
    /// Guarded check-and-set so exactly one cache is ever built, even
    /// under concurrent first access.
    cache: Mutex<Option<Arc<DiffCache>>>,
    disposed: AtomicBool,
}

impl SyncContext {
    pub fn new(scope: Arc<SyncScope>, computer: Arc<dyn DiffComputer>) -> Arc<Self> {
        let tree = Arc::new(DiffTree::new(scope.clone()));
        Arc::new(SyncContext {
            scope,
            tree,
            computer,
            cache: Mutex::new(None),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn scope(&self) -> &Arc<SyncScope> {
        &self.scope
    }

    pub fn tree(&self) -> &Arc<DiffTree> {
        &self.tree
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Recompute diff state for `mappings` (the whole scope when empty)
    /// and apply the result as one batch.
    ///
    /// Mappings are computed concurrently; application is serialized by
    /// the tree, so overlapping refreshes cannot interleave partial
    /// batches. Cancellation observed before application begins leaves
    /// the tree untouched and reports [`RefreshOutcome::Cancelled`]; a
    /// computation failure leaves it untouched and surfaces
    /// [`DriftError::Computation`].
    pub async fn refresh(
        &self,
        mappings: &[SyncPath],
        token: &CancelToken,
    ) -> Result<RefreshOutcome> {
        if self.is_disposed() {
            return Err(DriftError::Disposed);
        }

        let mappings: Vec<SyncPath> = if mappings.is_empty() {
            self.scope.roots()
        } else {
            mappings.to_vec()
        };

        let computations = mappings
            .iter()
            .map(|mapping| self.computer.compute(std::slice::from_ref(mapping), token));
        let mut batch = Vec::new();
        for result in join_all(computations).await {
            match result {
                Ok(entries) => batch.extend(entries),
                Err(source) => {
                    error!(%source, "diff computation failed, tree left unchanged");
                    return Err(DriftError::Computation(source));
                }
            }
        }

        if token.is_cancelled() {
            debug!("refresh cancelled before batch application");
            return Ok(RefreshOutcome::Cancelled);
        }

        let delta = self.tree.apply(batch)?;
        Ok(RefreshOutcome::Applied(delta))
    }

    /// Run a refresh as a background task. The returned token cancels
    /// it cooperatively.
    pub fn spawn_refresh(
        self: &Arc<Self>,
        mappings: Vec<SyncPath>,
    ) -> (CancelToken, JoinHandle<Result<RefreshOutcome>>) {
        let token = CancelToken::new();
        let context = self.clone();
        let task_token = token.clone();
        let handle = tokio::spawn(async move { context.refresh(&mappings, &task_token).await });
        (token, handle)
    }

    /// The context's derived-data cache, constructed on first call.
    pub fn cache(&self) -> Result<Arc<DiffCache>> {
        if self.is_disposed() {
            return Err(DriftError::Disposed);
        }
        let mut slot = self.cache.lock().expect("cache slot poisoned");
        if let Some(cache) = slot.as_ref() {
            return Ok(cache.clone());
        }
        let cache = Arc::new(DiffCache::new(self.tree.clone()));
        *slot = Some(cache.clone());
        Ok(cache)
    }

    /// Release the cache and refuse further mutating operations.
    /// Idempotent; repeated calls are no-ops.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(cache) = self.cache.lock().expect("cache slot poisoned").take() {
            cache.dispose();
        }
        debug!("synchronization context disposed");
    }

    /// All nodes whose resolved location falls inside at least one
    /// traversal. A full tree visit per call; intended for UI-triggered
    /// selections, not hot paths.
    pub fn diffs_for_traversals(
        &self,
        traversals: &[Traversal],
        resolver: &dyn ResourceResolver,
    ) -> Vec<DiffNode> {
        let mut matches = Vec::new();
        self.tree
            .accept(&SyncPath::parse(""), Depth::Infinite, &mut |node| {
                if let Some(resource) = resolver.resolve(node) {
                    if traversals.iter().any(|t| t.contains(&resource)) {
                        matches.push(node.clone());
                    }
                }
                true
            });
        matches
    }

    /// Re-root the scope and drop the tree's contents. The caller is
    /// expected to follow up with a full [`refresh`](Self::refresh).
    pub fn reset_scope(&self, roots: Vec<SyncPath>) -> Result<PathDelta> {
        if self.is_disposed() {
            return Err(DriftError::Disposed);
        }
        self.scope.reset(roots);
        Ok(self.tree.clear())
    }
}

impl Drop for SyncContext {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("tree", &self.tree)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

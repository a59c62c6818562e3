//! Two-stage filter pipeline over a live diff tree
//!
//! Stage one restricts the tree's nodes to a caller-chosen working set
//! of roots; stage two applies a predicate. Each stage owns an
//! observable [`SyncSet`]. Tree deltas are pushed through both stages
//! incrementally; changing a stage's input recomputes that stage (and
//! everything downstream of it) in full.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

use drift_core::{
    CancelToken, DiffNode, DiffTree, ListenerHandle, PathDelta, SyncPath, TreeListener,
};

use crate::set::SyncSet;

/// Side-effect-free predicate over a diff node.
///
/// An error selects conservatively: the failing node is excluded, the
/// failure is logged, and evaluation continues with the remaining nodes.
pub trait SyncFilter: Send + Sync {
    fn select(&self, node: &DiffNode, token: &CancelToken) -> anyhow::Result<bool>;
}

/// The default filter: keeps every node.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl SyncFilter for AcceptAll {
    fn select(&self, _node: &DiffNode, _token: &CancelToken) -> anyhow::Result<bool> {
        Ok(true)
    }
}

struct FnFilter<F>(F);

impl<F> SyncFilter for FnFilter<F>
where
    F: Fn(&DiffNode) -> bool + Send + Sync,
{
    fn select(&self, node: &DiffNode, _token: &CancelToken) -> anyhow::Result<bool> {
        Ok((self.0)(node))
    }
}

/// Wrap a plain predicate function as a [`SyncFilter`].
pub fn filter_fn<F>(f: F) -> Arc<dyn SyncFilter>
where
    F: Fn(&DiffNode) -> bool + Send + Sync + 'static,
{
    Arc::new(FnFilter(f))
}

struct Stages {
    /// `None` or empty: no restriction, everything in scope passes.
    working_set: Option<Vec<SyncPath>>,
    filter: Arc<dyn SyncFilter>,
}

impl Stages {
    fn admits(&self, path: &SyncPath) -> bool {
        match self.working_set.as_deref() {
            None | Some([]) => true,
            Some(roots) => roots.iter().any(|root| root.contains(path)),
        }
    }

    fn selects(&self, node: &DiffNode, token: &CancelToken) -> bool {
        match self.filter.select(node, token) {
            Ok(keep) => keep,
            Err(error) => {
                warn!(path = %node.path, %error, "filter failed for node, excluding it");
                false
            }
        }
    }
}

struct CollectorInner {
    tree: Arc<DiffTree>,
    /// Serializes stage recomputation against upstream delta handling so
    /// readers of either set never observe a half-applied stage.
    stages: Mutex<Stages>,
    working_output: Arc<SyncSet>,
    output: Arc<SyncSet>,
}

impl CollectorInner {
    /// Push one upstream tree delta through both stages.
    fn handle_tree_delta(&self, delta: &PathDelta) {
        let stages = self.stages.lock().expect("collector lock poisoned");
        let token = CancelToken::new();

        let mut stage_upserts = Vec::new();
        let mut stage_removals = Vec::new();
        for path in delta.added.iter().chain(delta.changed.iter()) {
            // Read back from the tree rather than trusting the delta:
            // a later batch may already have superseded it.
            match self.tree.get(path) {
                Some(node) if stages.admits(path) => stage_upserts.push(node),
                _ => stage_removals.push(path.clone()),
            }
        }
        stage_removals.extend(delta.removed.iter().cloned());

        let mut out_upserts = Vec::new();
        let mut out_removals = stage_removals.clone();
        for node in &stage_upserts {
            if stages.selects(node, &token) {
                out_upserts.push(node.clone());
            } else {
                out_removals.push(node.path.clone());
            }
        }

        self.working_output.apply_delta(stage_upserts, stage_removals);
        self.output.apply_delta(out_upserts, out_removals);
    }

    /// Full stage-one recompute from a tree snapshot, propagated through
    /// stage two. Caller holds the stages lock.
    fn recompute_all(&self, stages: &Stages, token: &CancelToken) {
        let mut members = HashMap::new();
        for node in self.tree.nodes() {
            if stages.admits(&node.path) {
                members.insert(node.path.clone(), node);
            }
        }
        self.working_output.replace(members.clone());
        self.recompute_filtered(stages, members, token);
    }

    /// Full stage-two recompute from the given stage-one membership.
    /// Leaves the previous output untouched when cancelled midway.
    fn recompute_filtered(
        &self,
        stages: &Stages,
        source: HashMap<SyncPath, DiffNode>,
        token: &CancelToken,
    ) {
        let mut selected = HashMap::new();
        for (path, node) in source {
            if token.is_cancelled() {
                debug!("filter recompute cancelled, keeping previous output");
                return;
            }
            if stages.selects(&node, token) {
                selected.insert(path, node);
            }
        }
        self.output.replace(selected);
    }
}

struct CollectorWatch(Weak<CollectorInner>);

impl TreeListener for CollectorWatch {
    fn tree_changed(&self, delta: &PathDelta) {
        if let Some(inner) = self.0.upgrade() {
            inner.handle_tree_delta(delta);
        }
    }
}

/// Collects a tree's nodes into a filtered, independently observable
/// output set.
///
/// Several collectors may observe the same tree concurrently; each owns
/// only its derived sets, never the tree.
pub struct SyncInfoCollector {
    inner: Arc<CollectorInner>,
    subscription: ListenerHandle,
    disposed: AtomicBool,
}

impl SyncInfoCollector {
    pub fn new(tree: Arc<DiffTree>) -> Self {
        let inner = Arc::new(CollectorInner {
            tree: tree.clone(),
            stages: Mutex::new(Stages {
                working_set: None,
                filter: Arc::new(AcceptAll),
            }),
            working_output: SyncSet::new(),
            output: SyncSet::new(),
        });
        let subscription = tree.add_listener(Arc::new(CollectorWatch(Arc::downgrade(&inner))));
        {
            let stages = inner.stages.lock().expect("collector lock poisoned");
            inner.recompute_all(&stages, &CancelToken::new());
        }
        SyncInfoCollector {
            inner,
            subscription,
            disposed: AtomicBool::new(false),
        }
    }

    /// Restrict stage one to nodes under any of `roots`. An empty set
    /// lifts the restriction. Recomputes stage one and everything
    /// downstream.
    pub fn set_working_set(&self, roots: Option<Vec<SyncPath>>) {
        let stages = {
            let mut stages = self.inner.stages.lock().expect("collector lock poisoned");
            stages.working_set = roots;
            stages
        };
        self.inner.recompute_all(&stages, &CancelToken::new());
    }

    pub fn working_set(&self) -> Option<Vec<SyncPath>> {
        self.inner
            .stages
            .lock()
            .expect("collector lock poisoned")
            .working_set
            .clone()
    }

    /// Replace the predicate and recompute stage two only; stage one's
    /// output is reused unchanged. Cancellation midway keeps the
    /// previous output.
    pub fn set_filter(&self, filter: Arc<dyn SyncFilter>, token: &CancelToken) {
        let stages = {
            let mut stages = self.inner.stages.lock().expect("collector lock poisoned");
            stages.filter = filter;
            stages
        };
        let source: HashMap<SyncPath, DiffNode> = self
            .inner
            .working_output
            .snapshot()
            .into_iter()
            .map(|node| (node.path.clone(), node))
            .collect();
        self.inner.recompute_filtered(&stages, source, token);
    }

    pub fn filter(&self) -> Arc<dyn SyncFilter> {
        self.inner
            .stages
            .lock()
            .expect("collector lock poisoned")
            .filter
            .clone()
    }

    /// The intermediate working-set stage output.
    pub fn working_set_output(&self) -> Arc<SyncSet> {
        self.inner.working_output.clone()
    }

    /// The fully filtered output set.
    pub fn output(&self) -> Arc<SyncSet> {
        self.inner.output.clone()
    }

    /// Detach from the tree. The output sets keep their final contents
    /// but receive no further updates. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.tree.remove_listener(self.subscription);
        self.inner.working_output.clear_listeners();
        self.inner.output.clear_listeners();
        debug!("collector disposed");
    }
}

impl Drop for SyncInfoCollector {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for SyncInfoCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncInfoCollector")
            .field("working_output", &self.inner.working_output)
            .field("output", &self.inner.output)
            .finish()
    }
}

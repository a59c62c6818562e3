//! Path-indexed diff tree with transactional batch mutation

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use crate::error::{DriftError, Result};
use crate::events::{ListenerHandle, ListenerSet, PathDelta, TreeListener};
use crate::model::DiffNode;
use crate::path::SyncPath;
use crate::scope::SyncScope;

/// Traversal depth bound for [`DiffTree::accept`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    /// The origin and its immediate children only.
    Children,
    /// The whole subtree under the origin.
    Infinite,
}

/// One entry of a batch: `node: None` removes the subtree at `path`,
/// `Some` inserts or replaces the node there.
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub path: SyncPath,
    pub node: Option<DiffNode>,
}

impl BatchEntry {
    pub fn put(node: DiffNode) -> Self {
        BatchEntry {
            path: node.path.clone(),
            node: Some(node),
        }
    }

    pub fn remove(path: SyncPath) -> Self {
        BatchEntry { path, node: None }
    }
}

/// Immutable-per-version tree state, replaced wholesale on every batch.
/// Readers holding the lock during a traversal therefore see one
/// consistent snapshot.
#[derive(Debug, Clone, Default)]
struct TreeState {
    nodes: HashMap<SyncPath, DiffNode>,
    /// Parent path → child paths in insertion order. Single-segment
    /// paths hang off the empty path.
    children: HashMap<SyncPath, Vec<SyncPath>>,
}

impl TreeState {
    /// The child-index key a path hangs off: its parent when a node
    /// exists there, otherwise the virtual root. Scope roots deeper than
    /// one segment have no in-tree parent and land at the virtual root.
    fn link_parent(&self, path: &SyncPath) -> SyncPath {
        match path.parent() {
            Some(parent) if self.nodes.contains_key(&parent) => parent,
            _ => SyncPath::parse(""),
        }
    }

    fn attach(&mut self, path: &SyncPath, node: DiffNode) {
        if self.nodes.insert(path.clone(), node).is_none() {
            let parent = self.link_parent(path);
            self.children.entry(parent).or_default().push(path.clone());
        }
    }

    /// Remove the subtree rooted at `path`.
    fn detach(&mut self, path: &SyncPath) {
        self.detach_inner(path);
        let parent = self.link_parent(path);
        if let Some(siblings) = self.children.get_mut(&parent) {
            siblings.retain(|p| p != path);
        }
    }

    fn detach_inner(&mut self, path: &SyncPath) {
        if self.nodes.remove(path).is_none() {
            return;
        }
        for child in self.children.remove(path).unwrap_or_default() {
            self.detach_inner(&child);
        }
    }
}

/// Mutable, path-keyed container of [`DiffNode`]s bound to a scope.
///
/// The tree is populated only through [`apply`](DiffTree::apply), which
/// treats a whole batch as one transaction: concurrent readers observe
/// either the pre-batch or the post-batch tree, never a partial batch,
/// and exactly one change event is emitted per non-empty batch.
///
/// The tree keeps itself prefix-closed: inserting a node whose in-scope
/// ancestors are absent synthesizes in-sync placeholders for them, and
/// removing a node removes its whole subtree. Both show up in the
/// emitted delta.
pub struct DiffTree {
    scope: Arc<SyncScope>,
    state: RwLock<Arc<TreeState>>,
    /// Serializes batch application and listener delivery.
    apply_lock: Mutex<()>,
    listeners: ListenerSet<dyn TreeListener>,
}

impl DiffTree {
    pub fn new(scope: Arc<SyncScope>) -> Self {
        DiffTree {
            scope,
            state: RwLock::new(Arc::new(TreeState::default())),
            apply_lock: Mutex::new(()),
            listeners: ListenerSet::default(),
        }
    }

    pub fn scope(&self) -> &Arc<SyncScope> {
        &self.scope
    }

    /// Apply a batch of insertions, replacements and removals as one
    /// transaction.
    ///
    /// Validation is transactional: an out-of-scope path or a removal of
    /// an absent path rejects the whole batch and the tree is untouched.
    /// On success the new state becomes visible atomically and all
    /// listeners are notified synchronously, in registration order, with
    /// the resulting delta (which is also returned). Empty deltas are
    /// not delivered.
    pub fn apply(&self, batch: Vec<BatchEntry>) -> Result<PathDelta> {
        let _guard = self.apply_lock.lock().expect("apply lock poisoned");

        let current = self.state.read().expect("tree lock poisoned").clone();
        for entry in &batch {
            if !self.scope.contains(&entry.path) {
                return Err(DriftError::OutOfScope(entry.path.clone()));
            }
        }

        let mut next = (*current).clone();
        for entry in batch {
            match entry.node {
                Some(mut node) => {
                    // Synthesize missing in-scope ancestors so the tree
                    // stays prefix-closed.
                    for ancestor in entry.path.ancestors() {
                        if self.scope.contains(&ancestor) && !next.nodes.contains_key(&ancestor) {
                            next.attach(&ancestor, DiffNode::in_sync(ancestor.clone()));
                        }
                    }
                    node.path = entry.path.clone();
                    next.attach(&entry.path, node);
                }
                None => {
                    // Valid if present at this point of the transaction,
                    // or already taken out by an earlier entry's cascade.
                    if next.nodes.contains_key(&entry.path) {
                        next.detach(&entry.path);
                    } else if !current.nodes.contains_key(&entry.path) {
                        return Err(DriftError::PathNotFound(entry.path));
                    }
                }
            }
        }

        let delta = Self::diff_states(&current, &next);

        *self.state.write().expect("tree lock poisoned") = Arc::new(next);

        if !delta.is_empty() {
            debug!(
                added = delta.added.len(),
                changed = delta.changed.len(),
                removed = delta.removed.len(),
                "batch applied"
            );
            self.listeners.notify(|l| l.tree_changed(&delta));
        }
        Ok(delta)
    }

    /// Drop every node, emitting one removal delta. Used when the scope
    /// is re-rooted and the tree must be rebuilt by a full refresh; the
    /// old contents may no longer lie within the scope, so this bypasses
    /// per-entry validation.
    pub fn clear(&self) -> PathDelta {
        let _guard = self.apply_lock.lock().expect("apply lock poisoned");
        let current = self.state.read().expect("tree lock poisoned").clone();
        let delta = Self::diff_states(&current, &TreeState::default());
        *self.state.write().expect("tree lock poisoned") = Arc::new(TreeState::default());
        if !delta.is_empty() {
            debug!(removed = delta.removed.len(), "tree cleared");
            self.listeners.notify(|l| l.tree_changed(&delta));
        }
        delta
    }

    /// Net per-path difference between two tree states, sorted for
    /// deterministic delivery.
    fn diff_states(old: &TreeState, new: &TreeState) -> PathDelta {
        let mut delta = PathDelta::default();
        for (path, node) in &new.nodes {
            match old.nodes.get(path) {
                None => delta.added.push(path.clone()),
                Some(previous) if previous != node => delta.changed.push(path.clone()),
                Some(_) => {}
            }
        }
        for path in old.nodes.keys() {
            if !new.nodes.contains_key(path) {
                delta.removed.push(path.clone());
            }
        }
        delta.added.sort();
        delta.changed.sort();
        delta.removed.sort();
        delta
    }

    pub fn get(&self, path: &SyncPath) -> Option<DiffNode> {
        self.snapshot().nodes.get(path).cloned()
    }

    /// Immediate children of `path`, in insertion order. The empty path
    /// yields the top-level entries.
    pub fn children(&self, path: &SyncPath) -> Vec<SyncPath> {
        self.snapshot()
            .children
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    /// Top-level present paths: entries with no in-tree parent.
    pub fn roots(&self) -> Vec<SyncPath> {
        self.children(&SyncPath::parse(""))
    }

    pub fn size(&self) -> usize {
        self.snapshot().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// All nodes currently in the tree, as one consistent snapshot.
    /// No particular order.
    pub fn nodes(&self) -> Vec<DiffNode> {
        self.snapshot().nodes.values().cloned().collect()
    }

    /// Pre-order traversal from `origin`, bounded by `depth`.
    ///
    /// The visitor returns `true` to continue; `false` aborts the whole
    /// traversal. An empty origin starts at the roots (the origin itself
    /// is visited only when a node exists there). The traversal reads a
    /// single consistent snapshot of the tree.
    pub fn accept(
        &self,
        origin: &SyncPath,
        depth: Depth,
        visitor: &mut dyn FnMut(&DiffNode) -> bool,
    ) {
        let state = self.snapshot();
        let mut cont = true;
        if let Some(node) = state.nodes.get(origin) {
            cont = visitor(node);
        }
        if cont {
            Self::walk(&state, origin, depth, visitor);
        }
    }

    fn walk(
        state: &TreeState,
        parent: &SyncPath,
        depth: Depth,
        visitor: &mut dyn FnMut(&DiffNode) -> bool,
    ) -> bool {
        let Some(children) = state.children.get(parent) else {
            return true;
        };
        for child in children {
            let Some(node) = state.nodes.get(child) else {
                continue;
            };
            if !visitor(node) {
                return false;
            }
            if depth == Depth::Infinite && !Self::walk(state, child, depth, visitor) {
                return false;
            }
        }
        true
    }

    pub fn add_listener(&self, listener: Arc<dyn TreeListener>) -> ListenerHandle {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, handle: ListenerHandle) {
        self.listeners.remove(handle);
    }

    fn snapshot(&self) -> Arc<TreeState> {
        self.state.read().expect("tree lock poisoned").clone()
    }
}

impl std::fmt::Debug for DiffTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffTree")
            .field("size", &self.size())
            .field("listeners", &self.listeners)
            .finish()
    }
}

//! Observable derived sets of diff nodes

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use drift_core::{DiffNode, ListenerHandle, ListenerSet, OutputListener, PathDelta, SyncPath};

/// Path-keyed set of [`DiffNode`]s owned by a pipeline stage.
///
/// Only the owning stage mutates the set, and always through
/// [`replace`](SyncSet::replace) or [`apply_delta`](SyncSet::apply_delta),
/// so readers get fully-consistent contents: either the previous or the
/// next stage output, never an intermediate.
pub struct SyncSet {
    nodes: RwLock<HashMap<SyncPath, DiffNode>>,
    listeners: ListenerSet<dyn OutputListener>,
}

impl SyncSet {
    pub fn new() -> Arc<Self> {
        Arc::new(SyncSet {
            nodes: RwLock::new(HashMap::new()),
            listeners: ListenerSet::default(),
        })
    }

    pub fn get(&self, path: &SyncPath) -> Option<DiffNode> {
        self.nodes.read().expect("set lock poisoned").get(path).cloned()
    }

    pub fn contains(&self, path: &SyncPath) -> bool {
        self.nodes.read().expect("set lock poisoned").contains_key(path)
    }

    /// All members, sorted by path for deterministic consumption.
    pub fn snapshot(&self) -> Vec<DiffNode> {
        let mut nodes: Vec<DiffNode> = self
            .nodes
            .read()
            .expect("set lock poisoned")
            .values()
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.path.cmp(&b.path));
        nodes
    }

    pub fn paths(&self) -> Vec<SyncPath> {
        let mut paths: Vec<SyncPath> = self
            .nodes
            .read()
            .expect("set lock poisoned")
            .keys()
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.nodes.read().expect("set lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add_listener(&self, listener: Arc<dyn OutputListener>) -> ListenerHandle {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, handle: ListenerHandle) {
        self.listeners.remove(handle);
    }

    pub(crate) fn clear_listeners(&self) {
        self.listeners.clear();
    }

    /// Swap in a fully recomputed membership. Emits one event describing
    /// the net difference; no event when nothing changed.
    pub(crate) fn replace(&self, next: HashMap<SyncPath, DiffNode>) {
        let delta = {
            let mut nodes = self.nodes.write().expect("set lock poisoned");
            let delta = Self::diff(&nodes, &next);
            *nodes = next;
            delta
        };
        self.emit(delta);
    }

    /// Apply an incremental delta computed by the owning stage.
    /// `upserts` insert-or-replace, `removals` drop members if present.
    pub(crate) fn apply_delta(&self, upserts: Vec<DiffNode>, removals: Vec<SyncPath>) {
        let mut delta = PathDelta::default();
        {
            let mut nodes = self.nodes.write().expect("set lock poisoned");
            for node in upserts {
                let path = node.path.clone();
                match nodes.get(&path) {
                    Some(previous) if *previous == node => {}
                    Some(_) => delta.changed.push(path.clone()),
                    None => delta.added.push(path.clone()),
                }
                nodes.insert(path, node);
            }
            for path in removals {
                if nodes.remove(&path).is_some() {
                    delta.removed.push(path);
                }
            }
        }
        delta.added.sort();
        delta.changed.sort();
        delta.removed.sort();
        self.emit(delta);
    }

    fn diff(old: &HashMap<SyncPath, DiffNode>, new: &HashMap<SyncPath, DiffNode>) -> PathDelta {
        let mut delta = PathDelta::default();
        for (path, node) in new {
            match old.get(path) {
                None => delta.added.push(path.clone()),
                Some(previous) if previous != node => delta.changed.push(path.clone()),
                Some(_) => {}
            }
        }
        for path in old.keys() {
            if !new.contains_key(path) {
                delta.removed.push(path.clone());
            }
        }
        delta.added.sort();
        delta.changed.sort();
        delta.removed.sort();
        delta
    }

    fn emit(&self, delta: PathDelta) {
        if !delta.is_empty() {
            self.listeners.notify(|l| l.output_changed(&delta));
        }
    }
}

impl std::fmt::Debug for SyncSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSet").field("len", &self.len()).finish()
    }
}

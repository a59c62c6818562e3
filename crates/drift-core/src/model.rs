//! Per-item synchronization state

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::path::SyncPath;
use crate::revision::compare_revisions;

/// Direction of divergence between the local item and its remote
/// counterpart, judged against the common base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncKind {
    /// No divergence on either side.
    InSync,
    /// The remote side changed relative to base.
    Incoming,
    /// The local side changed relative to base.
    Outgoing,
    /// Both sides changed relative to base.
    Conflicting,
}

/// What happened to the diverging side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    None,
    Addition,
    Deletion,
    Modification,
}

/// Snapshot of one side (local, base or remote) of a tracked item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantState {
    pub exists: bool,
    /// Content/revision identifier, absent when the side does not exist
    /// or the item is a container.
    pub revision: Option<String>,
    pub container: bool,
}

impl VariantState {
    pub fn file(revision: &str) -> Self {
        VariantState {
            exists: true,
            revision: Some(revision.to_owned()),
            container: false,
        }
    }

    pub fn folder() -> Self {
        VariantState {
            exists: true,
            revision: None,
            container: true,
        }
    }

    pub fn absent() -> Self {
        VariantState {
            exists: false,
            revision: None,
            container: false,
        }
    }
}

/// Immutable per-version description of one item's synchronization state.
///
/// Nodes are replaced wholesale when state changes; nothing mutates a
/// `DiffNode` after it enters a tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffNode {
    pub path: SyncPath,
    pub kind: SyncKind,
    pub change: ChangeKind,
    pub local: Option<VariantState>,
    pub base: Option<VariantState>,
    pub remote: Option<VariantState>,
}

impl DiffNode {
    /// A node with no divergence and no state descriptors. Used for
    /// container placeholders whose children carry the actual changes.
    pub fn in_sync(path: SyncPath) -> Self {
        DiffNode {
            path,
            kind: SyncKind::InSync,
            change: ChangeKind::None,
            local: None,
            base: None,
            remote: None,
        }
    }

    /// Derive a node from the three side descriptors.
    ///
    /// A side diverges when its existence or revision differs from base.
    /// Local divergence is an outgoing change, remote divergence incoming,
    /// both at once conflicting. The change kind describes the diverging
    /// side; for conflicts the local change wins the description.
    pub fn three_way(
        path: SyncPath,
        local: VariantState,
        base: VariantState,
        remote: VariantState,
    ) -> Self {
        let outgoing = side_change(&base, &local);
        let incoming = side_change(&base, &remote);
        let (kind, change) = match (outgoing, incoming) {
            (ChangeKind::None, ChangeKind::None) => (SyncKind::InSync, ChangeKind::None),
            (out, ChangeKind::None) => (SyncKind::Outgoing, out),
            (ChangeKind::None, inc) => (SyncKind::Incoming, inc),
            (out, _) => (SyncKind::Conflicting, out),
        };
        DiffNode {
            path,
            kind,
            change,
            local: Some(local),
            base: Some(base),
            remote: Some(remote),
        }
    }

    pub fn is_in_sync(&self) -> bool {
        self.kind == SyncKind::InSync
    }

    /// True if either the before or after side says the item is a
    /// container.
    pub fn is_container(&self) -> bool {
        [&self.base, &self.local, &self.remote]
            .into_iter()
            .flatten()
            .any(|s| s.container)
    }

    /// Check the model invariants: an in-sync node has no divergent
    /// descriptors, a conflicting node diverges on both sides.
    pub fn validate(&self) -> bool {
        let outgoing = self.diverges(|n| n.local.as_ref());
        let incoming = self.diverges(|n| n.remote.as_ref());
        match self.kind {
            SyncKind::InSync => !outgoing && !incoming,
            SyncKind::Outgoing => outgoing,
            SyncKind::Incoming => incoming,
            SyncKind::Conflicting => outgoing && incoming,
        }
    }

    fn diverges<'a>(&'a self, side: impl Fn(&'a DiffNode) -> Option<&'a VariantState>) -> bool {
        match (self.base.as_ref(), side(self)) {
            (Some(base), Some(side)) => side_change(base, side) != ChangeKind::None,
            _ => false,
        }
    }
}

fn side_change(base: &VariantState, side: &VariantState) -> ChangeKind {
    match (base.exists, side.exists) {
        (false, true) => ChangeKind::Addition,
        (true, false) => ChangeKind::Deletion,
        (false, false) => ChangeKind::None,
        (true, true) => {
            if compare_revisions(base.revision.as_deref(), side.revision.as_deref())
                == Ordering::Equal
            {
                ChangeKind::None
            } else {
                ChangeKind::Modification
            }
        }
    }
}

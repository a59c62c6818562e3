//! Collaborator boundaries — diff computation and resource resolution
//!
//! Both collaborators are injected capabilities. The engine never talks
//! to a version-control backend directly; it consumes batches produced
//! by a [`DiffComputer`] and resolves nodes to storage locations through
//! a [`ResourceResolver`]. Tests drive the engine with scripted fakes.

use async_trait::async_trait;

use drift_core::{BatchEntry, CancelToken, DiffNode, SyncPath};

/// Computes fresh diff state for a set of root mappings.
///
/// Implementations should poll the token between items and may return
/// early with whatever they have when cancelled; the caller discards
/// the batch in that case. A returned error is recoverable: the caller
/// logs it and leaves the prior tree state untouched.
#[async_trait]
pub trait DiffComputer: Send + Sync {
    async fn compute(
        &self,
        mappings: &[SyncPath],
        token: &CancelToken,
    ) -> anyhow::Result<Vec<BatchEntry>>;
}

/// External storage location a diff node resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub path: SyncPath,
    pub container: bool,
}

/// Resolves a diff node to the item it describes.
pub trait ResourceResolver: Send + Sync {
    fn resolve(&self, node: &DiffNode) -> Option<Resource>;
}

/// Resolver that derives the location from the node's own descriptors.
///
/// When the sides disagree on existence the pre-change state wins: base
/// first, then local, then remote. A node with no descriptors at all
/// (an in-sync placeholder) resolves to a container at its own path.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateResolver;

impl ResourceResolver for StateResolver {
    fn resolve(&self, node: &DiffNode) -> Option<Resource> {
        let state = [&node.base, &node.local, &node.remote]
            .into_iter()
            .flatten()
            .find(|s| s.exists)
            .or(node.base.as_ref())
            .or(node.local.as_ref())
            .or(node.remote.as_ref());
        match state {
            Some(state) => Some(Resource {
                path: node.path.clone(),
                container: state.container,
            }),
            None => Some(Resource {
                path: node.path.clone(),
                container: true,
            }),
        }
    }
}

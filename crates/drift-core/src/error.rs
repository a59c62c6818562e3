//! Error taxonomy for the diff tree engine

use thiserror::Error;

use crate::path::SyncPath;

pub type Result<T> = std::result::Result<T, DriftError>;

#[derive(Debug, Error)]
pub enum DriftError {
    /// A path was addressed outside the roots declared by the scope.
    /// Contract violation: surfaced to the caller, never silently dropped.
    #[error("path `{0}` is outside the synchronization scope")]
    OutOfScope(SyncPath),

    /// Removal or update of a path that has no node.
    #[error("no entry at path `{0}`")]
    PathNotFound(SyncPath),

    /// The owning context was disposed; no further mutation is possible.
    #[error("synchronization context has been disposed")]
    Disposed,

    /// Upstream diff computation failed. The tree is left untouched.
    #[error("diff computation failed: {0}")]
    Computation(anyhow::Error),

    /// A cooperative cancellation checkpoint fired. Refresh reports
    /// cancellation as a normal outcome; this variant only propagates
    /// out of computations that check a token themselves.
    #[error("operation cancelled")]
    Cancelled,
}

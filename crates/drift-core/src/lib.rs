//! Drift Core — diff node model, path index, and the live diff tree

pub mod error;
pub mod events;
pub mod model;
pub mod monitor;
pub mod path;
pub mod revision;
pub mod scope;
pub mod tree;


pub use error::{DriftError, Result};
pub use events::{ListenerHandle, ListenerSet, OutputListener, PathDelta, TreeListener};
pub use model::{ChangeKind, DiffNode, SyncKind, VariantState};
pub use monitor::CancelToken;
pub use path::SyncPath;
pub use revision::compare_revisions;
pub use scope::SyncScope;
pub use tree::{BatchEntry, Depth, DiffTree};

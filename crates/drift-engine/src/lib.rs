//! Drift Engine — synchronization contexts, derived-data caching, and
//! filtered views over a live diff tree

pub mod cache;
pub mod collab;
pub mod collector;
pub mod context;
pub mod set;

#[cfg(test)]
pub mod tests;

pub use cache::DiffCache;
pub use collab::{DiffComputer, Resource, ResourceResolver, StateResolver};
pub use collector::{AcceptAll, SyncFilter, SyncInfoCollector, filter_fn};
pub use context::{RefreshOutcome, SyncContext, Traversal};
pub use set::SyncSet;

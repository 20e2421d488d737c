//! Shared-store seam for the bricksync agent.
//!
//! The reconciliation engine never talks to a concrete key-value store; it
//! goes through the [`StateStore`] trait defined here. Records are plain
//! string values at hierarchical slash-separated paths, every write may
//! carry a lease, and per-path mutual-exclusion locks are the only
//! cross-agent coordination primitive.

pub mod error;
pub mod mem;
pub mod store;

pub use error::StoreError;
pub use mem::MemStore;
pub use store::{StateStore, StoreLock, WriteOptions};

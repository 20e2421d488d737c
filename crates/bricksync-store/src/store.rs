//! Abstract store interface consumed by the reconciliation engine.
//!
//! This module defines the [`StateStore`] and [`StoreLock`] traits that
//! decouple the engine from any particular distributed key-value backend.
//! The in-memory backend in [`crate::mem`] implements them; a production
//! deployment substitutes a networked client behind the same trait.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;

/// Options applied to a single write.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Lease attached to the record. `None` writes without expiry.
    pub ttl: Option<Duration>,
    /// Fail with `AlreadyExists` instead of overwriting an existing key.
    pub create_only: bool,
}

impl WriteOptions {
    /// Write with a lease of `ttl`.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            create_only: false,
        }
    }

    /// Create-only write without a lease.
    pub fn create_only() -> Self {
        Self {
            ttl: None,
            create_only: true,
        }
    }
}

/// Shared distributed store as seen by the agent.
///
/// All paths are slash-separated and globally unique per entity, so
/// concurrent agents writing different entities never conflict. A record
/// written with a lease disappears once the lease expires without a
/// rewrite; that absence is the defined signal for out-of-band deletion.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read the value at `path`.
    ///
    /// Returns `StoreError::NotFound` when the path does not exist or its
    /// lease has expired.
    async fn read(&self, path: &str) -> StoreResult<String>;

    /// Read all live records whose path starts with `prefix`, in path order.
    async fn read_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, String)>>;

    /// Write `value` at `path` subject to `opts`.
    ///
    /// A create-only write on an existing key returns
    /// `StoreError::AlreadyExists`; callers that use the marker idiom treat
    /// that as a benign no-op.
    async fn write(&self, path: &str, value: &str, opts: WriteOptions) -> StoreResult<()>;

    /// Acquire the mutual-exclusion lock scoped to `path`, blocking until
    /// it is free or the current holder's lease expires.
    ///
    /// The lock itself carries `lease` so a crashed holder cannot deadlock
    /// the cluster. The returned guard releases on drop.
    async fn lock(&self, path: &str, lease: Duration) -> StoreResult<Box<dyn StoreLock>>;
}

/// Guard for an acquired store lock.
///
/// Implementations must release the lock from `Drop`, so that every exit
/// path (normal, early return, panic unwind) gives the lock back.
pub trait StoreLock: Send {
    /// Release the lock. Idempotent; also invoked by `Drop`.
    fn release(&mut self);

    /// Whether this guard still holds the lock.
    fn is_held(&self) -> bool;
}

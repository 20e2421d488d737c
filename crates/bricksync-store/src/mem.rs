//! In-memory store with lease expiry and a per-path lock table.
//!
//! Time is a logical clock advanced explicitly through
//! [`MemStore::advance`], so lease behavior is deterministic under test.
//! A long-running process that embeds this store drives the clock itself
//! (the agent binary ticks it once per second).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store::{StateStore, StoreLock, WriteOptions};

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<u64>,
}

#[derive(Debug, Clone)]
struct LockEntry {
    owner: Uuid,
    expires_at: u64,
}

#[derive(Debug, Default)]
struct MemInner {
    now_secs: u64,
    entries: BTreeMap<String, Entry>,
    locks: HashMap<String, LockEntry>,
}

impl MemInner {
    fn purge_expired(&mut self) {
        let now = self.now_secs;
        self.entries
            .retain(|_, e| e.expires_at.map(|at| at > now).unwrap_or(true));
        self.locks.retain(|_, l| l.expires_at > now);
    }
}

/// In-memory [`StateStore`] implementation.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    inner: Arc<Mutex<MemInner>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the logical clock, expiring leases and stale locks.
    pub fn advance(&self, d: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.now_secs += d.as_secs();
        inner.purge_expired();
    }

    /// Current logical time in seconds.
    pub fn now_secs(&self) -> u64 {
        self.inner.lock().unwrap().now_secs
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.purge_expired();
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the lock at `path` is currently held.
    pub fn lock_held(&self, path: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.purge_expired();
        inner.locks.contains_key(path)
    }
}

#[async_trait]
impl StateStore for MemStore {
    async fn read(&self, path: &str) -> StoreResult<String> {
        let mut inner = self.inner.lock().unwrap();
        inner.purge_expired();
        inner
            .entries
            .get(path)
            .map(|e| e.value.clone())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn read_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, String)>> {
        let mut inner = self.inner.lock().unwrap();
        inner.purge_expired();
        Ok(inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect())
    }

    async fn write(&self, path: &str, value: &str, opts: WriteOptions) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.purge_expired();
        if opts.create_only && inner.entries.contains_key(path) {
            return Err(StoreError::AlreadyExists(path.to_string()));
        }
        let expires_at = opts.ttl.map(|t| inner.now_secs + t.as_secs());
        inner.entries.insert(
            path.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn lock(&self, path: &str, lease: Duration) -> StoreResult<Box<dyn StoreLock>> {
        let owner = Uuid::new_v4();
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                inner.purge_expired();
                if !inner.locks.contains_key(path) {
                    let expires_at = inner.now_secs + lease.as_secs();
                    inner
                        .locks
                        .insert(path.to_string(), LockEntry { owner, expires_at });
                    return Ok(Box::new(MemLock {
                        inner: self.inner.clone(),
                        path: path.to_string(),
                        owner,
                        held: true,
                    }));
                }
            }
            tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
        }
    }
}

/// Guard for a lock acquired from a [`MemStore`].
pub struct MemLock {
    inner: Arc<Mutex<MemInner>>,
    path: String,
    owner: Uuid,
    held: bool,
}

impl StoreLock for MemLock {
    fn release(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.locks.get(&self.path) {
            if entry.owner == self.owner {
                inner.locks.remove(&self.path);
            }
        }
    }

    fn is_held(&self) -> bool {
        self.held
    }
}

impl Drop for MemLock {
    fn drop(&mut self) {
        self.release();
    }
}

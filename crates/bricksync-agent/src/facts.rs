//! Flat cluster-fact snapshots and indexed iteration over them.
//!
//! The external extraction tool reports facts as dotted, 1-based indexed
//! keys (`volume1.brick2.status`). Instances are contiguous: the first
//! missing index terminates the series. [`FactMap::indexed`] turns that
//! implicit convention into a concrete index list so builders never probe
//! past the end.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactMap {
    inner: HashMap<String, String>,
}

impl FactMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key).map(|s| s.as_str())
    }

    /// Missing optional fields resolve to an empty string, never an error.
    pub fn get_or_empty(&self, key: &str) -> String {
        self.inner.get(key).cloned().unwrap_or_default()
    }

    /// Parse a numeric field. `None` when absent or not an integer.
    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.inner.get(key).and_then(|v| v.trim().parse().ok())
    }

    /// Contiguous 1-based indices `i` for which `"{prefix}{i}.{probe}"`
    /// exists. The first missing index ends the series.
    pub fn indexed(&self, prefix: &str, probe: &str) -> Vec<usize> {
        let mut indices = Vec::new();
        let mut i = 1;
        while self.inner.contains_key(&format!("{}{}.{}", prefix, i, probe)) {
            indices.push(i);
            i += 1;
        }
        indices
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FactMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            inner: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// One cycle's worth of raw facts: the detail map and the volume-options
/// map (the extraction tool is invoked once for each).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactSnapshot {
    pub details: FactMap,
    pub options: FactMap,
}

/// Source of raw cluster facts, one snapshot per reconciliation cycle.
#[async_trait]
pub trait FactSource: Send + Sync {
    async fn snapshot(&self) -> SyncResult<FactSnapshot>;
}

/// Fixed snapshot, for tests and single-shot runs.
#[derive(Debug, Clone, Default)]
pub struct StaticFacts(pub FactSnapshot);

#[async_trait]
impl FactSource for StaticFacts {
    async fn snapshot(&self) -> SyncResult<FactSnapshot> {
        Ok(self.0.clone())
    }
}

/// Reads already-flattened `key = value` lines from two files (the detail
/// dump and the volume-options dump). Parsing the extraction tool's native
/// sectioned format stays outside this crate; this reader only consumes
/// its flattened form.
#[derive(Debug, Clone)]
pub struct FileFactSource {
    pub detail_path: PathBuf,
    pub options_path: PathBuf,
}

impl FileFactSource {
    pub fn new(detail_path: PathBuf, options_path: PathBuf) -> Self {
        Self {
            detail_path,
            options_path,
        }
    }

    fn parse(contents: &str) -> FactMap {
        let mut map = FactMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                map.insert(key.trim(), value.trim());
            }
        }
        map
    }
}

#[async_trait]
impl FactSource for FileFactSource {
    async fn snapshot(&self) -> SyncResult<FactSnapshot> {
        let details = tokio::fs::read_to_string(&self.detail_path)
            .await
            .map_err(|e| SyncError::FactSource(format!("{}: {}", self.detail_path.display(), e)))?;
        let options = tokio::fs::read_to_string(&self.options_path)
            .await
            .map_err(|e| SyncError::FactSource(format!("{}: {}", self.options_path.display(), e)))?;
        Ok(FactSnapshot {
            details: Self::parse(&details),
            options: Self::parse(&options),
        })
    }
}

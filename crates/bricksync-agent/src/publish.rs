//! Record publishing with per-entity lease accounting.

use std::time::Duration;

use serde::Serialize;

use bricksync_store::WriteOptions;

use crate::config::AgentConfig;
use crate::context::AgentContext;

/// Lease accounting for one pass.
///
/// The pass visits entities sequentially, so a record written early must
/// outlive the tail of the pass plus the next interval: the budget starts
/// at interval + pad and grows a fixed step per entity visited. Volume
/// scoped records get an extra pad on top of the running budget.
#[derive(Debug, Clone)]
pub struct LeaseBudget {
    current_secs: u64,
    sync_interval_secs: u64,
    volume_pad_secs: u64,
    peer_step_secs: u64,
    volume_step_secs: u64,
    brick_step_secs: u64,
    snapshot_step_secs: u64,
}

impl LeaseBudget {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            current_secs: config.sync_interval_secs + config.lease_pad_secs,
            sync_interval_secs: config.sync_interval_secs,
            volume_pad_secs: config.volume_lease_pad_secs,
            peer_step_secs: config.peer_lease_step_secs,
            volume_step_secs: config.volume_lease_step_secs,
            brick_step_secs: config.brick_lease_step_secs,
            snapshot_step_secs: config.snapshot_lease_step_secs,
        }
    }

    /// Lease for the next peer record; grows the budget first so later
    /// peers get proportionally longer leases.
    pub fn peer_lease(&mut self) -> Duration {
        self.current_secs += self.peer_step_secs;
        Duration::from_secs(self.current_secs)
    }

    /// Lease for the next volume and its options/rebalance records.
    pub fn volume_lease(&mut self) -> Duration {
        let lease = self.current_secs + self.volume_pad_secs;
        self.current_secs += self.volume_step_secs;
        Duration::from_secs(lease)
    }

    /// Lease for the next brick and its client records.
    pub fn brick_lease(&mut self) -> Duration {
        let lease = self.current_secs;
        self.current_secs += self.brick_step_secs;
        Duration::from_secs(lease)
    }

    /// Lease at the current budget, without consuming any step.
    pub fn base_lease(&self) -> Duration {
        Duration::from_secs(self.current_secs)
    }

    /// Lease for cluster-wide aggregate records.
    pub fn aggregate_lease(&self) -> Duration {
        Duration::from_secs(self.current_secs + self.volume_pad_secs)
    }

    /// Lease for snapshot records: scales with the volume count instead of
    /// the running budget.
    pub fn snapshot_lease(&self, volume_count: usize) -> Duration {
        Duration::from_secs(self.sync_interval_secs + self.snapshot_step_secs * volume_count as u64)
    }

    pub fn current_secs(&self) -> u64 {
        self.current_secs
    }
}

/// Best-effort record writer. A failed write is reported and skipped; the
/// pass never aborts because one record did not land.
pub struct Publisher<'a> {
    ctx: &'a AgentContext,
}

impl<'a> Publisher<'a> {
    pub fn new(ctx: &'a AgentContext) -> Self {
        Self { ctx }
    }

    /// Serialize `record` as JSON and write it at `path` under `lease`.
    /// Returns whether the write landed.
    pub async fn publish<T: Serialize>(&self, path: &str, record: &T, lease: Duration) -> bool {
        let value = match serde_json::to_string(record) {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(path, "failed to serialize record: {}", err);
                return false;
            }
        };
        self.write_raw(path, &value, Some(lease)).await
    }

    /// Write a bare string value, optionally under a lease.
    pub async fn write_raw(&self, path: &str, value: &str, lease: Option<Duration>) -> bool {
        let opts = match lease {
            Some(ttl) => WriteOptions::with_ttl(ttl),
            None => WriteOptions::default(),
        };
        match self.ctx.store.write(path, value, opts).await {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(path, "record write failed: {}", err);
                self.ctx.events.emit(crate::events::AlertEvent {
                    kind: "sync_error".to_string(),
                    current_value: String::new(),
                    message: format!("record write failed at {}: {}", path, err),
                    instance: format!("node_{}", self.ctx.node.fqdn),
                    severity: crate::events::Severity::Error,
                    tags: std::collections::HashMap::new(),
                });
                false
            }
        }
    }
}

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base reconciliation interval in seconds.
    pub sync_interval_secs: u64,
    /// Flat padding added to the base interval for every lease.
    pub lease_pad_secs: u64,
    /// Extra padding for volume-scoped records and cluster aggregates.
    pub volume_lease_pad_secs: u64,
    /// Lease growth per peer processed.
    pub peer_lease_step_secs: u64,
    /// Lease growth per volume processed.
    pub volume_lease_step_secs: u64,
    /// Lease growth per brick processed.
    pub brick_lease_step_secs: u64,
    /// Per-volume lease growth for snapshot records.
    pub snapshot_lease_step_secs: u64,
    /// Startup sleep ramps 1,2,..,this value before clamping to the interval.
    pub warmup_ramp_max_secs: u64,
    /// Lease on the per-hostname brick-sweep lock.
    pub sweep_lock_lease_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: 10,
            lease_pad_secs: 100,
            volume_lease_pad_secs: 350,
            peer_lease_step_secs: 5,
            volume_lease_step_secs: 1,
            brick_lease_step_secs: 4,
            snapshot_lease_step_secs: 4,
            warmup_ramp_max_secs: 6,
            sweep_lock_lease_secs: 60,
        }
    }
}

impl AgentConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: AgentConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: AgentConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }
}

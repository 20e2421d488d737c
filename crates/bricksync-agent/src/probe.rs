use std::ffi::CString;

use serde::{Deserialize, Serialize};

/// Usage summary for a brick's backing filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BrickUtilization {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub used_percent: f64,
}

impl BrickUtilization {
    pub fn from_counts(total_bytes: u64, used_bytes: u64) -> Self {
        let used_percent = if total_bytes == 0 {
            0.0
        } else {
            (used_bytes as f64 / total_bytes as f64) * 100.0
        };
        Self {
            total_bytes,
            used_bytes,
            used_percent,
        }
    }
}

/// Black-box filesystem utilization probe. `None` when the path cannot be
/// probed; the brick record is still published without utilization.
pub trait UtilizationProbe: Send + Sync {
    fn utilization(&self, path: &str) -> Option<BrickUtilization>;
}

/// statvfs-backed probe for the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatvfsProbe;

impl UtilizationProbe for StatvfsProbe {
    fn utilization(&self, path: &str) -> Option<BrickUtilization> {
        let c_path = CString::new(path).ok()?;
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if rc != 0 {
            return None;
        }
        let frsize = stat.f_frsize as u64;
        let total = stat.f_blocks as u64 * frsize;
        let free = stat.f_bfree as u64 * frsize;
        Some(BrickUtilization::from_counts(total, total.saturating_sub(free)))
    }
}

/// Probe returning a fixed answer, for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedProbe(pub Option<BrickUtilization>);

impl UtilizationProbe for FixedProbe {
    fn utilization(&self, _path: &str) -> Option<BrickUtilization> {
        self.0
    }
}

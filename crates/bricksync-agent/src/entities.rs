//! Typed entity records built fresh each cycle from the raw fact snapshot.
//!
//! Builders take the fact map plus a 1-based index and return `None` when
//! the identity key for that index is missing or a required numeric field
//! does not parse; siblings already built stay valid. Numeric fields are
//! parsed only where arithmetic needs them; everything else is kept as the
//! exact string the extraction tool reported.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::context::NodeIdentity;
use crate::facts::FactMap;
use crate::probe::BrickUtilization;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub uuid: String,
    pub hostname: String,
    pub state: String,
    pub connected: String,
}

impl Peer {
    pub fn from_facts(facts: &FactMap, index: usize) -> Option<Peer> {
        let uuid = facts.get(&format!("peer{}.uuid", index))?;
        Some(Peer {
            uuid: uuid.to_string(),
            hostname: facts.get_or_empty(&format!("peer{}.primary_hostname", index)),
            state: facts.get_or_empty(&format!("peer{}.state", index)),
            connected: facts.get_or_empty(&format!("peer{}.connected", index)),
        })
    }

    pub fn path(&self, cluster_id: &str) -> String {
        format!("clusters/{}/Peers/{}", cluster_id, self.uuid)
    }
}

/// Observed volume profiling state. Never sourced from facts: carried over
/// from the previously published record and corrected by the profiling
/// reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfilingState {
    Enabled,
    Disabled,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub name: String,
    /// Derived: any reported arbiter count forces `"arbiter"`.
    #[serde(rename = "type")]
    pub vol_type: String,
    pub transport_type: String,
    pub status: String,
    pub brick_count: u32,
    pub subvol_count: u32,
    pub arbiter_count: u32,
    pub snap_count: String,
    pub stripe_count: String,
    pub replica_count: String,
    pub disperse_count: String,
    pub redundancy_count: String,
    pub quorum_status: String,
    pub snapd_status: String,
    pub snapd_inited: String,
    pub deleted: bool,
    pub profiling_enabled: ProfilingState,
}

impl Volume {
    pub fn from_facts(facts: &FactMap, index: usize) -> Option<Volume> {
        let id = facts.get(&format!("volume{}.id", index))?;
        let brick_count = facts.get_u32(&format!("volume{}.brickcount", index))?;
        let subvol_count = facts.get_u32(&format!("volume{}.subvol_count", index))?;
        let arbiter_count = facts
            .get_u32(&format!("volume{}.arbiter_count", index))
            .unwrap_or(0);
        let raw_type = facts.get_or_empty(&format!("volume{}.type", index));
        Some(Volume {
            id: id.to_string(),
            name: facts.get_or_empty(&format!("volume{}.name", index)),
            vol_type: Self::effective_type(&raw_type, arbiter_count),
            transport_type: facts.get_or_empty(&format!("volume{}.transport_type", index)),
            status: facts.get_or_empty(&format!("volume{}.status", index)),
            brick_count,
            subvol_count,
            arbiter_count,
            snap_count: facts.get_or_empty(&format!("volume{}.snap_count", index)),
            stripe_count: facts.get_or_empty(&format!("volume{}.stripe_count", index)),
            replica_count: facts.get_or_empty(&format!("volume{}.replica_count", index)),
            disperse_count: facts.get_or_empty(&format!("volume{}.disperse_count", index)),
            redundancy_count: facts.get_or_empty(&format!("volume{}.redundancy_count", index)),
            quorum_status: facts.get_or_empty(&format!("volume{}.quorum_status", index)),
            snapd_status: facts.get_or_empty(&format!("volume{}.snapd_svc.online_status", index)),
            snapd_inited: facts.get_or_empty(&format!("volume{}.snapd_svc.inited", index)),
            deleted: false,
            profiling_enabled: ProfilingState::Unknown,
        })
    }

    pub fn effective_type(raw_type: &str, arbiter_count: u32) -> String {
        if arbiter_count > 0 {
            "arbiter".to_string()
        } else {
            raw_type.to_string()
        }
    }

    pub fn path(&self, cluster_id: &str) -> String {
        format!("clusters/{}/Volumes/{}", cluster_id, self.id)
    }

    pub fn options_path(cluster_id: &str, vol_id: &str) -> String {
        format!("clusters/{}/Volumes/{}/options", cluster_id, vol_id)
    }

    pub fn rebalance_path(cluster_id: &str, vol_id: &str) -> String {
        format!("clusters/{}/Volumes/{}/rebalance", cluster_id, vol_id)
    }

    pub fn alert_counter_path(cluster_id: &str, vol_id: &str) -> String {
        format!("clusters/{}/Volumes/{}/alert_counters", cluster_id, vol_id)
    }
}

/// Per-volume option key/value set, recomputed in full each cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeOptions {
    pub vol_id: String,
    pub options: BTreeMap<String, String>,
}

impl VolumeOptions {
    /// Collects `volume{i}.options.key{k}` / `value{k}` pairs; the reported
    /// count bounds the scan.
    pub fn from_facts(options_facts: &FactMap, index: usize, vol_id: &str) -> VolumeOptions {
        let mut options = BTreeMap::new();
        let count = options_facts
            .get_u32(&format!("volume{}.options.count", index))
            .unwrap_or(0);
        for k in 1..count {
            let key = options_facts.get(&format!("volume{}.options.key{}", index, k));
            let value = options_facts.get(&format!("volume{}.options.value{}", index, k));
            if let (Some(key), Some(value)) = (key, value) {
                options.insert(key.to_string(), value.to_string());
            }
        }
        VolumeOptions {
            vol_id: vol_id.to_string(),
            options,
        }
    }
}

/// Rebalance job facts for one volume, recomputed in full each cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceDetails {
    pub vol_id: String,
    pub rebal_id: String,
    pub status: String,
    pub failures: String,
    pub skipped: String,
    pub lookedup: String,
    pub files: String,
    pub data: String,
    pub time_left: Option<String>,
}

impl RebalanceDetails {
    pub fn from_facts(facts: &FactMap, index: usize, vol_id: &str) -> RebalanceDetails {
        let f = |suffix: &str| facts.get_or_empty(&format!("volume{}.rebalance.{}", index, suffix));
        RebalanceDetails {
            vol_id: vol_id.to_string(),
            rebal_id: f("id"),
            status: f("status"),
            failures: f("failures"),
            skipped: f("skipped"),
            lookedup: f("lookedup"),
            files: f("files"),
            data: f("data"),
            time_left: facts
                .get(&format!("volume{}.rebalance.time_left", index))
                .map(|s| s.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brick {
    pub fqdn: String,
    pub brick_dir: String,
    pub name: String,
    pub vol_id: String,
    pub vol_name: String,
    pub sequence_number: u32,
    pub brick_path: String,
    pub hostname: String,
    pub port: String,
    pub status: String,
    pub filesystem_type: String,
    pub mount_opts: String,
    pub utilization: Option<BrickUtilization>,
    pub client_count: u32,
    pub is_arbiter: String,
    pub node_id: String,
    pub used: bool,
}

impl Brick {
    /// Flat brick name and directory derived from the reported path.
    /// `host:/data/brick1` becomes name `{fqdn}:_data_brick1` and
    /// directory `data_brick1`.
    pub fn name_parts(fqdn: &str, raw_path: &str) -> (String, String) {
        let dir_part = raw_path.rsplit(':').next().unwrap_or(raw_path);
        let flat = dir_part.replace('/', "_");
        let name = format!("{}:{}", fqdn, flat);
        let dir = flat.trim_start_matches('_').to_string();
        (name, dir)
    }

    /// Builds the brick at `volume{vol_index}.brick{brick_index}` for the
    /// local node. Ownership (hostname vs. local identity) is the caller's
    /// check; this only shapes the record.
    pub fn from_facts(
        facts: &FactMap,
        vol_index: usize,
        brick_index: usize,
        vol: &Volume,
        node: &NodeIdentity,
        utilization: Option<BrickUtilization>,
    ) -> Option<Brick> {
        let key = |suffix: &str| format!("volume{}.brick{}.{}", vol_index, brick_index, suffix);
        let hostname = facts.get(&key("hostname"))?;
        let brick_path = facts.get(&key("path"))?;
        let (name, brick_dir) = Self::name_parts(&node.fqdn, brick_path);
        Some(Brick {
            fqdn: node.fqdn.clone(),
            brick_dir,
            name,
            vol_id: vol.id.clone(),
            vol_name: vol.name.clone(),
            sequence_number: brick_index as u32,
            brick_path: brick_path.to_string(),
            hostname: hostname.to_string(),
            port: facts.get_or_empty(&key("port")),
            status: facts.get_or_empty(&key("status")),
            filesystem_type: facts.get_or_empty(&key("filesystem_type")),
            mount_opts: facts.get_or_empty(&key("mount_options")),
            utilization,
            client_count: facts.get_u32(&key("client_count")).unwrap_or(0),
            is_arbiter: facts.get_or_empty(&key("is_arbiter")),
            node_id: node.node_id.clone(),
            used: true,
        })
    }

    /// Subvolume this brick belongs to: `(seq - 1) / (bricks per subvol)`.
    pub fn subvolume_index(sequence_number: u32, brick_count: u32, subvol_count: u32) -> u32 {
        if subvol_count == 0 || brick_count < subvol_count {
            return 0;
        }
        let per_subvol = brick_count / subvol_count;
        (sequence_number - 1) / per_subvol
    }

    pub fn path(&self, cluster_id: &str) -> String {
        format!(
            "clusters/{}/Bricks/all/{}/{}",
            cluster_id, self.fqdn, self.brick_dir
        )
    }

    /// Subvolume-partitioned membership marker path, so layout is readable
    /// without recomputation.
    pub fn subvolume_path(&self, cluster_id: &str, vol: &Volume) -> String {
        let subvol =
            Self::subvolume_index(self.sequence_number, vol.brick_count, vol.subvol_count);
        format!(
            "clusters/{}/Volumes/{}/Bricks/subvolume{}/{}",
            cluster_id, vol.id, subvol, self.name
        )
    }
}

/// One client connected to a brick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConnection {
    pub brick_name: String,
    pub fqdn: String,
    pub brick_dir: String,
    pub hostname: String,
    pub bytesread: String,
    pub byteswrite: String,
    pub opversion: String,
}

impl ClientConnection {
    pub fn from_facts(
        facts: &FactMap,
        vol_index: usize,
        brick_index: usize,
        client_index: usize,
        brick: &Brick,
    ) -> Option<ClientConnection> {
        let key = |suffix: &str| {
            format!(
                "volume{}.brick{}.client{}.{}",
                vol_index, brick_index, client_index, suffix
            )
        };
        let hostname = facts.get(&key("hostname"))?;
        Some(ClientConnection {
            brick_name: brick.name.clone(),
            fqdn: brick.fqdn.clone(),
            brick_dir: brick.brick_dir.clone(),
            hostname: hostname.to_string(),
            bytesread: facts.get_or_empty(&key("bytesread")),
            byteswrite: facts.get_or_empty(&key("byteswrite")),
            opversion: facts.get_or_empty(&key("opversion")),
        })
    }

    pub fn path(&self, cluster_id: &str, client_index: usize) -> String {
        format!(
            "clusters/{}/ClientConnections/{}/{}/{}",
            cluster_id, self.fqdn, self.brick_dir, client_index
        )
    }
}

/// Geo-replication session reported for a volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoRepSession {
    pub vol_id: String,
    pub session_id: String,
    pub slave: String,
    pub status: String,
    pub pairs: u32,
}

impl GeoRepSession {
    pub fn from_facts(
        facts: &FactMap,
        vol_index: usize,
        session_index: usize,
        vol_id: &str,
    ) -> Option<GeoRepSession> {
        let key = |suffix: &str| format!("volume{}.georep{}.{}", vol_index, session_index, suffix);
        let session_id = facts.get(&key("id"))?;
        Some(GeoRepSession {
            vol_id: vol_id.to_string(),
            session_id: session_id.to_string(),
            slave: facts.get_or_empty(&key("slave")),
            status: facts.get_or_empty(&key("status")),
            pairs: facts.get_u32(&key("pairs")).unwrap_or(0),
        })
    }

    pub fn path(&self, cluster_id: &str) -> String {
        format!(
            "clusters/{}/GeoRepSessions/{}/{}",
            cluster_id, self.vol_id, self.session_id
        )
    }
}

/// Snapshot reported for a volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSnapshot {
    pub vol_id: String,
    pub snap_id: String,
    pub name: String,
    pub status: String,
}

impl VolumeSnapshot {
    pub fn from_facts(
        facts: &FactMap,
        vol_index: usize,
        snap_index: usize,
        vol_id: &str,
    ) -> Option<VolumeSnapshot> {
        let key = |suffix: &str| format!("volume{}.snapshot{}.{}", vol_index, snap_index, suffix);
        let snap_id = facts.get(&key("id"))?;
        Some(VolumeSnapshot {
            vol_id: vol_id.to_string(),
            snap_id: snap_id.to_string(),
            name: facts.get_or_empty(&key("name")),
            status: facts.get_or_empty(&key("status")),
        })
    }

    pub fn path(&self, cluster_id: &str) -> String {
        format!(
            "clusters/{}/Volumes/{}/Snapshots/{}",
            cluster_id, self.vol_id, self.snap_id
        )
    }
}

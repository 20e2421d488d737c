//! Cluster-wide rollups, executed only on the provisioner agent so a
//! single writer owns every aggregate record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::context::AgentContext;
use crate::entities::{Brick, GeoRepSession, RebalanceDetails, Volume, VolumeSnapshot};
use crate::probe::BrickUtilization;
use crate::publish::{LeaseBudget, Publisher};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalDetails {
    pub status: String,
    pub volume_count: u32,
    pub volume_up_count: u32,
    pub volume_down_count: u32,
    pub peer_count: u32,
    pub client_count: u32,
    /// Longest reported rebalance time-left across volumes, seconds.
    pub rebalance_estimate_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoRepSummary {
    pub session_count: u32,
    pub faulty_count: u32,
}

/// Overall cluster health from the per-volume view: every non-deleted
/// volume started means healthy, anything else degrades the cluster.
pub fn cluster_status(volumes: &[Volume]) -> (String, u32, u32) {
    let live: Vec<&Volume> = volumes.iter().filter(|v| !v.deleted).collect();
    let up = live.iter().filter(|v| v.status == "Started").count() as u32;
    let down = live.len() as u32 - up;
    let status = if down == 0 { "healthy" } else { "degraded" };
    (status.to_string(), up, down)
}

/// One aggregation pass over this cycle's entities plus the cluster-wide
/// brick inventory read back from the store (bricks are published per
/// node, so the store is the only complete view).
pub async fn sync_cluster_aggregates(
    ctx: &AgentContext,
    volumes: &[Volume],
    rebalances: &[RebalanceDetails],
    snapshots: &[VolumeSnapshot],
    peer_count: usize,
    budget: &LeaseBudget,
) {
    let publisher = Publisher::new(ctx);
    let lease = budget.aggregate_lease();

    let bricks = load_all_bricks(ctx).await;

    // per-volume utilization and client rollups
    let mut vol_util: BTreeMap<String, (u64, u64)> = BTreeMap::new();
    let mut vol_clients: BTreeMap<String, u32> = BTreeMap::new();
    let mut total = (0u64, 0u64);
    let mut total_clients = 0u32;
    for brick in &bricks {
        if let Some(u) = brick.utilization {
            let entry = vol_util.entry(brick.vol_id.clone()).or_default();
            entry.0 += u.total_bytes;
            entry.1 += u.used_bytes;
            total.0 += u.total_bytes;
            total.1 += u.used_bytes;
        }
        *vol_clients.entry(brick.vol_id.clone()).or_default() += brick.client_count;
        total_clients += brick.client_count;
    }

    for (vol_id, (total_bytes, used_bytes)) in &vol_util {
        let path = ctx.cluster_key(&format!("Volumes/{}/utilization", vol_id));
        let record = BrickUtilization::from_counts(*total_bytes, *used_bytes);
        publisher.publish(&path, &record, lease).await;
    }
    for (vol_id, count) in &vol_clients {
        let path = ctx.cluster_key(&format!("Volumes/{}/client_count", vol_id));
        publisher.write_raw(&path, &count.to_string(), Some(lease)).await;
    }
    let cluster_util = BrickUtilization::from_counts(total.0, total.1);
    publisher
        .publish(&ctx.cluster_key("Utilization"), &cluster_util, lease)
        .await;

    // rebalance estimates
    let mut rebalance_estimate_secs = 0u64;
    for rebal in rebalances {
        if let Some(secs) = rebal.time_left.as_deref().and_then(|t| t.parse::<u64>().ok()) {
            rebalance_estimate_secs = rebalance_estimate_secs.max(secs);
            let path = ctx.cluster_key(&format!(
                "Volumes/{}/estimated_rebalance_time",
                rebal.vol_id
            ));
            publisher.write_raw(&path, &secs.to_string(), Some(lease)).await;
        }
    }

    // geo-replication session rollup
    let sessions = load_georep_sessions(ctx).await;
    let summary = GeoRepSummary {
        session_count: sessions.len() as u32,
        faulty_count: sessions
            .iter()
            .filter(|s| s.status.eq_ignore_ascii_case("faulty"))
            .count() as u32,
    };
    publisher
        .publish(&ctx.cluster_key("GeoRepStatus"), &summary, lease)
        .await;

    // snapshot sync, lease scaled by volume count
    let live_volumes = volumes.iter().filter(|v| !v.deleted).count();
    let snap_lease = budget.snapshot_lease(live_volumes);
    let mut snap_counts: BTreeMap<String, u32> = BTreeMap::new();
    for snap in snapshots {
        publisher
            .publish(&snap.path(&ctx.cluster_id), snap, snap_lease)
            .await;
        *snap_counts.entry(snap.vol_id.clone()).or_default() += 1;
    }
    for (vol_id, count) in &snap_counts {
        let path = ctx.cluster_key(&format!("Volumes/{}/snapshot_count", vol_id));
        publisher
            .write_raw(&path, &count.to_string(), Some(snap_lease))
            .await;
    }

    // overall cluster record last, once the parts above have landed
    let (status, up, down) = cluster_status(volumes);
    let details = GlobalDetails {
        status,
        volume_count: up + down,
        volume_up_count: up,
        volume_down_count: down,
        peer_count: peer_count as u32,
        client_count: total_clients,
        rebalance_estimate_secs,
    };
    publisher
        .publish(&ctx.cluster_key("GlobalDetails"), &details, lease)
        .await;
}

async fn load_all_bricks(ctx: &AgentContext) -> Vec<Brick> {
    let prefix = ctx.cluster_key("Bricks/all/");
    let entries = match ctx.store.read_prefix(&prefix).await {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!("brick inventory read failed: {}", err);
            return Vec::new();
        }
    };
    entries
        .into_iter()
        .filter(|(_, raw)| !raw.is_empty()) // subtree markers carry no record
        .filter_map(|(path, raw)| match serde_json::from_str(&raw) {
            Ok(brick) => Some(brick),
            Err(err) => {
                tracing::warn!(path, "skipping malformed brick record: {}", err);
                None
            }
        })
        .collect()
}

async fn load_georep_sessions(ctx: &AgentContext) -> Vec<GeoRepSession> {
    let prefix = ctx.cluster_key("GeoRepSessions/");
    let entries = match ctx.store.read_prefix(&prefix).await {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!("georep session read failed: {}", err);
            return Vec::new();
        }
    };
    entries
        .into_iter()
        .filter_map(|(path, raw)| match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(err) => {
                tracing::warn!(path, "skipping malformed georep record: {}", err);
                None
            }
        })
        .collect()
}

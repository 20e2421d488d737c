//! The reconciliation loop: one full extract-build-detect-alert-publish
//! pass per tick, self-adjusting sleep, shutdown checked between cycles.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use bricksync_store::{StoreError, WriteOptions};

use crate::aggregates;
use crate::alerts::{AlertCoordinator, RESOURCE_TYPE_BRICK, RESOURCE_TYPE_VOLUME};
use crate::context::AgentContext;
use crate::entities::{
    Brick, ClientConnection, GeoRepSession, Peer, ProfilingState, RebalanceDetails, Volume,
    VolumeOptions, VolumeSnapshot,
};
use crate::error::SyncResult;
use crate::facts::{FactMap, FactSnapshot, FactSource};
use crate::profiling;
use crate::publish::{LeaseBudget, Publisher};
use crate::transitions::{brick_severity, classify, peer_severity, volume_severity, Transition};

pub struct ReconciliationLoop {
    ctx: Arc<AgentContext>,
    facts: Arc<dyn FactSource>,
    shutdown: watch::Receiver<bool>,
}

/// Warm-up sleep ramp: 1,2,..,ramp_max, then the configured interval.
fn next_sleep_secs(previous: u64, ramp_max: u64, interval: u64) -> u64 {
    if previous >= ramp_max {
        interval
    } else {
        previous + 1
    }
}

impl ReconciliationLoop {
    pub fn new(
        ctx: Arc<AgentContext>,
        facts: Arc<dyn FactSource>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ctx,
            facts,
            shutdown,
        }
    }

    /// Run until the shutdown signal flips. A cycle in progress always
    /// completes; the signal is only checked between cycles.
    pub async fn run(&mut self) {
        tracing::info!(cluster = %self.ctx.cluster_id, "reconciliation loop running");
        self.setup().await;

        let mut sleep_secs = 0u64;
        while !*self.shutdown.borrow() {
            sleep_secs = next_sleep_secs(
                sleep_secs,
                self.ctx.config.warmup_ramp_max_secs,
                self.ctx.config.sync_interval_secs,
            );

            if let Err(err) = self.run_once().await {
                AlertCoordinator::new(&self.ctx)
                    .error(format!("cluster state sync error: {}", err));
            }

            let sleep = tokio::time::sleep(Duration::from_secs(sleep_secs));
            tokio::pin!(sleep);
            tokio::select! {
                _ = &mut sleep => {}
                _ = self.shutdown.changed() => {}
            }
        }

        tracing::debug!("reconciliation loop complete");
    }

    /// One-time bootstrap: publish this node's brick subtree marker and,
    /// if nobody has recorded the cluster network yet, this node's subnet.
    async fn setup(&self) {
        let marker = self
            .ctx
            .cluster_key(&format!("Bricks/all/{}", self.ctx.node.fqdn));
        if let Err(err) = self
            .ctx
            .store
            .write(&marker, "", WriteOptions::default())
            .await
        {
            AlertCoordinator::new(&self.ctx)
                .error(format!("failed to publish brick dir marker: {}", err));
        }

        let network_key = self.ctx.cluster_key("cluster_network");
        if self.ctx.store.read(&network_key).await.is_err() {
            if let Some(subnet) = self.ctx.node.ipv4_addrs.first().and_then(|a| ipv4_subnet(a)) {
                if let Err(err) = self
                    .ctx
                    .store
                    .write(&network_key, &subnet, WriteOptions::default())
                    .await
                {
                    AlertCoordinator::new(&self.ctx)
                        .error(format!("failed to sync cluster network details: {}", err));
                }
            }
        }
    }

    /// One reconciliation cycle.
    pub async fn run_once(&self) -> SyncResult<()> {
        // a cluster whose import failed is not ours to touch
        if let Ok(status) = self
            .ctx
            .store
            .read(&self.ctx.cluster_key("import_status"))
            .await
        {
            if status == "failed" {
                return Ok(());
            }
        }

        // first writer wins; an existing marker is a benign no-op
        match self
            .ctx
            .store
            .write(
                &self.ctx.cluster_key("sync_status"),
                "in_progress",
                WriteOptions::create_only(),
            )
            .await
        {
            Ok(()) | Err(StoreError::AlreadyExists(_)) => {}
            Err(err) => return Err(err.into()),
        }

        let snapshot = self.facts.snapshot().await?;
        let mut budget = LeaseBudget::new(&self.ctx.config);
        let publisher = Publisher::new(&self.ctx);
        publisher
            .publish(
                &self.ctx.cluster_key("raw_state"),
                &snapshot.details,
                budget.base_lease(),
            )
            .await;

        let (peer_count, disconnected) = self.sync_peers(&snapshot.details, &mut budget).await;

        // a disconnected peer's bricks stop silently; sweep them
        let alerts = AlertCoordinator::new(&self.ctx);
        for hostname in &disconnected {
            alerts.brick_status_sweep(hostname).await;
        }

        let (volumes, rebalances, snapshots) = self.sync_volumes(&snapshot, &mut budget).await;

        if self.ctx.is_provisioner() {
            aggregates::sync_cluster_aggregates(
                &self.ctx,
                &volumes,
                &rebalances,
                &snapshots,
                peer_count,
                &budget,
            )
            .await;
        }

        self.mark_done(&volumes).await?;

        if self.ctx.is_provisioner() {
            profiling::reconcile_profiling(&self.ctx, &volumes).await;
        }

        Ok(())
    }

    async fn sync_peers(&self, facts: &FactMap, budget: &mut LeaseBudget) -> (usize, Vec<String>) {
        let publisher = Publisher::new(&self.ctx);
        let alerts = AlertCoordinator::new(&self.ctx);
        let mut disconnected = Vec::new();
        let mut peer_count = 0;

        for i in facts.indexed("peer", "uuid") {
            let Some(peer) = Peer::from_facts(facts, i) else {
                continue;
            };
            let path = peer.path(&self.ctx.cluster_id);

            if let Transition::Changed { old, new } =
                classify(self.ctx.store.as_ref(), &path, "connected", &peer.connected).await
            {
                let message = format!(
                    "Status of peer: {} in cluster {} changed from {} to {}",
                    peer.hostname, self.ctx.cluster_id, old, new
                );
                let instance = format!("peer_{}", peer.hostname);
                alerts.raise(
                    "peer_status",
                    &new,
                    message,
                    instance,
                    peer_severity(&new),
                    HashMap::new(),
                );
                if new.eq_ignore_ascii_case("disconnected") {
                    disconnected.push(peer.hostname.clone());
                }
            }

            publisher.publish(&path, &peer, budget.peer_lease()).await;
            peer_count += 1;
        }

        (peer_count, disconnected)
    }

    async fn sync_volumes(
        &self,
        snapshot: &FactSnapshot,
        budget: &mut LeaseBudget,
    ) -> (Vec<Volume>, Vec<RebalanceDetails>, Vec<VolumeSnapshot>) {
        let publisher = Publisher::new(&self.ctx);
        let alerts = AlertCoordinator::new(&self.ctx);
        let facts = &snapshot.details;
        let provisioner = self.ctx.is_provisioner();

        let mut volumes = Vec::new();
        let mut rebalances = Vec::new();
        let mut snaps = Vec::new();

        for i in facts.indexed("volume", "id") {
            let Some(mut vol) = Volume::from_facts(facts, i) else {
                tracing::warn!(index = i, "skipping malformed volume facts");
                continue;
            };
            let vol_path = vol.path(&self.ctx.cluster_id);
            let lease = budget.volume_lease();

            if provisioner {
                if let Transition::Changed { old, new } =
                    classify(self.ctx.store.as_ref(), &vol_path, "status", &vol.status).await
                {
                    let message = format!(
                        "Status of volume: {} in cluster {} changed from {} to {}",
                        vol.name, self.ctx.cluster_id, old, new
                    );
                    let instance = format!("volume_{}", vol.name);
                    let mut tags = HashMap::new();
                    tags.insert("entity_type".to_string(), RESOURCE_TYPE_VOLUME.to_string());
                    tags.insert("volume_name".to_string(), vol.name.clone());
                    alerts.raise(
                        "volume_status",
                        &new,
                        message,
                        instance,
                        volume_severity(&new),
                        tags,
                    );
                }

                vol.profiling_enabled = self.stored_profiling_state(&vol_path).await;
                publisher.publish(&vol_path, &vol, lease).await;

                let options = VolumeOptions::from_facts(&snapshot.options, i, &vol.id);
                publisher
                    .publish(
                        &Volume::options_path(&self.ctx.cluster_id, &vol.id),
                        &options,
                        lease,
                    )
                    .await;
            }

            let rebal = RebalanceDetails::from_facts(facts, i, &vol.id);
            publisher
                .publish(
                    &Volume::rebalance_path(&self.ctx.cluster_id, &vol.id),
                    &rebal,
                    lease,
                )
                .await;

            for g in facts.indexed(&format!("volume{}.georep", i), "id") {
                if let Some(session) = GeoRepSession::from_facts(facts, i, g, &vol.id) {
                    publisher
                        .publish(&session.path(&self.ctx.cluster_id), &session, lease)
                        .await;
                }
            }

            for s in facts.indexed(&format!("volume{}.snapshot", i), "id") {
                if let Some(snap) = VolumeSnapshot::from_facts(facts, i, s, &vol.id) {
                    snaps.push(snap);
                }
            }

            self.sync_bricks(facts, i, &vol, budget).await;

            rebalances.push(rebal);
            volumes.push(vol);
        }

        (volumes, rebalances, snaps)
    }

    async fn sync_bricks(
        &self,
        facts: &FactMap,
        vol_index: usize,
        vol: &Volume,
        budget: &mut LeaseBudget,
    ) {
        let publisher = Publisher::new(&self.ctx);
        let alerts = AlertCoordinator::new(&self.ctx);

        for b in facts.indexed(&format!("volume{}.brick", vol_index), "hostname") {
            let hostname = facts.get_or_empty(&format!("volume{}.brick{}.hostname", vol_index, b));
            if !self.ctx.node.owns_brick(&hostname) {
                continue;
            }

            let utilization = facts
                .get(&format!("volume{}.brick{}.path", vol_index, b))
                .map(|p| p.rsplit(':').next().unwrap_or(p))
                .and_then(|local| self.ctx.probe.utilization(local));
            let Some(brick) =
                Brick::from_facts(facts, vol_index, b, vol, &self.ctx.node, utilization)
            else {
                continue;
            };
            let path = brick.path(&self.ctx.cluster_id);

            if let Transition::Changed { old, new } =
                classify(self.ctx.store.as_ref(), &path, "status", &brick.status).await
            {
                let message = format!(
                    "Status of brick: {} under volume {} in cluster {} changed from {} to {}",
                    brick.brick_path, vol.name, self.ctx.cluster_id, old, new
                );
                let instance = format!("volume_{}|brick_{}", vol.name, brick.brick_path);
                let mut tags = HashMap::new();
                tags.insert("entity_type".to_string(), RESOURCE_TYPE_BRICK.to_string());
                tags.insert("volume_name".to_string(), vol.name.clone());
                alerts.raise(
                    "brick_status",
                    &new,
                    message,
                    instance,
                    brick_severity(&new),
                    tags,
                );
            }

            let lease = budget.brick_lease();
            publisher
                .write_raw(
                    &brick.subvolume_path(&self.ctx.cluster_id, vol),
                    &brick.name,
                    Some(lease),
                )
                .await;
            publisher.publish(&path, &brick, lease).await;

            for c in facts.indexed(&format!("volume{}.brick{}.client", vol_index, b), "hostname") {
                if let Some(conn) = ClientConnection::from_facts(facts, vol_index, b, c, &brick) {
                    publisher
                        .publish(&conn.path(&self.ctx.cluster_id, c), &conn, lease)
                        .await;
                }
            }
        }
    }

    /// Profiling state survives across cycles through the stored record
    /// only; facts never report it.
    async fn stored_profiling_state(&self, vol_path: &str) -> ProfilingState {
        let Ok(raw) = self.ctx.store.read(vol_path).await else {
            return ProfilingState::Unknown;
        };
        serde_json::from_str::<serde_json::Value>(&raw)
            .ok()
            .and_then(|v| v.get("profiling_enabled").cloned())
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(ProfilingState::Unknown)
    }

    async fn mark_done(&self, volumes: &[Volume]) -> SyncResult<()> {
        let store = &self.ctx.store;
        store
            .write(
                &self.ctx.cluster_key("sync_status"),
                "done",
                WriteOptions::default(),
            )
            .await?;
        store
            .write(
                &self.ctx.cluster_key("last_sync"),
                &chrono::Utc::now().to_rfc3339(),
                WriteOptions::default(),
            )
            .await?;
        store
            .write(
                &self.ctx.cluster_key("is_managed"),
                "yes",
                WriteOptions::default(),
            )
            .await?;

        // counters are created once and never reset from this engine
        match store
            .write(
                &self.ctx.cluster_key("alert_counters"),
                "0",
                WriteOptions::create_only(),
            )
            .await
        {
            Ok(()) | Err(StoreError::AlreadyExists(_)) => {}
            Err(err) => return Err(err.into()),
        }
        for vol in volumes.iter().filter(|v| !v.deleted) {
            match store
                .write(
                    &Volume::alert_counter_path(&self.ctx.cluster_id, &vol.id),
                    "0",
                    WriteOptions::create_only(),
                )
                .await
            {
                Ok(()) | Err(StoreError::AlreadyExists(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

// TODO: read the real prefix length from the interface instead of
// assuming /24
fn ipv4_subnet(addr: &str) -> Option<String> {
    let octets: Vec<&str> = addr.split('.').collect();
    if octets.len() != 4 {
        return None;
    }
    Some(format!("{}.{}.{}.0/24", octets[0], octets[1], octets[2]))
}

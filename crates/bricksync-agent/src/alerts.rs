//! Alert emission and the cross-agent brick sweep on peer disconnect.

use std::collections::HashMap;
use std::time::Duration;

use bricksync_store::WriteOptions;

use crate::context::AgentContext;
use crate::entities::Brick;
use crate::error::{SyncError, SyncResult};
use crate::events::{AlertEvent, Severity};

pub const RESOURCE_TYPE_BRICK: &str = "brick";
pub const RESOURCE_TYPE_PEER: &str = "host";
pub const RESOURCE_TYPE_VOLUME: &str = "volume";
const BRICK_STARTED: &str = "started";
const BRICK_STOPPED: &str = "Stopped";

pub struct AlertCoordinator<'a> {
    ctx: &'a AgentContext,
}

impl<'a> AlertCoordinator<'a> {
    pub fn new(ctx: &'a AgentContext) -> Self {
        Self { ctx }
    }

    /// Publish one alert to the event channel. Tags default to an empty
    /// map constructed by the caller per invocation.
    pub fn raise(
        &self,
        kind: &str,
        current_value: &str,
        message: String,
        instance: String,
        severity: Severity,
        tags: HashMap<String, String>,
    ) {
        self.ctx.events.emit(AlertEvent {
            kind: kind.to_string(),
            current_value: current_value.to_string(),
            message,
            instance,
            severity,
            tags,
        });
    }

    /// Report an engine failure as an error event; never panics the cycle.
    pub fn error(&self, message: String) {
        tracing::error!("{}", message);
        self.ctx.events.emit(AlertEvent {
            kind: "sync_error".to_string(),
            current_value: String::new(),
            message,
            instance: format!("node_{}", self.ctx.node.fqdn),
            severity: Severity::Error,
            tags: HashMap::new(),
        });
    }

    /// Sweep all bricks of a disconnected peer: any brick still marked
    /// started gets one stopped alert and its stored status flipped.
    ///
    /// Serialized cluster-wide by a lock on the hostname's brick subtree,
    /// so concurrent agents observing the same disconnect produce at most
    /// one alert per brick: the second acquirer finds the status already
    /// stopped. Failures are reported and swallowed; the cycle continues.
    pub async fn brick_status_sweep(&self, hostname: &str) {
        if let Err(err) = self.sweep_locked(hostname).await {
            self.error(format!(
                "Unable to raise brick status alerts for host {}: {}",
                hostname, err
            ));
        }
    }

    async fn sweep_locked(&self, hostname: &str) -> SyncResult<()> {
        let lock_path = self.ctx.cluster_key(&format!("Bricks/all/{}", hostname));
        let lease = Duration::from_secs(self.ctx.config.sweep_lock_lease_secs);
        // guard releases on every exit path, including the error returns below
        let _lock = self.ctx.store.lock(&lock_path, lease).await?;

        let prefix = format!("{}/", lock_path);
        for (path, raw) in self.ctx.store.read_prefix(&prefix).await? {
            let mut brick: Brick =
                serde_json::from_str(&raw).map_err(|e| SyncError::MalformedRecord {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            if !brick.status.eq_ignore_ascii_case(BRICK_STARTED) {
                continue;
            }

            let message = format!(
                "Status of brick: {} under volume {} in cluster {} changed from Started to {}",
                brick.brick_path, brick.vol_name, self.ctx.cluster_id, BRICK_STOPPED
            );
            let instance = format!("volume_{}|brick_{}", brick.vol_name, brick.brick_path);
            let mut tags = HashMap::new();
            tags.insert("entity_type".to_string(), RESOURCE_TYPE_BRICK.to_string());
            tags.insert("volume_name".to_string(), brick.vol_name.clone());
            tags.insert("node_id".to_string(), brick.node_id.clone());
            tags.insert("fqdn".to_string(), brick.hostname.clone());
            self.raise(
                "brick_status",
                BRICK_STOPPED,
                message,
                instance,
                Severity::Warning,
                tags,
            );

            brick.status = BRICK_STOPPED.to_string();
            let value = serde_json::to_string(&brick)?;
            self.ctx
                .store
                .write(&path, &value, WriteOptions::default())
                .await?;
        }
        Ok(())
    }
}

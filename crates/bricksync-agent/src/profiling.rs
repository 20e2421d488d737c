//! Volume profiling reconciler: drives each volume's profiling state
//! toward the cluster-wide desired flag by invoking the external control
//! command, once per volume per cycle.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use bricksync_store::WriteOptions;

use crate::context::AgentContext;
use crate::entities::{ProfilingState, Volume};
use crate::error::{SyncError, SyncResult};
use crate::events::{AlertEvent, Severity};

/// Captured output of an external control command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl CommandOutput {
    /// The control tool reports soft failures on stderr with exit 0, so
    /// success requires both a clean exit and a silent stderr.
    pub fn success(&self) -> bool {
        self.status == 0 && self.stderr.is_empty()
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> SyncResult<CommandOutput>;
}

/// Runs commands through the system shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> SyncResult<CommandOutput> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .await
            .map_err(|e| SyncError::Command(format!("{}: {}", command, e)))?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code().unwrap_or(-1),
        })
    }
}

/// Replays scripted outputs and records invocations, for tests.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: Mutex<VecDeque<CommandOutput>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn push(&self, output: CommandOutput) {
        self.responses.lock().unwrap().push_back(output);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &str) -> SyncResult<CommandOutput> {
        self.calls.lock().unwrap().push(command.to_string());
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProfilingAction {
    Start,
    Stop,
}

impl ProfilingAction {
    fn as_str(&self) -> &'static str {
        match self {
            ProfilingAction::Start => "start",
            ProfilingAction::Stop => "stop",
        }
    }

    fn target_state(&self) -> ProfilingState {
        match self {
            ProfilingAction::Start => ProfilingState::Enabled,
            ProfilingAction::Stop => ProfilingState::Disabled,
        }
    }
}

/// Reconcile every volume's profiling state against the cluster flag at
/// `clusters/{c}/enable_volume_profiling` (`"yes"` / `"no"`, absent means
/// no). Volumes that fail are collected and reported in one summary
/// warning; no retries happen within the cycle.
pub async fn reconcile_profiling(ctx: &AgentContext, volumes: &[Volume]) {
    let desired_enabled = matches!(
        ctx.store
            .read(&ctx.cluster_key("enable_volume_profiling"))
            .await
            .as_deref(),
        Ok("yes")
    );

    let mut failed_volumes: Vec<String> = Vec::new();
    for vol in volumes.iter().filter(|v| !v.deleted) {
        let action = match (desired_enabled, vol.profiling_enabled) {
            (true, ProfilingState::Enabled) => continue,
            (true, _) => ProfilingAction::Start,
            (false, ProfilingState::Enabled) => ProfilingAction::Stop,
            (false, _) => continue,
        };

        let command = format!("gluster volume profile {} {}", vol.name, action.as_str());
        match ctx.runner.run(&command).await {
            Ok(output) if output.success() => {
                if let Err(err) = persist_profiling_state(ctx, &vol.id, action.target_state()).await
                {
                    tracing::error!(volume = %vol.name, "failed to persist profiling state: {}", err);
                    failed_volumes.push(vol.name.clone());
                }
            }
            Ok(output) => {
                // the command refusing because the target state is already
                // in effect still tells us the true observed state
                let corrected = match action {
                    ProfilingAction::Start if output.stderr.contains("already started") => {
                        Some(ProfilingState::Enabled)
                    }
                    ProfilingAction::Stop if output.stderr.contains("not started") => {
                        Some(ProfilingState::Disabled)
                    }
                    _ => None,
                };
                if let Some(state) = corrected {
                    if let Err(err) = persist_profiling_state(ctx, &vol.id, state).await {
                        tracing::error!(volume = %vol.name, "failed to persist profiling state: {}", err);
                    }
                }
                failed_volumes.push(vol.name.clone());
            }
            Err(err) => {
                tracing::error!(volume = %vol.name, "profiling command failed: {}", err);
                failed_volumes.push(vol.name.clone());
            }
        }
    }

    if !failed_volumes.is_empty() {
        ctx.events.emit(AlertEvent {
            kind: "volume_profiling".to_string(),
            current_value: if desired_enabled { "yes" } else { "no" }.to_string(),
            message: format!(
                "Reconciling volume profiling failed for volumes: {}",
                failed_volumes.join(", ")
            ),
            instance: format!("cluster_{}", ctx.cluster_id),
            severity: Severity::Warning,
            tags: HashMap::new(),
        });
    }
}

/// Rewrite the stored volume record with the corrected profiling state.
/// The next cycle's publish restores the lease.
async fn persist_profiling_state(
    ctx: &AgentContext,
    vol_id: &str,
    state: ProfilingState,
) -> SyncResult<()> {
    let path = ctx.cluster_key(&format!("Volumes/{}", vol_id));
    let raw = ctx.store.read(&path).await?;
    let mut record: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| SyncError::MalformedRecord {
            path: path.clone(),
            reason: e.to_string(),
        })?;
    let fields = record
        .as_object_mut()
        .ok_or_else(|| SyncError::MalformedRecord {
            path: path.clone(),
            reason: "not a record object".to_string(),
        })?;
    fields.insert(
        "profiling_enabled".to_string(),
        serde_json::to_value(state)?,
    );
    ctx.store
        .write(&path, &record.to_string(), WriteOptions::default())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use bricksync_store::{MemStore, StateStore};

    use crate::config::AgentConfig;
    use crate::context::NodeIdentity;
    use crate::events::MemorySink;
    use crate::facts::FactMap;
    use crate::probe::FixedProbe;

    fn test_volume(name: &str, id: &str, profiling: ProfilingState) -> Volume {
        let facts: FactMap = [
            ("volume1.id", id),
            ("volume1.name", name),
            ("volume1.type", "replicate"),
            ("volume1.status", "Started"),
            ("volume1.brickcount", "2"),
            ("volume1.subvol_count", "1"),
        ]
        .into_iter()
        .collect();
        let mut vol = Volume::from_facts(&facts, 1).unwrap();
        vol.profiling_enabled = profiling;
        vol
    }

    struct Fixture {
        store: MemStore,
        sink: Arc<MemorySink>,
        runner: Arc<ScriptedRunner>,
        ctx: AgentContext,
    }

    async fn fixture(desired: Option<&str>) -> Fixture {
        let store = MemStore::new();
        if let Some(flag) = desired {
            store
                .write(
                    "clusters/c1/enable_volume_profiling",
                    flag,
                    WriteOptions::default(),
                )
                .await
                .unwrap();
        }
        let sink = Arc::new(MemorySink::new());
        let runner = Arc::new(ScriptedRunner::default());
        let ctx = AgentContext {
            store: Arc::new(store.clone()),
            events: sink.clone(),
            probe: Arc::new(FixedProbe(None)),
            runner: runner.clone(),
            cluster_id: "c1".to_string(),
            node: NodeIdentity {
                node_id: "n1".to_string(),
                fqdn: "host1.example.com".to_string(),
                ipv4_addrs: vec![],
                tags: vec![],
            },
            config: AgentConfig::default(),
        };
        Fixture {
            store,
            sink,
            runner,
            ctx,
        }
    }

    async fn seed_volume_record(store: &MemStore, vol: &Volume) {
        store
            .write(
                &vol.path("c1"),
                &serde_json::to_string(vol).unwrap(),
                WriteOptions::default(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_enables_profiling_when_desired() {
        let fx = fixture(Some("yes")).await;
        let vol = test_volume("gv0", "v1", ProfilingState::Unknown);
        seed_volume_record(&fx.store, &vol).await;
        fx.runner.push(CommandOutput::default());

        reconcile_profiling(&fx.ctx, &[vol]).await;

        assert_eq!(fx.runner.calls(), vec!["gluster volume profile gv0 start"]);
        assert!(fx.sink.events().is_empty());
        let raw = fx.store.read("clusters/c1/Volumes/v1").await.unwrap();
        assert!(raw.contains("\"profiling_enabled\":\"enabled\""));
    }

    #[tokio::test]
    async fn test_skips_volume_already_in_desired_state() {
        let fx = fixture(Some("yes")).await;
        let vol = test_volume("gv0", "v1", ProfilingState::Enabled);

        reconcile_profiling(&fx.ctx, &[vol]).await;

        assert!(fx.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_disables_profiling_when_flag_off() {
        let fx = fixture(Some("no")).await;
        let vol = test_volume("gv0", "v1", ProfilingState::Enabled);
        seed_volume_record(&fx.store, &vol).await;
        fx.runner.push(CommandOutput::default());

        reconcile_profiling(&fx.ctx, &[vol]).await;

        assert_eq!(fx.runner.calls(), vec!["gluster volume profile gv0 stop"]);
    }

    #[tokio::test]
    async fn test_missing_flag_means_disabled() {
        let fx = fixture(None).await;
        let vol = test_volume("gv0", "v1", ProfilingState::Disabled);

        reconcile_profiling(&fx.ctx, &[vol]).await;

        assert!(fx.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_already_started_corrects_state_and_reports_failure() {
        let fx = fixture(Some("yes")).await;
        let vol = test_volume("gv0", "v1", ProfilingState::Disabled);
        seed_volume_record(&fx.store, &vol).await;
        fx.runner.push(CommandOutput {
            stdout: String::new(),
            stderr: "Profile on Volume gv0 is already started".to_string(),
            status: 1,
        });

        reconcile_profiling(&fx.ctx, &[vol]).await;

        let raw = fx.store.read("clusters/c1/Volumes/v1").await.unwrap();
        assert!(raw.contains("\"profiling_enabled\":\"enabled\""));

        let events = fx.sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "volume_profiling");
        assert_eq!(events[0].severity, Severity::Warning);
        assert!(events[0].message.contains("gv0"));
    }

    #[tokio::test]
    async fn test_summary_warning_lists_all_failed_volumes() {
        let fx = fixture(Some("yes")).await;
        let vol1 = test_volume("gv0", "v1", ProfilingState::Unknown);
        let vol2 = test_volume("gv1", "v2", ProfilingState::Unknown);
        seed_volume_record(&fx.store, &vol1).await;
        seed_volume_record(&fx.store, &vol2).await;
        fx.runner.push(CommandOutput {
            stderr: "unexpected failure".to_string(),
            status: 1,
            ..Default::default()
        });
        fx.runner.push(CommandOutput {
            stderr: "unexpected failure".to_string(),
            status: 1,
            ..Default::default()
        });

        reconcile_profiling(&fx.ctx, &[vol1, vol2]).await;

        let events = fx.sink.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].message.contains("gv0"));
        assert!(events[0].message.contains("gv1"));
    }

    #[tokio::test]
    async fn test_deleted_volumes_ignored() {
        let fx = fixture(Some("yes")).await;
        let mut vol = test_volume("gv0", "v1", ProfilingState::Unknown);
        vol.deleted = true;

        reconcile_profiling(&fx.ctx, &[vol]).await;

        assert!(fx.runner.calls().is_empty());
    }
}

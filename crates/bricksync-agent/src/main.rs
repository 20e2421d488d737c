use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bricksync_agent::events::LogSink;
use bricksync_agent::facts::FileFactSource;
use bricksync_agent::probe::StatvfsProbe;
use bricksync_agent::profiling::ShellRunner;
use bricksync_agent::{AgentConfig, AgentContext, NodeIdentity, ReconciliationLoop};
use bricksync_store::MemStore;

#[derive(Debug, Parser)]
#[command(name = "bricksync", about = "Storage cluster reconciliation agent")]
struct Cli {
    /// Agent configuration file (TOML or JSON).
    #[arg(long, default_value = "bricksync.toml")]
    config: PathBuf,

    /// Cluster integration id this agent reconciles.
    #[arg(long, env = "BRICKSYNC_CLUSTER_ID")]
    cluster_id: String,

    /// Stable node id; defaults to the FQDN.
    #[arg(long)]
    node_id: Option<String>,

    /// Local IPv4 addresses for the brick ownership check.
    #[arg(long = "ipv4")]
    ipv4_addrs: Vec<String>,

    /// Act as the designated provisioner for this cluster.
    #[arg(long)]
    provisioner: bool,

    /// Flattened detail fact dump refreshed by the extraction tool.
    #[arg(long)]
    detail_facts: PathBuf,

    /// Flattened volume-options fact dump.
    #[arg(long)]
    options_facts: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        AgentConfig::from_file(&cli.config)?
    } else {
        tracing::warn!(
            "Config file not found, using defaults: {}",
            cli.config.display()
        );
        AgentConfig::default()
    };

    let fqdn = hostname::get()?.to_string_lossy().into_owned();
    let mut tags = Vec::new();
    if cli.provisioner {
        tags.push(format!("provisioner/{}", cli.cluster_id));
    }
    let node = NodeIdentity {
        node_id: cli.node_id.unwrap_or_else(|| fqdn.clone()),
        fqdn,
        ipv4_addrs: cli.ipv4_addrs,
        tags,
    };
    tracing::info!(node_id = %node.node_id, cluster = %cli.cluster_id, "bricksync agent starting");

    // Embedded store; a networked backend plugs in behind the same trait.
    // Its logical clock needs ticking for leases to expire.
    let store = MemStore::new();
    let ticker = store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            ticker.advance(Duration::from_secs(1));
        }
    });

    let ctx = Arc::new(AgentContext {
        store: Arc::new(store),
        events: Arc::new(LogSink),
        probe: Arc::new(StatvfsProbe),
        runner: Arc::new(ShellRunner),
        cluster_id: cli.cluster_id,
        node,
        config,
    });

    let facts = Arc::new(FileFactSource::new(cli.detail_facts, cli.options_facts));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for shutdown signal: {}", err);
            return;
        }
        tracing::info!("shutdown signal received, finishing current cycle");
        let _ = shutdown_tx.send(true);
    });

    ReconciliationLoop::new(ctx, facts, shutdown_rx).run().await;
    Ok(())
}

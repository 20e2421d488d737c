//! Full-cycle tests: facts in, alerts and leased records out.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use bricksync_agent::config::AgentConfig;
use bricksync_agent::context::{AgentContext, NodeIdentity};
use bricksync_agent::entities::{Brick, Peer, Volume};
use bricksync_agent::events::{MemorySink, Severity};
use bricksync_agent::facts::{FactMap, FactSnapshot, StaticFacts};
use bricksync_agent::probe::{BrickUtilization, FixedProbe};
use bricksync_agent::profiling::ScriptedRunner;
use bricksync_agent::ReconciliationLoop;
use bricksync_store::{MemStore, StateStore, WriteOptions};

const FQDN: &str = "host1.example.com";

struct Harness {
    store: MemStore,
    sink: Arc<MemorySink>,
    engine: ReconciliationLoop,
}

fn harness(details: FactMap, options: FactMap, provisioner: bool) -> Harness {
    let store = MemStore::new();
    let sink = Arc::new(MemorySink::new());
    let tags = if provisioner {
        vec!["provisioner/c1".to_string()]
    } else {
        vec![]
    };
    let ctx = Arc::new(AgentContext {
        store: Arc::new(store.clone()),
        events: sink.clone(),
        probe: Arc::new(FixedProbe(Some(BrickUtilization::from_counts(1000, 250)))),
        runner: Arc::new(ScriptedRunner::default()),
        cluster_id: "c1".to_string(),
        node: NodeIdentity {
            node_id: "n1".to_string(),
            fqdn: FQDN.to_string(),
            ipv4_addrs: vec!["10.0.0.4".to_string()],
            tags,
        },
        config: AgentConfig::default(),
    });
    let (_tx, rx) = watch::channel(false);
    let engine = ReconciliationLoop::new(
        ctx,
        Arc::new(StaticFacts(FactSnapshot { details, options })),
        rx,
    );
    Harness {
        store,
        sink,
        engine,
    }
}

fn peer_facts(connected: &str) -> FactMap {
    [
        ("peer1.uuid", "u1"),
        ("peer1.primary_hostname", "host2.example.com"),
        ("peer1.state", "Peer in Cluster"),
        ("peer1.connected", connected),
    ]
    .into_iter()
    .collect()
}

fn volume_facts() -> FactMap {
    [
        ("volume1.id", "v1"),
        ("volume1.name", "gv0"),
        ("volume1.type", "replicate"),
        ("volume1.transport_type", "tcp"),
        ("volume1.status", "Started"),
        ("volume1.brickcount", "4"),
        ("volume1.subvol_count", "2"),
        ("volume1.arbiter_count", "0"),
        ("volume1.snap_count", "0"),
        ("volume1.stripe_count", "1"),
        ("volume1.replica_count", "2"),
        ("volume1.disperse_count", "0"),
        ("volume1.redundancy_count", "0"),
        ("volume1.quorum_status", "not_applicable"),
        ("volume1.snapd_svc.online_status", "Online"),
        ("volume1.snapd_svc.inited", "True"),
    ]
    .into_iter()
    .collect()
}

#[tokio::test]
async fn peer_reconnect_emits_single_info_alert_and_publishes() {
    let h = harness(peer_facts("Connected"), FactMap::new(), false);
    h.store
        .write(
            "clusters/c1/Peers/u1",
            r#"{"uuid":"u1","hostname":"host2.example.com","state":"Peer in Cluster","connected":"disconnected"}"#,
            WriteOptions::default(),
        )
        .await
        .unwrap();

    h.engine.run_once().await.unwrap();

    let alerts: Vec<_> = h
        .sink
        .events()
        .into_iter()
        .filter(|e| e.kind == "peer_status")
        .collect();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, Severity::Info);
    assert_eq!(alerts[0].instance, "peer_host2.example.com");
    assert_eq!(alerts[0].current_value, "Connected");

    let peer: Peer =
        serde_json::from_str(&h.store.read("clusters/c1/Peers/u1").await.unwrap()).unwrap();
    assert_eq!(peer.connected, "Connected");
}

#[tokio::test]
async fn unchanged_peer_emits_no_alert() {
    let h = harness(peer_facts("Connected"), FactMap::new(), false);
    h.engine.run_once().await.unwrap();
    // first observation: the record appeared, nothing changed
    assert_eq!(h.sink.count_kind("peer_status"), 0);

    h.engine.run_once().await.unwrap();
    assert_eq!(h.sink.count_kind("peer_status"), 0);
}

#[tokio::test]
async fn peer_disconnect_warns_and_sweeps_bricks() {
    let h = harness(peer_facts("disconnected"), FactMap::new(), false);
    h.store
        .write(
            "clusters/c1/Peers/u1",
            r#"{"uuid":"u1","hostname":"host2.example.com","state":"Peer in Cluster","connected":"Connected"}"#,
            WriteOptions::default(),
        )
        .await
        .unwrap();
    // a brick of the disconnected host, still marked started
    let brick = Brick {
        fqdn: "host2.example.com".to_string(),
        brick_dir: "data_b1".to_string(),
        name: "host2.example.com:_data_b1".to_string(),
        vol_id: "v1".to_string(),
        vol_name: "gv0".to_string(),
        sequence_number: 1,
        brick_path: "/data/b1".to_string(),
        hostname: "host2.example.com".to_string(),
        port: "49152".to_string(),
        status: "Started".to_string(),
        filesystem_type: "xfs".to_string(),
        mount_opts: String::new(),
        utilization: None,
        client_count: 0,
        is_arbiter: String::new(),
        node_id: "n2".to_string(),
        used: true,
    };
    h.store
        .write(
            &brick.path("c1"),
            &serde_json::to_string(&brick).unwrap(),
            WriteOptions::default(),
        )
        .await
        .unwrap();

    h.engine.run_once().await.unwrap();

    let peer_alerts: Vec<_> = h
        .sink
        .events()
        .into_iter()
        .filter(|e| e.kind == "peer_status")
        .collect();
    assert_eq!(peer_alerts.len(), 1);
    assert_eq!(peer_alerts[0].severity, Severity::Warning);

    let brick_alerts: Vec<_> = h
        .sink
        .events()
        .into_iter()
        .filter(|e| e.kind == "brick_status")
        .collect();
    assert_eq!(brick_alerts.len(), 1);
    assert_eq!(brick_alerts[0].current_value, "Stopped");

    let swept: Brick = serde_json::from_str(
        &h.store
            .read("clusters/c1/Bricks/all/host2.example.com/data_b1")
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(swept.status, "Stopped");

    // a second cycle observes the already-swept state and stays quiet
    h.sink.take();
    h.engine.run_once().await.unwrap();
    assert_eq!(h.sink.count_kind("brick_status"), 0);
}

#[tokio::test]
async fn arbiter_count_forces_volume_type() {
    let mut details = volume_facts();
    details.insert("volume1.arbiter_count", "1");
    let h = harness(details, FactMap::new(), true);

    h.engine.run_once().await.unwrap();

    let vol: Volume =
        serde_json::from_str(&h.store.read("clusters/c1/Volumes/v1").await.unwrap()).unwrap();
    assert_eq!(vol.vol_type, "arbiter");
}

#[tokio::test]
async fn owned_bricks_published_under_subvolume_partition() {
    let mut details = volume_facts();
    // brick 3 of 4 (subvol_count 2) belongs to subvolume 1
    for (b, host) in [
        (1, "other.example.com"),
        (2, "other.example.com"),
        (3, FQDN),
        (4, "other.example.com"),
    ] {
        details.insert(format!("volume1.brick{}.hostname", b), host);
        details.insert(format!("volume1.brick{}.path", b), format!("{}:/data/b{}", host, b));
        details.insert(format!("volume1.brick{}.status", b), "Started");
        details.insert(format!("volume1.brick{}.port", b), "49152");
    }
    details.insert("volume1.brick3.client_count", "1");
    details.insert("volume1.brick3.client1.hostname", "client-a:1021");
    details.insert("volume1.brick3.client1.bytesread", "4096");
    details.insert("volume1.brick3.client1.byteswrite", "8192");
    details.insert("volume1.brick3.client1.opversion", "31202");
    let h = harness(details, FactMap::new(), true);

    h.engine.run_once().await.unwrap();

    // only the locally owned brick landed
    let bricks = h
        .store
        .read_prefix("clusters/c1/Bricks/all/")
        .await
        .unwrap();
    let records: Vec<_> = bricks
        .iter()
        .filter(|(p, _)| p.contains("/data_b"))
        .collect();
    assert_eq!(records.len(), 1);

    let brick: Brick = serde_json::from_str(&records[0].1).unwrap();
    assert_eq!(brick.fqdn, FQDN);
    assert_eq!(brick.sequence_number, 3);
    assert!(brick.utilization.is_some());

    // membership marker under the computed subvolume
    let marker = format!(
        "clusters/c1/Volumes/v1/Bricks/subvolume1/{}:_data_b3",
        FQDN
    );
    assert!(h.store.read(&marker).await.is_ok());

    // client connection record alongside
    assert!(h
        .store
        .read(&format!(
            "clusters/c1/ClientConnections/{}/data_b3/1",
            FQDN
        ))
        .await
        .is_ok());
}

#[tokio::test]
async fn vanished_volume_expires_after_lease() {
    let h = harness(volume_facts(), FactMap::new(), true);
    h.engine.run_once().await.unwrap();
    assert!(h.store.read("clusters/c1/Volumes/v1").await.is_ok());

    // the volume never comes back; no rewrite, the lease runs out
    let config = AgentConfig::default();
    let lease_upper_bound =
        config.sync_interval_secs + config.lease_pad_secs + config.volume_lease_pad_secs + 60;
    h.store.advance(Duration::from_secs(lease_upper_bound));
    assert!(h.store.read("clusters/c1/Volumes/v1").await.is_err());
}

#[tokio::test]
async fn volume_stop_alerts_warning_on_provisioner() {
    let h = harness(volume_facts(), FactMap::new(), true);
    h.engine.run_once().await.unwrap();
    assert_eq!(h.sink.count_kind("volume_status"), 0);

    let mut details = volume_facts();
    details.insert("volume1.status", "Stopped");
    let h2 = harness(details, FactMap::new(), true);
    // second agent sees the state the first one published
    for (path, value) in h.store.read_prefix("clusters/").await.unwrap() {
        h2.store
            .write(&path, &value, WriteOptions::default())
            .await
            .unwrap();
    }

    h2.engine.run_once().await.unwrap();

    let alerts: Vec<_> = h2
        .sink
        .events()
        .into_iter()
        .filter(|e| e.kind == "volume_status")
        .collect();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, Severity::Warning);
    assert_eq!(alerts[0].instance, "volume_gv0");
    assert_eq!(alerts[0].tags.get("entity_type").unwrap(), "volume");
}

#[tokio::test]
async fn options_recomputed_each_cycle() {
    let options: FactMap = [
        ("volume1.options.count", "2"),
        ("volume1.options.key1", "nfs.disable"),
        ("volume1.options.value1", "on"),
    ]
    .into_iter()
    .collect();
    let h = harness(volume_facts(), options, true);

    h.engine.run_once().await.unwrap();

    let raw = h
        .store
        .read("clusters/c1/Volumes/v1/options")
        .await
        .unwrap();
    assert!(raw.contains("nfs.disable"));
}

#[tokio::test]
async fn sync_bookkeeping_written_after_cycle() {
    let h = harness(volume_facts(), FactMap::new(), true);
    h.engine.run_once().await.unwrap();

    assert_eq!(
        h.store.read("clusters/c1/sync_status").await.unwrap(),
        "done"
    );
    assert!(h.store.read("clusters/c1/last_sync").await.is_ok());
    assert_eq!(
        h.store
            .read("clusters/c1/Volumes/v1/alert_counters")
            .await
            .unwrap(),
        "0"
    );
    // aggregates landed too (provisioner agent)
    assert!(h.store.read("clusters/c1/GlobalDetails").await.is_ok());
    assert!(h.store.read("clusters/c1/Utilization").await.is_ok());
}

//! Explicit dependency bundle passed into every component.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use bricksync_store::StateStore;

use crate::config::AgentConfig;
use crate::events::EventSink;
use crate::probe::UtilizationProbe;
use crate::profiling::CommandRunner;

/// Identity of the node this agent runs on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub node_id: String,
    pub fqdn: String,
    /// Known local IPv4 addresses, used by the brick ownership heuristic.
    pub ipv4_addrs: Vec<String>,
    /// Role tags, e.g. `provisioner/{cluster_id}`.
    pub tags: Vec<String>,
}

impl NodeIdentity {
    /// Brick ownership test: exact FQDN match, or the reported hostname is
    /// one of this node's IPv4 addresses (multi-homed hosts report either).
    pub fn owns_brick(&self, reported_hostname: &str) -> bool {
        self.fqdn == reported_hostname
            || self.ipv4_addrs.iter().any(|ip| ip == reported_hostname)
    }

    /// Whether this agent is the designated provisioner for `cluster_id`.
    pub fn is_provisioner(&self, cluster_id: &str) -> bool {
        let tag = format!("provisioner/{}", cluster_id);
        self.tags.iter().any(|t| t == &tag)
    }
}

/// Everything a component needs, injected explicitly. No ambient globals.
pub struct AgentContext {
    pub store: Arc<dyn StateStore>,
    pub events: Arc<dyn EventSink>,
    pub probe: Arc<dyn UtilizationProbe>,
    pub runner: Arc<dyn CommandRunner>,
    pub cluster_id: String,
    pub node: NodeIdentity,
    pub config: AgentConfig,
}

impl AgentContext {
    /// Absolute store path under this cluster's namespace.
    pub fn cluster_key(&self, rest: &str) -> String {
        format!("clusters/{}/{}", self.cluster_id, rest)
    }

    pub fn is_provisioner(&self) -> bool {
        self.node.is_provisioner(&self.cluster_id)
    }
}

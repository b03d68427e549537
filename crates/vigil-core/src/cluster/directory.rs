//! Cluster directory: static membership plus runtime health state.
//!
//! The node list is fixed at bootstrap from [`ClusterConfig`]; only
//! `last_seen`, `connected` and `version` are refreshed afterwards. Reads
//! vastly outnumber writes, so a plain `RwLock` guards the list and readers get
//! cloned snapshots they can hold across await points.

use super::node::{ClusterNode, NodeHealth, NodeIdentity, NodeInfo, NodeStatus, NodeType};
use crate::config::{ClusterConfig, ClusterDefaults};
use chrono::Utc;
use semver::Version;
use std::sync::RwLock;
use tracing::{debug, warn};

/// Membership and health of every cluster node.
#[derive(Debug)]
pub struct ClusterDirectory {
    identity: NodeIdentity,
    enabled: bool,
    local_version: String,
    nodes: RwLock<Vec<ClusterNode>>,
}

impl ClusterDirectory {
    /// Build the directory from static configuration.
    ///
    /// With clustering disabled the directory holds a single master named
    /// `manager`, so every fan-out degenerates to local execution.
    pub fn from_config(config: &ClusterConfig, local_version: impl Into<String>) -> Self {
        let local_version = local_version.into();
        let (identity, mut nodes) = if config.disabled {
            let identity = NodeIdentity {
                cluster: config.name.clone(),
                node: ClusterDefaults::STANDALONE_NODE_NAME.to_string(),
                node_type: NodeType::Master,
            };
            let local = ClusterNode::new(
                ClusterDefaults::STANDALONE_NODE_NAME,
                NodeType::Master,
                "localhost",
            );
            (identity, vec![local])
        } else {
            let identity = NodeIdentity {
                cluster: config.name.clone(),
                node: config.node_name.clone(),
                node_type: config.node_type,
            };
            let nodes = config
                .nodes
                .iter()
                .map(|entry| ClusterNode::new(&entry.name, entry.node_type, &entry.address))
                .collect();
            (identity, nodes)
        };

        for node in nodes.iter_mut().filter(|n| n.node_id == identity.node) {
            node.version = Some(local_version.clone());
            node.connected = true;
            node.last_seen = Some(Utc::now());
        }

        Self {
            identity,
            enabled: !config.disabled,
            local_version,
            nodes: RwLock::new(nodes),
        }
    }

    /// Static identity of this node.
    pub fn get_node(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn local_node_id(&self) -> &str {
        &self.identity.node
    }

    pub fn node_type(&self) -> NodeType {
        self.identity.node_type
    }

    pub fn is_master(&self) -> bool {
        self.identity.node_type == NodeType::Master
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn local_version(&self) -> &str {
        &self.local_version
    }

    pub fn is_local(&self, node_id: &str) -> bool {
        node_id == self.identity.node
    }

    /// Snapshot of every node in configuration order.
    pub fn nodes(&self) -> Vec<ClusterNode> {
        self.read().clone()
    }

    pub fn node(&self, node_id: &str) -> Option<ClusterNode> {
        self.read().iter().find(|n| n.node_id == node_id).cloned()
    }

    pub fn master(&self) -> Option<ClusterNode> {
        self.read().iter().find(|n| n.is_master()).cloned()
    }

    pub fn workers(&self) -> Vec<ClusterNode> {
        self.read().iter().filter(|n| !n.is_master()).cloned().collect()
    }

    /// Note a successful contact with `node_id`.
    pub fn record_contact(&self, node_id: &str, version: Option<&str>) {
        let mut nodes = self.write();
        match nodes.iter_mut().find(|n| n.node_id == node_id) {
            Some(node) => {
                node.last_seen = Some(Utc::now());
                node.connected = true;
                if let Some(version) = version {
                    node.version = Some(version.to_string());
                }
            }
            None => debug!("Ignoring contact from unknown node {}", node_id),
        }
    }

    /// Mark `node_id` as unreachable; its last contact time is kept.
    pub fn record_unreachable(&self, node_id: &str) {
        let mut nodes = self.write();
        if let Some(node) = nodes.iter_mut().find(|n| n.node_id == node_id) {
            if node.connected {
                warn!("Node {} is no longer reachable", node_id);
            }
            node.connected = false;
        }
    }

    /// This node, or a peer whose last contact attempt succeeded.
    pub fn is_live(&self, node_id: &str) -> bool {
        self.is_local(node_id) || self.node(node_id).map_or(false, |n| n.connected)
    }

    /// Whether `version` is on the same major.minor line as this node.
    pub fn is_version_compatible(&self, version: &str) -> bool {
        match (
            Version::parse(trim_version(&self.local_version)),
            Version::parse(trim_version(version)),
        ) {
            (Ok(local), Ok(other)) => local.major == other.major && local.minor == other.minor,
            _ => false,
        }
    }

    /// Health reports of the live nodes in configuration order, optionally
    /// restricted to `filter`.
    ///
    /// Configured peers that are not connected are left out like names that
    /// are not cluster members; callers report the ones they asked for.
    pub fn health(&self, filter: Option<&[String]>) -> Vec<NodeHealth> {
        self.read()
            .iter()
            .filter(|n| self.is_local(&n.node_id) || n.connected)
            .filter(|n| filter.map_or(true, |f| f.contains(&n.node_id)))
            .map(|n| {
                let local = self.is_local(&n.node_id);
                NodeHealth {
                    info: n.info(),
                    status: NodeStatus {
                        last_keep_alive: if local { Some(Utc::now()) } else { n.last_seen },
                        connected: local || n.connected,
                        version_compatible: n
                            .version
                            .as_deref()
                            .map_or(false, |v| self.is_version_compatible(v)),
                    },
                }
            })
            .collect()
    }

    /// Node descriptions in configuration order, optionally filtered.
    pub fn nodes_info(&self, filter: Option<&[String]>) -> Vec<NodeInfo> {
        self.read()
            .iter()
            .filter(|n| filter.map_or(true, |f| f.contains(&n.node_id)))
            .map(ClusterNode::info)
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<ClusterNode>> {
        // A panic while holding the lock cannot leave the list half-updated:
        // every write replaces whole fields.
        self.nodes.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<ClusterNode>> {
        self.nodes.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn trim_version(version: &str) -> &str {
    version.trim_start_matches('v')
}

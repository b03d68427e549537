//! Cluster node types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two statically configured cluster roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Master,
    Worker,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Master => "master",
            NodeType::Worker => "worker",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static identity of the local node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub cluster: String,
    pub node: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
}

/// A cluster member as known to the directory.
///
/// Created at bootstrap and never removed at runtime; only the health
/// fields change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub node_id: String,
    pub node_type: NodeType,
    pub address: String,
    /// Reported by the node itself on the last successful contact.
    pub version: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub connected: bool,
}

impl ClusterNode {
    pub fn new(node_id: impl Into<String>, node_type: NodeType, address: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            node_type,
            address: address.into(),
            version: None,
            last_seen: None,
            connected: false,
        }
    }

    pub fn is_master(&self) -> bool {
        self.node_type == NodeType::Master
    }

    pub fn info(&self) -> NodeInfo {
        NodeInfo {
            name: self.node_id.clone(),
            node_type: self.node_type,
            version: self.version.clone().unwrap_or_default(),
            address: self.address.clone(),
        }
    }
}

/// Public description of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub version: String,
    pub address: String,
}

/// Liveness part of a health report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub last_keep_alive: Option<DateTime<Utc>>,
    pub connected: bool,
    /// Same major.minor release line as the reporting node.
    pub version_compatible: bool,
}

/// Health report for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeHealth {
    pub info: NodeInfo,
    pub status: NodeStatus,
}

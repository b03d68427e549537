//! Cluster membership, health and ruleset synchronization.
//!
//! # Architecture
//!
//! - **Node**: node roles and the shapes reported to callers
//! - **Directory**: static membership plus refreshed health state
//! - **Integrity**: ruleset fingerprints
//! - **Health**: cluster-wide queries and the master's keep-alive loop

pub mod directory;
pub mod health;
pub mod integrity;
pub mod node;

pub use directory::ClusterDirectory;
pub use health::{
    get_cluster_ruleset_sync_status, get_health_nodes, get_node_ruleset_integrity,
    get_node_ruleset_sync_status, get_nodes_info, get_ruleset_sync_status, HealthMonitor,
};
pub use integrity::{RulesetDirectories, RulesetFingerprint, RulesetIntegrity};
pub use node::{ClusterNode, NodeHealth, NodeIdentity, NodeInfo, NodeStatus, NodeType};

//! Centralized configuration for Vigil.
//!
//! Constant groups live on unit structs; the values that differ per deployment
//! are read from a JSON cluster configuration file into [`ClusterConfig`].

use crate::cluster::NodeType;
use crate::error::{Result, VigilError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Framed socket limits.
pub struct SocketConfig;

impl SocketConfig {
    /// Largest payload accepted in either direction (64MB).
    pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    /// Concurrent connections a framed server accepts before rejecting.
    pub const MAX_CONNECTIONS: usize = 512;
    /// Largest datagram accepted by a queue socket.
    pub const MAX_QUEUE_MESSAGE_SIZE: usize = 64 * 1024;
}

/// Dispatcher defaults.
pub struct DispatchConfig;

impl DispatchConfig {
    /// Per-node bound applied when `wait_for_complete` is false.
    pub const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Cluster-wide defaults.
pub struct ClusterDefaults;

impl ClusterDefaults {
    pub const CLUSTER_NAME: &'static str = "vigil";
    pub const PORT: u16 = 1516;
    /// Node name used when clustering is disabled.
    pub const STANDALONE_NODE_NAME: &'static str = "manager";
    pub const HEALTH_INTERVAL: Duration = Duration::from_secs(10);
    pub const SOCKETS_DIR: &'static str = "/var/vigil/queue/sockets";
    pub const LOGS_DIR: &'static str = "/var/vigil/logs";
}

/// Static fields stamped on every daemon envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    pub version: u32,
    pub origin_name: String,
    pub origin_module: String,
}

impl ProtocolConfig {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(origin_name: impl Into<String>, origin_module: impl Into<String>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            origin_name: origin_name.into(),
            origin_module: origin_module.into(),
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self::new("vigil-node", "cluster")
    }
}

/// One statically configured cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// `host:port` the node's cluster socket listens on.
    pub address: String,
}

/// Local socket locations and ruleset directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Unix socket serving local requests (CLI, API layer).
    pub local_socket: PathBuf,
    pub analysisd_socket: PathBuf,
    pub com_socket: PathBuf,
    pub logtest_socket: PathBuf,
    /// Datagram queue feeding events to the analysis engine.
    pub queue_socket: PathBuf,
    /// Datagram queue carrying active response commands to agents.
    pub ar_queue: PathBuf,
    /// Active response commands known to this node.
    pub ar_conf: PathBuf,
    /// Daemon log, plain format.
    pub log_file: PathBuf,
    /// Daemon log, JSON format.
    pub log_json_file: PathBuf,
    /// Directories whose files make up the ruleset fingerprint.
    pub ruleset_dirs: Vec<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let sockets = PathBuf::from(ClusterDefaults::SOCKETS_DIR);
        let logs = PathBuf::from(ClusterDefaults::LOGS_DIR);
        Self {
            local_socket: sockets.join("cluster"),
            analysisd_socket: sockets.join("analysis"),
            com_socket: sockets.join("com"),
            logtest_socket: sockets.join("logtest"),
            queue_socket: sockets.join("queue"),
            ar_queue: PathBuf::from("/var/vigil/queue/alerts/ar"),
            ar_conf: PathBuf::from("/var/vigil/etc/shared/ar.conf"),
            log_file: logs.join("vigil.log"),
            log_json_file: logs.join("vigil.json"),
            ruleset_dirs: vec![
                PathBuf::from("/var/vigil/etc/rules"),
                PathBuf::from("/var/vigil/etc/decoders"),
            ],
        }
    }
}

/// Format the daemons write their log in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

fn default_cluster_name() -> String {
    ClusterDefaults::CLUSTER_NAME.to_string()
}

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    ClusterDefaults::PORT
}

fn default_request_timeout_secs() -> u64 {
    DispatchConfig::DEFAULT_NODE_TIMEOUT.as_secs()
}

fn default_health_interval_secs() -> u64 {
    ClusterDefaults::HEALTH_INTERVAL.as_secs()
}

/// Cluster configuration as read from disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_cluster_name")]
    pub name: String,
    pub node_name: String,
    pub node_type: NodeType,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub nodes: Vec<NodeEntry>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
}

impl ClusterConfig {
    /// Configuration of a standalone manager (clustering disabled).
    pub fn standalone() -> Self {
        Self {
            name: default_cluster_name(),
            node_name: ClusterDefaults::STANDALONE_NODE_NAME.to_string(),
            node_type: NodeType::Master,
            disabled: true,
            bind_addr: default_bind_addr(),
            port: default_port(),
            nodes: Vec::new(),
            paths: PathsConfig::default(),
            log_format: LogFormat::default(),
            request_timeout_secs: default_request_timeout_secs(),
            health_interval_secs: default_health_interval_secs(),
        }
    }

    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| VigilError::io_with_path(e, path))?;
        let config: ClusterConfig = serde_json::from_str(&raw).map_err(|e| VigilError::Config {
            message: format!("Failed to parse {}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the structural rules of the node list.
    ///
    /// A disabled cluster ignores `nodes` entirely.
    pub fn validate(&self) -> Result<()> {
        if self.disabled {
            return Ok(());
        }
        if self.node_name.trim().is_empty() {
            return Err(VigilError::Config {
                message: "node_name must not be empty".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for entry in &self.nodes {
            if !seen.insert(entry.name.as_str()) {
                return Err(VigilError::Config {
                    message: format!("Duplicated node name: {}", entry.name),
                });
            }
        }

        let masters = self
            .nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Master)
            .count();
        if masters != 1 {
            return Err(VigilError::Config {
                message: format!("Expected exactly one master node, found {}", masters),
            });
        }

        match self.nodes.iter().find(|n| n.name == self.node_name) {
            Some(entry) if entry.node_type == self.node_type => Ok(()),
            Some(entry) => Err(VigilError::Config {
                message: format!(
                    "Node {} is listed as {} but configured as {}",
                    self.node_name, entry.node_type, self.node_type
                ),
            }),
            None => Err(VigilError::Config {
                message: format!("Local node {} is not in the node list", self.node_name),
            }),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_json() -> serde_json::Value {
        serde_json::json!({
            "name": "prod",
            "node_name": "master-1",
            "node_type": "master",
            "nodes": [
                {"name": "master-1", "type": "master", "address": "10.0.0.1:1516"},
                {"name": "worker-1", "type": "worker", "address": "10.0.0.2:1516"}
            ]
        })
    }

    #[test]
    fn test_parse_applies_defaults() {
        let config: ClusterConfig = serde_json::from_value(cluster_json()).unwrap();
        assert_eq!(config.port, ClusterDefaults::PORT);
        assert!(!config.disabled);
        assert_eq!(config.request_timeout(), DispatchConfig::DEFAULT_NODE_TIMEOUT);
        assert_eq!(config.log_format, LogFormat::Plain);
        assert!(config.validate().is_ok());

        let mut value = cluster_json();
        value["log_format"] = "json".into();
        value["paths"] = serde_json::json!({"log_json_file": "/tmp/vigil.json"});
        let config: ClusterConfig = serde_json::from_value(value).unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.paths.log_json_file, PathBuf::from("/tmp/vigil.json"));
        assert_eq!(config.paths.log_file, PathsConfig::default().log_file);
    }

    #[test]
    fn test_validate_rejects_two_masters() {
        let mut value = cluster_json();
        value["nodes"][1]["type"] = "master".into();
        let config: ClusterConfig = serde_json::from_value(value).unwrap();
        assert!(matches!(config.validate(), Err(VigilError::Config { .. })));
    }

    #[test]
    fn test_validate_rejects_missing_local_node() {
        let mut value = cluster_json();
        value["node_name"] = "ghost".into();
        let config: ClusterConfig = serde_json::from_value(value).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_standalone_skips_node_checks() {
        let config = ClusterConfig::standalone();
        assert!(config.disabled);
        assert_eq!(config.node_name, "manager");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cluster.json");
        std::fs::write(&path, cluster_json().to_string()).unwrap();

        let config = ClusterConfig::load(&path).unwrap();
        assert_eq!(config.name, "prod");
        assert_eq!(config.nodes.len(), 2);
    }

    #[test]
    fn test_protocol_config_defaults() {
        let protocol = ProtocolConfig::new("vigil-logtest", "logtest");
        assert_eq!(protocol.version, 1);
        assert_eq!(protocol.with_version(2).version, 2);
    }
}

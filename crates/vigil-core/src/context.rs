//! Per-node runtime context shared by every distributed function.

use crate::client::LocalClient;
use crate::cluster::{ClusterDirectory, RulesetDirectories, RulesetIntegrity};
use crate::config::{ClusterConfig, ProtocolConfig};
use crate::protocol::DaemonProtocol;
use std::sync::Arc;

/// Release of this build, reported to peers.
pub const VIGIL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything a function running on this node may need.
pub struct NodeContext {
    pub config: ClusterConfig,
    pub directory: Arc<ClusterDirectory>,
    pub client: LocalClient,
    pub ruleset: Arc<dyn RulesetIntegrity>,
}

impl NodeContext {
    /// Build the context for `config`, reading the ruleset from its
    /// configured directories.
    pub fn new(config: ClusterConfig) -> Self {
        let ruleset = Arc::new(RulesetDirectories::new(config.paths.ruleset_dirs.clone()));
        Self::with_ruleset(config, ruleset)
    }

    pub fn with_ruleset(config: ClusterConfig, ruleset: Arc<dyn RulesetIntegrity>) -> Self {
        Self::with_version(config, ruleset, VIGIL_VERSION)
    }

    /// Build a context reporting `version` instead of the crate release.
    pub fn with_version(
        config: ClusterConfig,
        ruleset: Arc<dyn RulesetIntegrity>,
        version: &str,
    ) -> Self {
        let directory = Arc::new(ClusterDirectory::from_config(&config, version));
        let protocol = DaemonProtocol::new(ProtocolConfig::new(
            directory.local_node_id().to_string(),
            "cluster",
        ));
        let client = LocalClient::new(protocol, directory.clone());
        Self {
            config,
            directory,
            client,
            ruleset,
        }
    }

    pub fn node_id(&self) -> &str {
        self.directory.local_node_id()
    }
}

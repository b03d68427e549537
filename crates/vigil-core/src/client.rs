//! Client for talking to other cluster members.
//!
//! Each call opens a fresh framed connection to the target node, sends one
//! daemon envelope and unwraps the reply. Timeouts and retries are the
//! caller's business; this layer reports every failure exactly once.

use crate::cluster::{ClusterDirectory, ClusterNode};
use crate::error::{Result, VigilError};
use crate::protocol::DaemonProtocol;
use crate::transport::FramedChannel;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// RPC client used by a node to reach its peers.
#[derive(Debug, Clone)]
pub struct LocalClient {
    protocol: DaemonProtocol,
    directory: Arc<ClusterDirectory>,
}

impl LocalClient {
    pub fn new(protocol: DaemonProtocol, directory: Arc<ClusterDirectory>) -> Self {
        Self {
            protocol,
            directory,
        }
    }

    pub fn protocol(&self) -> &DaemonProtocol {
        &self.protocol
    }

    /// Run `command` on `node` and return its reply data.
    pub async fn execute(&self, node: &ClusterNode, command: &str, parameters: Value) -> Result<Value> {
        debug!("Sending {} to node {} ({})", command, node.node_id, node.address);
        let channel = FramedChannel::tcp(node.address.clone());
        self.protocol.request(&channel, command, parameters).await
    }

    /// Run `command` on the master node.
    ///
    /// Fails with `ConnectionFailure` when no master is configured, which
    /// only happens on a misconfigured worker.
    pub async fn forward_to_master(&self, command: &str, parameters: Value) -> Result<Value> {
        let master = self
            .directory
            .master()
            .ok_or_else(|| VigilError::connection("master", "no master node configured"))?;
        self.execute(&master, command, parameters).await
    }
}

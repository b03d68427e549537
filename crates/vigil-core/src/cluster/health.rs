//! Cluster-wide health and ruleset synchronization.
//!
//! Every query here reports per node: a node that cannot be reached ends up as
//! a failed item for that node and never hides the answers of the others.

use super::integrity::RulesetFingerprint;
use super::node::ClusterNode;
use crate::context::NodeContext;
use crate::dispatch::{DistributedRequest, Dispatcher, RequestType};
use crate::error::{Result, VigilError};
use crate::results::AffectedItemsResult;
use futures::future::join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Node-service commands used by this module.
pub mod commands {
    pub const PING: &str = "ping";
    pub const GET_HEALTH: &str = "get_health";
    pub const GET_NODES: &str = "get_nodes";
    pub const GET_RULESET_INTEGRITY: &str = "get_ruleset_integrity";
    pub const RULESET_SYNC: &str = "ruleset_sync";
}

/// Registered name of the per-node sync status function.
pub const RULESET_SYNC_FUNCTION: &str = "get_ruleset_sync_status";

/// Fingerprint of `node`'s ruleset, computed here when `node` is this node.
pub async fn get_node_ruleset_integrity(
    ctx: &NodeContext,
    node: &ClusterNode,
) -> Result<RulesetFingerprint> {
    if ctx.directory.is_local(&node.node_id) {
        return ctx.ruleset.fingerprint().await;
    }
    let data = ctx
        .client
        .execute(node, commands::GET_RULESET_INTEGRITY, json!({}))
        .await?;
    Ok(serde_json::from_value(data)?)
}

/// Compare this node's ruleset against the master's.
///
/// Always yields exactly one item: `{name, synced}` when the local
/// fingerprint could be read, otherwise a failure for this node.
pub async fn get_ruleset_sync_status(
    ctx: &NodeContext,
    master_fingerprint: &RulesetFingerprint,
) -> AffectedItemsResult {
    match ctx.directory.node(ctx.node_id()) {
        Some(local) => get_node_ruleset_sync_status(ctx, &local, master_fingerprint).await,
        None => {
            let mut result = sync_status_result();
            result.add_failed(ctx.node_id(), &VigilError::node_not_found());
            result
        }
    }
}

/// Compare `node`'s ruleset against the master's, asking `node` for its
/// fingerprint when it is a peer.
///
/// An unreachable node is reported as a failed item, never as an error.
pub async fn get_node_ruleset_sync_status(
    ctx: &NodeContext,
    node: &ClusterNode,
    master_fingerprint: &RulesetFingerprint,
) -> AffectedItemsResult {
    let mut result = sync_status_result();
    let node_id = node.node_id.as_str();

    match get_node_ruleset_integrity(ctx, node).await {
        Ok(fingerprint) => {
            let synced = &fingerprint == master_fingerprint;
            debug!("Ruleset of {} synced with master: {}", node_id, synced);
            result.add_affected(json!({"name": node_id, "synced": synced}));
        }
        Err(e) => {
            warn!("Could not get the ruleset fingerprint of {}: {}", node_id, e);
            result.add_failed(node_id, &e);
        }
    }
    result
}

fn sync_status_result() -> AffectedItemsResult {
    AffectedItemsResult::with_messages(
        "Nodes ruleset synchronization status was successfully read",
        "Could not read ruleset synchronization status in some nodes",
        "Could not read ruleset synchronization status in any node",
    )
}

/// Sync status of every node against the master's current ruleset.
///
/// Runs on the master as a fan-out of [`RULESET_SYNC_FUNCTION`]; a worker
/// asks the master to do it.
pub async fn get_cluster_ruleset_sync_status(
    dispatcher: &Dispatcher,
    nodes: Option<Vec<String>>,
) -> Result<AffectedItemsResult> {
    let ctx = dispatcher.ctx();
    if !ctx.directory.is_master() {
        let data = ctx
            .client
            .forward_to_master(commands::RULESET_SYNC, json!({ "nodes": nodes }))
            .await?;
        return Ok(serde_json::from_value(data)?);
    }

    let master_fingerprint = ctx.ruleset.fingerprint().await?;
    let mut request = DistributedRequest::new(RULESET_SYNC_FUNCTION, RequestType::DistributedMaster)
        .with_argument("master_fingerprint", serde_json::to_value(&master_fingerprint)?);
    request.nodes = nodes;
    dispatcher.dispatch(request).await
}

/// Health of every live node, or of the live nodes named in `filter`.
///
/// A node is live when it is this node or answered its last contact. Names
/// in `filter` that are not live, whether unknown or disconnected, fail under
/// one shared "node does not exist" bucket.
pub async fn get_health_nodes(
    ctx: &NodeContext,
    filter: Option<&[String]>,
) -> Result<AffectedItemsResult> {
    if !ctx.directory.is_master() {
        return forward_query(ctx, commands::GET_HEALTH, filter).await;
    }

    let mut result = AffectedItemsResult::with_messages(
        "All selected nodes healthcheck information was returned",
        "Some nodes healthcheck information was not returned",
        "No healthcheck information was returned",
    );
    for report in ctx.directory.health(filter) {
        result.add_affected(serde_json::to_value(report)?);
    }
    add_missing_nodes(filter, |name| ctx.directory.is_live(name), &mut result);
    Ok(result)
}

/// Static description of every node, or of the nodes named in `filter`.
pub async fn get_nodes_info(
    ctx: &NodeContext,
    filter: Option<&[String]>,
) -> Result<AffectedItemsResult> {
    if !ctx.directory.is_master() {
        return forward_query(ctx, commands::GET_NODES, filter).await;
    }

    let mut result = AffectedItemsResult::with_messages(
        "All selected nodes information was returned",
        "Some nodes information was not returned",
        "No node information was returned",
    );
    for info in ctx.directory.nodes_info(filter) {
        result.add_affected(serde_json::to_value(info)?);
    }
    add_missing_nodes(filter, |name| ctx.directory.node(name).is_some(), &mut result);
    Ok(result)
}

async fn forward_query(
    ctx: &NodeContext,
    command: &str,
    filter: Option<&[String]>,
) -> Result<AffectedItemsResult> {
    let data = ctx
        .client
        .forward_to_master(command, json!({ "filter_node": filter }))
        .await?;
    Ok(serde_json::from_value(data)?)
}

fn add_missing_nodes(
    filter: Option<&[String]>,
    listed: impl Fn(&str) -> bool,
    result: &mut AffectedItemsResult,
) {
    let Some(filter) = filter else { return };
    let not_found = VigilError::node_not_found();
    for name in filter.iter().filter(|n| !listed(n.as_str())) {
        result.add_failed(name.clone(), &not_found);
    }
}

/// Keep-alive of workers, run by the master.
pub struct HealthMonitor {
    ctx: Arc<NodeContext>,
    timeout: Duration,
}

impl HealthMonitor {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        let timeout = ctx.config.request_timeout();
        Self { ctx, timeout }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ping every worker concurrently and record who answered.
    ///
    /// Affected items are the names of the workers that answered.
    pub async fn refresh(&self) -> AffectedItemsResult {
        let ctx = &self.ctx;
        let mut result = AffectedItemsResult::with_messages(
            "All workers answered the keep-alive",
            "Some workers did not answer the keep-alive",
            "No worker answered the keep-alive",
        );
        let parameters = json!({
            "node": ctx.node_id(),
            "version": ctx.directory.local_version(),
        });

        let workers = ctx.directory.workers();
        let pings = workers.iter().map(|worker| {
            let parameters = parameters.clone();
            async move {
                let outcome = tokio::time::timeout(
                    self.timeout,
                    ctx.client.execute(worker, commands::PING, parameters),
                )
                .await
                .unwrap_or_else(|_| Err(VigilError::Timeout(self.timeout)));
                (worker, outcome)
            }
        });

        for (worker, outcome) in join_all(pings).await {
            match outcome {
                Ok(reply) => {
                    let version = reply.get("version").and_then(Value::as_str);
                    if let Some(version) = version {
                        if !ctx.directory.is_version_compatible(version) {
                            warn!(
                                "Worker {} runs version {}, incompatible with {}",
                                worker.node_id,
                                version,
                                ctx.directory.local_version()
                            );
                        }
                    }
                    ctx.directory.record_contact(&worker.node_id, version);
                    result.add_affected(worker.node_id.clone());
                }
                Err(e) => {
                    debug!("Keep-alive to {} failed: {}", worker.node_id, e);
                    ctx.directory.record_unreachable(&worker.node_id);
                    result.add_failed(worker.node_id.clone(), &e);
                }
            }
        }
        result
    }

    /// Refresh every `interval` until `shutdown` flips to true.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!("Health monitor started (every {:?})", interval);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let result = self.refresh().await;
                    debug!(
                        "Keep-alive round: {} reachable, {} unreachable",
                        result.total_affected_items(),
                        result.total_failed_items()
                    );
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Health monitor stopped");
                        break;
                    }
                }
            }
        }
    }
}

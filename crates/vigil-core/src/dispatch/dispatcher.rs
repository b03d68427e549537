//! Request routing.
//!
//! The dispatcher turns one [`DistributedRequest`] into exactly one
//! [`AffectedItemsResult`], running the named function locally, forwarding it
//! to the master, or fanning it out over the cluster depending on the request
//! type and this node's role.
//!
//! ```text
//!                    master                    worker
//! local_master       run here                  forward to master
//! distributed_master run here + every worker   forward to master
//! local_any          run here                  run here
//! local_worker       run here                  run here
//! ```

use super::authorize::Authorizer;
use super::registry::{FunctionCall, FunctionEntry, FunctionRegistry};
use super::request_type::RequestType;
use crate::cluster::{ClusterNode, NodeType};
use crate::context::NodeContext;
use crate::error::{Result, VigilError};
use crate::results::AffectedItemsResult;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Command name distributed requests travel under between nodes.
pub const DAPI_COMMAND: &str = "dapi";

/// One logical operation as issued by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedRequest {
    /// Registered function name.
    pub function: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    pub request_type: RequestType,
    /// Lift the per-node timeout.
    #[serde(default)]
    pub wait_for_complete: bool,
    /// Resource ids checked against the authorizer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,
    /// Restrict a fan-out to these nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<String>>,
    /// Set on requests that already went through authorization on another node.
    #[serde(default)]
    pub pre_authorized: bool,
}

impl DistributedRequest {
    pub fn new(function: impl Into<String>, request_type: RequestType) -> Self {
        Self {
            function: function.into(),
            arguments: Map::new(),
            request_type,
            wait_for_complete: false,
            targets: None,
            nodes: None,
            pre_authorized: false,
        }
    }

    pub fn with_arguments(mut self, arguments: Map<String, Value>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: Value) -> Self {
        self.arguments.insert(name.into(), value);
        self
    }

    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.targets = Some(targets);
        self
    }

    pub fn with_nodes(mut self, nodes: Vec<String>) -> Self {
        self.nodes = Some(nodes);
        self
    }

    pub fn wait_for_complete(mut self, wait: bool) -> Self {
        self.wait_for_complete = wait;
        self
    }
}

/// Routes requests to the nodes that must run them.
pub struct Dispatcher {
    ctx: Arc<NodeContext>,
    registry: Arc<FunctionRegistry>,
    authorizer: Arc<dyn Authorizer>,
    node_timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher using the configured request timeout.
    pub fn new(
        ctx: Arc<NodeContext>,
        registry: Arc<FunctionRegistry>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        let node_timeout = ctx.config.request_timeout();
        Self {
            ctx,
            registry,
            authorizer,
            node_timeout,
        }
    }

    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = timeout;
        self
    }

    pub fn ctx(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn node_timeout(&self) -> Duration {
        self.node_timeout
    }

    /// Bound on a forward to the master, which may itself fan out.
    fn forward_timeout(&self) -> Duration {
        self.node_timeout * 2
    }

    /// Run `request` and fold every outcome into one result.
    ///
    /// Errors are only returned when the call as a whole cannot be answered:
    /// an unknown function, an unreachable master on a forward, or a failing
    /// single-node execution. Per-node problems during a fan-out and
    /// authorization rejections become failed items.
    pub async fn dispatch(&self, request: DistributedRequest) -> Result<AffectedItemsResult> {
        let request_id = Uuid::new_v4();
        let entry = self.registry.resolve(&request.function)?;
        info!(
            "[{}] Dispatching {} ({}) on {}",
            request_id,
            request.function,
            request.request_type,
            self.ctx.node_id()
        );

        let (call, denied) = self.authorize(entry, &request);
        let Some(call) = call else {
            debug!("[{}] Every target was rejected for {}", request_id, entry.action);
            return Ok(denied);
        };

        let executed = match (request.request_type, self.ctx.directory.node_type()) {
            (RequestType::LocalAny | RequestType::LocalWorker, _)
            | (RequestType::LocalMaster, NodeType::Master) => {
                self.execute_local(entry, call, request.wait_for_complete).await?
            }
            (RequestType::LocalMaster | RequestType::DistributedMaster, NodeType::Worker) => {
                self.forward_to_master(&request, call.targets).await?
            }
            (RequestType::DistributedMaster, NodeType::Master) => {
                self.fan_out(request_id, entry, call, &request).await
            }
        };

        debug!(
            "[{}] {} finished: {} affected, {} failed",
            request_id,
            request.function,
            executed.total_affected_items(),
            executed.total_failed_items()
        );

        let mut result = entry.messages.empty_result();
        result.extend(executed);
        result.extend(denied);
        Ok(result)
    }

    /// Split the request targets into the call to run and the rejected ids.
    ///
    /// Returns no call when the request named targets and none survived.
    fn authorize(
        &self,
        entry: &FunctionEntry,
        request: &DistributedRequest,
    ) -> (Option<FunctionCall>, AffectedItemsResult) {
        let mut denied = entry.messages.empty_result();
        let call = FunctionCall::new(request.arguments.clone());

        let Some(targets) = &request.targets else {
            return (Some(call), denied);
        };
        if request.pre_authorized {
            return (Some(call.with_targets(targets.clone())), denied);
        }

        let candidates: BTreeSet<String> = targets.iter().cloned().collect();
        let allowed = self.authorizer.filter(&entry.action, &candidates);
        let error = VigilError::PermissionDenied {
            action: entry.action.clone(),
        };
        for id in candidates.difference(&allowed) {
            denied.add_failed(id.clone(), &error);
        }

        // Keep the caller's order, dropping rejected ids and repeats.
        let mut seen = HashSet::new();
        let permitted: Vec<String> = targets
            .iter()
            .filter(|id| allowed.contains(*id) && seen.insert(id.as_str()))
            .cloned()
            .collect();

        if permitted.is_empty() && !targets.is_empty() {
            return (None, denied);
        }
        (Some(call.with_targets(permitted)), denied)
    }

    async fn execute_local(
        &self,
        entry: &FunctionEntry,
        call: FunctionCall,
        wait_for_complete: bool,
    ) -> Result<AffectedItemsResult> {
        let run = entry.function.call(self.ctx.clone(), call);
        bounded(run, (!wait_for_complete).then_some(self.node_timeout)).await
    }

    async fn forward_to_master(
        &self,
        request: &DistributedRequest,
        targets: Option<Vec<String>>,
    ) -> Result<AffectedItemsResult> {
        let forwarded = DistributedRequest {
            targets,
            pre_authorized: true,
            ..request.clone()
        };
        debug!("Forwarding {} to the master", request.function);

        let parameters = serde_json::to_value(&forwarded)?;
        let send = self.ctx.client.forward_to_master(DAPI_COMMAND, parameters);
        let data = bounded(
            send,
            (!request.wait_for_complete).then_some(self.forward_timeout()),
        )
        .await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Run on this master and every selected worker concurrently.
    ///
    /// Outcomes are merged in directory order once all branches are done.
    async fn fan_out(
        &self,
        request_id: Uuid,
        entry: &FunctionEntry,
        call: FunctionCall,
        request: &DistributedRequest,
    ) -> AffectedItemsResult {
        let directory = &self.ctx.directory;
        let mut result = AffectedItemsResult::new();

        let nodes: Vec<ClusterNode> = match &request.nodes {
            None => directory.nodes(),
            Some(names) => {
                for name in names.iter().filter(|n| directory.node(n).is_none()) {
                    result.add_failed(name.clone(), &VigilError::node_not_found());
                }
                directory
                    .nodes()
                    .into_iter()
                    .filter(|n| names.contains(&n.node_id))
                    .collect()
            }
        };

        // Workers run the call as their own local request; the bound is
        // applied here so that an expired node is reported the same way
        // whichever side noticed.
        let remote = DistributedRequest {
            request_type: RequestType::LocalAny,
            wait_for_complete: true,
            targets: call.targets.clone(),
            nodes: None,
            pre_authorized: true,
            ..request.clone()
        };
        let limit = (!request.wait_for_complete).then_some(self.node_timeout);

        let branches = nodes.iter().map(|node| {
            let call = call.clone();
            let remote = &remote;
            async move {
                let outcome = if directory.is_local(&node.node_id) {
                    bounded(entry.function.call(self.ctx.clone(), call), limit).await
                } else {
                    bounded(self.execute_remote(node, remote), limit).await
                };
                (node.node_id.as_str(), outcome)
            }
        });

        for (node_id, outcome) in join_all(branches).await {
            match outcome {
                Ok(partial) => result.extend(partial),
                Err(e) => {
                    warn!("[{}] Node {} failed: {}", request_id, node_id, e);
                    result.add_failed(node_id, &e);
                }
            }
        }
        result
    }

    async fn execute_remote(
        &self,
        node: &ClusterNode,
        request: &DistributedRequest,
    ) -> Result<AffectedItemsResult> {
        let parameters = serde_json::to_value(request)?;
        match self.ctx.client.execute(node, DAPI_COMMAND, parameters).await {
            Ok(data) => {
                self.ctx.directory.record_contact(&node.node_id, None);
                Ok(serde_json::from_value(data)?)
            }
            Err(e) => {
                if matches!(e, VigilError::ConnectionFailure { .. }) {
                    self.ctx.directory.record_unreachable(&node.node_id);
                }
                Err(e)
            }
        }
    }
}

/// Await `fut`, failing with `Timeout` once `limit` elapses.
async fn bounded<T, F>(fut: F, limit: Option<Duration>) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| VigilError::Timeout(limit))?,
        None => fut.await,
    }
}

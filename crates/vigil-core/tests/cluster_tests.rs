//! Integration tests for multi-node dispatch.
//!
//! Every test starts real framed servers on loopback ports, one per node, and
//! drives them through the public `VigilNode` interface.

use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use vigil_core::cluster::{
    get_cluster_ruleset_sync_status, get_node_ruleset_integrity, get_node_ruleset_sync_status,
};
use vigil_core::error::codes;
use vigil_core::manager::{builtin_registry, functions};
use vigil_core::{
    AffectedItemsResult, Authorizer, ClusterConfig, Endpoint, ErrorKey, ErrorKind, FrameHandler,
    FramedServer, FramedServerHandle, FunctionCall, FunctionRegistry, NodeContext, NodeEntry,
    NodeService, NodeType, Reply, RequestType, ResultMessages, RulesetFingerprint,
    RulesetIntegrity, VigilError, VigilNode, DistributedRequest,
};

const VERSION: &str = "4.14.0";

/// Frame handler whose node service is attached once every port is known.
#[derive(Default)]
struct LateService(OnceLock<Arc<NodeService>>);

#[async_trait::async_trait]
impl FrameHandler for LateService {
    async fn handle(&self, request: Vec<u8>) -> Vec<u8> {
        match self.0.get() {
            Some(service) => service.handle(request).await,
            None => Reply::failure(codes::INTERNAL, "node not ready").to_bytes(),
        }
    }
}

/// Fingerprint fixture; `None` fails like an unreadable ruleset.
struct FixedRuleset(Option<RulesetFingerprint>);

#[async_trait::async_trait]
impl RulesetIntegrity for FixedRuleset {
    async fn fingerprint(&self) -> vigil_core::Result<RulesetFingerprint> {
        self.0.clone().ok_or_else(|| VigilError::Internal {
            code: codes::INTERNAL,
            message: "Could not read ruleset".to_string(),
        })
    }
}

fn fingerprint(hash: &str) -> RulesetFingerprint {
    RulesetFingerprint::from([("rules/local_rules.xml".to_string(), hash.to_string())])
}

/// Reports the node it ran on; `worker2` never answers in time.
async fn whoami(ctx: Arc<NodeContext>, _call: FunctionCall) -> vigil_core::Result<AffectedItemsResult> {
    if ctx.node_id() == "worker2" {
        tokio::time::sleep(Duration::from_secs(30)).await;
    }
    let mut result = AffectedItemsResult::new();
    result.add_affected(json!({"name": ctx.node_id()}));
    Ok(result)
}

/// Echoes the authorized targets with the node that saw them.
async fn touch(ctx: Arc<NodeContext>, call: FunctionCall) -> vigil_core::Result<AffectedItemsResult> {
    let mut result = AffectedItemsResult::new();
    for target in call.targets.unwrap_or_default() {
        result.add_affected(json!({"id": target, "node": ctx.node_id()}));
    }
    Ok(result)
}

/// Fails identically on every node.
async fn broken(_ctx: Arc<NodeContext>, _call: FunctionCall) -> vigil_core::Result<AffectedItemsResult> {
    Err(VigilError::Internal {
        code: codes::INTERNAL,
        message: "boom".to_string(),
    })
}

async fn missing_agent(
    _ctx: Arc<NodeContext>,
    _call: FunctionCall,
) -> vigil_core::Result<AffectedItemsResult> {
    Err(VigilError::ResourceNotFound {
        code: 1701,
        message: "Agent does not exist".to_string(),
    })
}

fn registry() -> FunctionRegistry {
    let mut registry = builtin_registry();
    registry
        .register_fn(
            "whoami",
            "cluster:read",
            ResultMessages::new("All nodes answered", "Some nodes did not answer", "No node answered"),
            whoami,
        )
        .register_fn(
            "touch",
            "agent:modify",
            ResultMessages::new("All touched", "Some not touched", "None touched"),
            touch,
        )
        .register_fn(
            "broken",
            "cluster:read",
            ResultMessages::new("All nodes answered", "Some nodes did not answer", "No node answered"),
            broken,
        )
        .register_fn(
            "missing_agent",
            "agent:read",
            ResultMessages::new("All agents found", "Some agents not found", "No agent found"),
            missing_agent,
        );
    registry
}

struct NodeSpec {
    name: &'static str,
    node_type: NodeType,
    ruleset: Option<RulesetFingerprint>,
    authorizer: Option<Arc<dyn Authorizer>>,
}

impl NodeSpec {
    fn master() -> Self {
        Self::new("master", NodeType::Master)
    }

    fn worker(name: &'static str) -> Self {
        Self::new(name, NodeType::Worker)
    }

    fn new(name: &'static str, node_type: NodeType) -> Self {
        Self {
            name,
            node_type,
            ruleset: Some(fingerprint("h1")),
            authorizer: None,
        }
    }

    fn ruleset(mut self, ruleset: Option<RulesetFingerprint>) -> Self {
        self.ruleset = ruleset;
        self
    }

    fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }
}

struct TestCluster {
    nodes: Vec<VigilNode>,
    handles: Vec<FramedServerHandle>,
}

impl TestCluster {
    async fn start(specs: Vec<NodeSpec>, timeout: Duration) -> Self {
        let mut slots = Vec::new();
        let mut handles = Vec::new();
        let mut entries = Vec::new();

        for spec in &specs {
            let slot = Arc::new(LateService::default());
            let handle = FramedServer::bind_tcp("127.0.0.1:0", slot.clone()).await.unwrap();
            entries.push(NodeEntry {
                name: spec.name.to_string(),
                node_type: spec.node_type,
                address: tcp_addr(handle.endpoint()),
            });
            slots.push(slot);
            handles.push(handle);
        }

        let mut nodes = Vec::new();
        for (spec, slot) in specs.into_iter().zip(&slots) {
            let mut builder = VigilNode::builder(config(spec.name, spec.node_type, entries.clone()))
                .with_registry(registry())
                .with_ruleset(Arc::new(FixedRuleset(spec.ruleset)))
                .with_node_timeout(timeout)
                .with_version(VERSION);
            if let Some(authorizer) = spec.authorizer {
                builder = builder.with_authorizer(authorizer);
            }
            let node = builder.build().unwrap();
            assert!(slot.0.set(node.service().clone()).is_ok());
            nodes.push(node);
        }

        Self { nodes, handles }
    }

    fn node(&self, name: &str) -> &VigilNode {
        self.nodes
            .iter()
            .find(|n| n.ctx().node_id() == name)
            .unwrap()
    }
}

impl Drop for TestCluster {
    fn drop(&mut self) {
        for handle in &mut self.handles {
            handle.shutdown();
        }
    }
}

fn config(name: &str, node_type: NodeType, nodes: Vec<NodeEntry>) -> ClusterConfig {
    let mut config = ClusterConfig::standalone();
    config.disabled = false;
    config.name = "vigil-test".to_string();
    config.node_name = name.to_string();
    config.node_type = node_type;
    config.nodes = nodes;
    config
}

fn tcp_addr(endpoint: &Endpoint) -> String {
    match endpoint {
        Endpoint::Tcp(addr) => addr.clone(),
        #[cfg(unix)]
        other => panic!("unexpected endpoint {}", other),
    }
}

fn names(result: &AffectedItemsResult) -> Vec<String> {
    result
        .affected_items()
        .iter()
        .map(|item| item["name"].as_str().unwrap_or_default().to_string())
        .collect()
}

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_fan_out_with_one_slow_worker() {
    let cluster = TestCluster::start(
        vec![
            NodeSpec::master(),
            NodeSpec::worker("worker1"),
            NodeSpec::worker("worker2"),
            NodeSpec::worker("worker3"),
        ],
        Duration::from_millis(500),
    )
    .await;

    let request = DistributedRequest::new("whoami", RequestType::DistributedMaster)
        .with_nodes(ids(&["worker1", "worker2", "worker3"]));
    let result = cluster.node("master").dispatch(request).await.unwrap();

    assert_eq!(result.total_affected_items(), 2);
    assert_eq!(result.total_failed_items(), 1);
    assert_eq!(result.failed_items().len(), 1);
    let timeout = ErrorKey::new(ErrorKind::Timeout, codes::TIMEOUT, "");
    assert_eq!(
        result.failed_ids(&timeout).unwrap().iter().collect::<Vec<_>>(),
        vec!["worker2"]
    );
    assert_eq!(result.message(), "Some nodes did not answer");
    // Merged in directory order.
    assert_eq!(names(&result), vec!["worker1", "worker3"]);
}

#[tokio::test]
async fn test_fan_out_includes_master_and_reports_unknown_nodes() {
    let cluster = TestCluster::start(
        vec![NodeSpec::master(), NodeSpec::worker("worker1"), NodeSpec::worker("worker3")],
        Duration::from_secs(5),
    )
    .await;

    let result = cluster
        .node("master")
        .dispatch(DistributedRequest::new("whoami", RequestType::DistributedMaster))
        .await
        .unwrap();
    assert_eq!(names(&result), vec!["master", "worker1", "worker3"]);
    assert_eq!(result.render().message, "All nodes answered");

    let result = cluster
        .node("master")
        .dispatch(
            DistributedRequest::new("whoami", RequestType::DistributedMaster)
                .with_nodes(ids(&["worker1", "worker9"])),
        )
        .await
        .unwrap();
    assert_eq!(names(&result), vec!["worker1"]);
    let rendered = result.render();
    assert_eq!(rendered.data.failed_items[0].error.code, codes::NODE_NOT_FOUND);
    assert_eq!(rendered.data.failed_items[0].id, vec!["worker9"]);
}

#[tokio::test]
async fn test_worker_forwards_to_master() {
    let cluster = TestCluster::start(
        vec![NodeSpec::master(), NodeSpec::worker("worker1"), NodeSpec::worker("worker2")],
        Duration::from_millis(500),
    )
    .await;
    let worker = cluster.node("worker1");

    let result = worker
        .dispatch(DistributedRequest::new(functions::GET_NODE, RequestType::LocalMaster))
        .await
        .unwrap();
    assert_eq!(result.affected_items()[0]["node"], "master");

    // The master fans out; worker2 times out there and is reported back here.
    let result = worker
        .dispatch(DistributedRequest::new("whoami", RequestType::DistributedMaster))
        .await
        .unwrap();
    assert_eq!(names(&result), vec!["master", "worker1"]);
    assert_eq!(result.total_failed_items(), 1);
    assert_eq!(result.failed_items()[0].error.kind, ErrorKind::Timeout);

    let result = worker
        .dispatch(DistributedRequest::new(functions::GET_NODE, RequestType::LocalAny))
        .await
        .unwrap();
    assert_eq!(result.affected_items()[0]["node"], "worker1");
}

#[tokio::test]
async fn test_authorization_happens_once() {
    let only_001 = |_: &str, candidates: &BTreeSet<String>| {
        candidates
            .iter()
            .filter(|id| id.as_str() == "001")
            .cloned()
            .collect::<BTreeSet<String>>()
    };
    let deny_all = |_: &str, _: &BTreeSet<String>| BTreeSet::<String>::new();

    let cluster = TestCluster::start(
        vec![
            NodeSpec::master().authorizer(Arc::new(deny_all)),
            NodeSpec::worker("worker1").authorizer(Arc::new(only_001)),
        ],
        Duration::from_secs(5),
    )
    .await;

    let request = DistributedRequest::new("touch", RequestType::LocalMaster)
        .with_targets(ids(&["001", "002", "003"]));
    let result = cluster.node("worker1").dispatch(request).await.unwrap();

    assert_eq!(result.affected_items(), &[json!({"id": "001", "node": "master"})]);
    let denied = ErrorKey::new(ErrorKind::PermissionDenied, codes::PERMISSION_DENIED, "");
    assert_eq!(
        result.failed_ids(&denied).unwrap().iter().collect::<Vec<_>>(),
        vec!["002", "003"]
    );
    assert_eq!(result.message(), "Some not touched");
}

#[tokio::test]
async fn test_same_error_on_every_node_is_one_group() {
    let cluster = TestCluster::start(
        vec![NodeSpec::master(), NodeSpec::worker("worker1"), NodeSpec::worker("worker3")],
        Duration::from_secs(5),
    )
    .await;

    let result = cluster
        .node("master")
        .dispatch(DistributedRequest::new("broken", RequestType::DistributedMaster))
        .await
        .unwrap();

    assert_eq!(result.total_affected_items(), 0);
    assert_eq!(result.total_failed_items(), 3);
    assert_eq!(result.failed_items().len(), 1);
    let group = &result.failed_items()[0];
    assert_eq!(group.error.kind, ErrorKind::Internal);
    assert_eq!(group.error.code, codes::INTERNAL);
    assert_eq!(group.error.message, "boom");
    assert_eq!(
        group.id.iter().collect::<Vec<_>>(),
        vec!["master", "worker1", "worker3"]
    );
    assert_eq!(result.message(), "No node answered");
}

#[tokio::test]
async fn test_remote_errors_keep_their_kind() {
    let cluster = TestCluster::start(
        vec![NodeSpec::master(), NodeSpec::worker("worker1")],
        Duration::from_secs(5),
    )
    .await;

    // Raised on the master, surfaced on the worker that forwarded the call.
    let err = cluster
        .node("worker1")
        .dispatch(DistributedRequest::new("missing_agent", RequestType::LocalMaster))
        .await
        .unwrap_err();
    match err {
        VigilError::ResourceNotFound { code, message } => {
            assert_eq!(code, 1701);
            assert_eq!(message, "Agent does not exist");
        }
        other => panic!("expected ResourceNotFound, got {:?}", other),
    }

    // A missing argument is rejected locally on the master and remotely on
    // the worker; both land in the same validation group.
    let result = cluster
        .node("master")
        .dispatch(DistributedRequest::new(
            functions::GET_RULESET_SYNC_STATUS,
            RequestType::DistributedMaster,
        ))
        .await
        .unwrap();
    assert_eq!(result.failed_items().len(), 1);
    let group = &result.failed_items()[0];
    assert_eq!(group.error.kind, ErrorKind::Validation);
    assert_eq!(group.error.code, codes::VALIDATION);
    assert_eq!(group.id.iter().collect::<Vec<_>>(), vec!["master", "worker1"]);
}

#[tokio::test]
async fn test_unreachable_master_is_a_hard_failure() {
    let entries = vec![
        NodeEntry {
            name: "master".into(),
            node_type: NodeType::Master,
            address: "127.0.0.1:1".into(),
        },
        NodeEntry {
            name: "worker1".into(),
            node_type: NodeType::Worker,
            address: "127.0.0.1:2".into(),
        },
    ];
    let worker = VigilNode::builder(config("worker1", NodeType::Worker, entries))
        .with_registry(registry())
        .with_ruleset(Arc::new(FixedRuleset(None)))
        .build()
        .unwrap();

    let err = worker
        .dispatch(DistributedRequest::new(functions::GET_NODE, RequestType::LocalMaster))
        .await
        .unwrap_err();
    assert!(matches!(err, VigilError::ConnectionFailure { .. }));

    let err = vigil_core::cluster::get_health_nodes(worker.ctx(), None)
        .await
        .unwrap_err();
    assert_eq!(err.to_error_code(), codes::CONNECTION_FAILURE);
}

#[tokio::test]
async fn test_cluster_ruleset_sync_status() {
    let cluster = TestCluster::start(
        vec![
            NodeSpec::master(),
            NodeSpec::worker("worker1"),
            NodeSpec::worker("worker2").ruleset(Some(fingerprint("h2"))),
            NodeSpec::worker("worker3").ruleset(None),
        ],
        Duration::from_secs(5),
    )
    .await;

    let master = cluster.node("master");
    let result = get_cluster_ruleset_sync_status(master.dispatcher(), None)
        .await
        .unwrap();

    let synced: Vec<(String, bool)> = result
        .affected_items()
        .iter()
        .map(|item| {
            (
                item["name"].as_str().unwrap().to_string(),
                item["synced"].as_bool().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        synced,
        vec![
            ("master".to_string(), true),
            ("worker1".to_string(), true),
            ("worker2".to_string(), false),
        ]
    );
    assert_eq!(result.total_failed_items(), 1);
    assert_eq!(result.failed_items()[0].error.code, codes::INTERNAL);
    assert!(result.failed_items()[0].id.contains("worker3"));
    assert_eq!(
        result.message(),
        "Could not read ruleset synchronization status in some nodes"
    );

    // A worker gets the same answer through the master.
    let from_worker = get_cluster_ruleset_sync_status(cluster.node("worker1").dispatcher(), None)
        .await
        .unwrap();
    assert_eq!(from_worker.render(), result.render());
}

#[tokio::test]
async fn test_ruleset_of_a_peer() {
    let cluster = TestCluster::start(
        vec![
            NodeSpec::master(),
            NodeSpec::worker("worker2").ruleset(Some(fingerprint("h2"))),
        ],
        Duration::from_secs(5),
    )
    .await;
    let master = cluster.node("master");
    let worker2 = master.ctx().directory.node("worker2").unwrap();

    let remote = get_node_ruleset_integrity(master.ctx(), &worker2).await.unwrap();
    assert_eq!(remote, fingerprint("h2"));

    let status = get_node_ruleset_sync_status(master.ctx(), &worker2, &fingerprint("h1")).await;
    assert_eq!(status.affected_items(), &[json!({"name": "worker2", "synced": false})]);
    let status = get_node_ruleset_sync_status(master.ctx(), &worker2, &fingerprint("h2")).await;
    assert_eq!(status.affected_items(), &[json!({"name": "worker2", "synced": true})]);
    assert_eq!(status.total_failed_items(), 0);
}

#[tokio::test]
async fn test_health_after_keep_alive() {
    let cluster = TestCluster::start(
        vec![NodeSpec::master(), NodeSpec::worker("worker1"), NodeSpec::worker("worker3")],
        Duration::from_secs(5),
    )
    .await;
    let master = cluster.node("master");

    let missing = ErrorKey::new(ErrorKind::ResourceNotFound, codes::NODE_NOT_FOUND, "");

    // Workers that never answered are not listed.
    let before = vigil_core::cluster::get_health_nodes(master.ctx(), None)
        .await
        .unwrap();
    assert_eq!(before.total_affected_items(), 1);
    assert_eq!(before.affected_items()[0]["info"]["name"], "master");
    let asked = ids(&["worker1"]);
    let before = vigil_core::cluster::get_health_nodes(master.ctx(), Some(&asked))
        .await
        .unwrap();
    assert_eq!(before.total_affected_items(), 0);
    assert!(before.failed_ids(&missing).unwrap().contains("worker1"));

    let refreshed = vigil_core::HealthMonitor::new(master.ctx().clone()).refresh().await;
    assert_eq!(refreshed.total_affected_items(), 2);

    // Ask through a worker to exercise the forward as well.
    let filter = ids(&["worker1", "worker3", "ghost"]);
    let health = vigil_core::cluster::get_health_nodes(cluster.node("worker1").ctx(), Some(&filter))
        .await
        .unwrap();
    assert_eq!(health.total_affected_items(), 2);
    for item in health.affected_items() {
        assert_eq!(item["status"]["connected"], true);
        assert_eq!(item["status"]["version_compatible"], true);
        assert_eq!(item["info"]["version"], VERSION);
    }
    assert!(health.failed_ids(&missing).unwrap().contains("ghost"));

    // The worker heard from the master during the keep-alive.
    let master_seen = cluster
        .node("worker1")
        .ctx()
        .directory
        .node("master")
        .unwrap();
    assert!(master_seen.last_seen.is_some());
}

#[cfg(unix)]
#[tokio::test]
async fn test_local_socket_serves_dapi() {
    use vigil_core::{DaemonProtocol, FramedChannel, ProtocolConfig};

    let dir = tempfile::TempDir::new().unwrap();
    let mut config = ClusterConfig::standalone();
    config.paths.local_socket = dir.path().join("cluster");
    let node = VigilNode::builder(config)
        .with_ruleset(Arc::new(FixedRuleset(Some(fingerprint("h1")))))
        .build()
        .unwrap();
    let mut handle = node.serve_local().await.unwrap();

    let protocol = DaemonProtocol::new(ProtocolConfig::new("api", "api"));
    let channel = FramedChannel::unix(dir.path().join("cluster"));
    let request = DistributedRequest::new(functions::GET_STATUS, RequestType::LocalAny);
    let data: Value = protocol
        .request(&channel, "dapi", serde_json::to_value(&request).unwrap())
        .await
        .unwrap();
    let result: AffectedItemsResult = serde_json::from_value(data).unwrap();
    assert_eq!(result.affected_items(), &[json!({"enabled": "no", "running": "no"})]);

    handle.shutdown();
    assert!(!dir.path().join("cluster").exists());
}

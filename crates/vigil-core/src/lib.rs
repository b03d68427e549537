//! Vigil Core - control plane of a clustered host-monitoring manager.
//!
//! A Vigil cluster is one master and any number of workers. This crate lets a
//! single logical operation (reload the ruleset, read node health, check
//! ruleset drift) be issued once, routed to the right node(s) over the framed
//! socket protocol, run in parallel where needed, and folded back into one
//! [`AffectedItemsResult`] reporting per-item success and failure.
//!
//! # Example
//!
//! ```rust,ignore
//! use vigil_core::{ClusterConfig, DistributedRequest, RequestType, VigilNode};
//!
//! #[tokio::main]
//! async fn main() -> vigil_core::Result<()> {
//!     let node = VigilNode::new(ClusterConfig::load("/var/vigil/etc/cluster.json")?)?;
//!     let _server = node.serve_cluster("0.0.0.0:1516").await?;
//!
//!     let result = node
//!         .dispatch(DistributedRequest::new("get_health_nodes", RequestType::LocalMaster))
//!         .await?;
//!     println!("{}", result.render().message);
//!     Ok(())
//! }
//! ```

pub mod active_response;
pub mod client;
pub mod cluster;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod logs;
pub mod logtest;
pub mod manager;
pub mod protocol;
pub mod results;
pub mod transport;

mod api;

// Re-export commonly used types
pub use api::{VigilNode, VigilNodeBuilder};
pub use client::LocalClient;
pub use cluster::{
    ClusterDirectory, ClusterNode, HealthMonitor, NodeHealth, NodeIdentity, NodeInfo, NodeType,
    RulesetDirectories, RulesetFingerprint, RulesetIntegrity,
};
pub use config::{
    ClusterConfig, DispatchConfig, LogFormat, NodeEntry, PathsConfig, ProtocolConfig, SocketConfig,
};
pub use context::{NodeContext, VIGIL_VERSION};
pub use dispatch::{
    ActionPolicy, AllowAll, Authorizer, Dispatcher, DistributedFunction, DistributedRequest,
    FunctionCall, FunctionRegistry, NodeService, RequestType, ResultMessages,
};
pub use error::{ErrorKey, ErrorKind, Result, VigilError};
pub use logtest::LogtestClient;
pub use protocol::{CommandReply, DaemonProtocol, Envelope, Reply};
pub use results::{AffectedItemsResult, RenderedResult};
pub use transport::{
    Endpoint, FrameHandler, FramedChannel, FramedServer, FramedServerHandle, QueueSocket,
};

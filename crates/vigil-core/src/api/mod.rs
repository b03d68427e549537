//! Node facade tying context, dispatcher and servers together.

mod builder;

pub use builder::VigilNodeBuilder;

use crate::cluster::HealthMonitor;
use crate::config::ClusterConfig;
use crate::context::NodeContext;
use crate::dispatch::{Dispatcher, DistributedRequest, NodeService};
use crate::error::Result;
use crate::results::AffectedItemsResult;
use crate::transport::{FramedServer, FramedServerHandle};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// One cluster member.
///
/// Owns the node context and dispatcher and knows how to expose them on the
/// cluster port and the local socket.
pub struct VigilNode {
    ctx: Arc<NodeContext>,
    dispatcher: Arc<Dispatcher>,
    service: Arc<NodeService>,
}

impl VigilNode {
    pub fn builder(config: ClusterConfig) -> VigilNodeBuilder {
        VigilNodeBuilder::new(config)
    }

    /// Node with built-in functions and no authorization restrictions.
    pub fn new(config: ClusterConfig) -> Result<Self> {
        VigilNodeBuilder::new(config).build()
    }

    pub fn ctx(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn service(&self) -> &Arc<NodeService> {
        &self.service
    }

    pub async fn dispatch(&self, request: DistributedRequest) -> Result<AffectedItemsResult> {
        self.dispatcher.dispatch(request).await
    }

    /// Serve cluster traffic on `addr`.
    pub async fn serve_cluster(&self, addr: &str) -> Result<FramedServerHandle> {
        FramedServer::bind_tcp(addr, self.service.clone()).await
    }

    /// Serve local requests on the configured Unix socket.
    #[cfg(unix)]
    pub async fn serve_local(&self) -> Result<FramedServerHandle> {
        FramedServer::bind_unix(&self.ctx.config.paths.local_socket, self.service.clone()).await
    }

    /// Start the keep-alive loop on a master; workers have nothing to watch.
    pub fn spawn_health_monitor(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if !self.ctx.directory.is_master() || !self.ctx.directory.is_enabled() {
            return None;
        }
        let interval = self.ctx.config.health_interval();
        let monitor = HealthMonitor::new(self.ctx.clone());
        info!("Starting keep-alive of {} workers", self.ctx.directory.workers().len());
        Some(tokio::spawn(monitor.run(interval, shutdown)))
    }
}

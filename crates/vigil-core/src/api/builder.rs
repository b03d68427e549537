//! Builder for configuring a [`VigilNode`].

use super::VigilNode;
use crate::cluster::{RulesetDirectories, RulesetIntegrity};
use crate::config::ClusterConfig;
use crate::context::{NodeContext, VIGIL_VERSION};
use crate::dispatch::{AllowAll, Authorizer, Dispatcher, FunctionRegistry, NodeService};
use crate::error::Result;
use crate::manager::builtin_registry;
use std::sync::Arc;
use std::time::Duration;

/// Builder for configuring a [`VigilNode`].
///
/// # Example
///
/// ```rust,ignore
/// use vigil_core::{ClusterConfig, VigilNode};
///
/// let node = VigilNode::builder(ClusterConfig::load("/var/vigil/etc/cluster.json")?)
///     .with_node_timeout(Duration::from_secs(5))
///     .build()?;
/// ```
pub struct VigilNodeBuilder {
    config: ClusterConfig,
    ruleset: Option<Arc<dyn RulesetIntegrity>>,
    authorizer: Arc<dyn Authorizer>,
    registry: Option<FunctionRegistry>,
    node_timeout: Option<Duration>,
    version: String,
}

impl VigilNodeBuilder {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            ruleset: None,
            authorizer: Arc::new(AllowAll),
            registry: None,
            node_timeout: None,
            version: VIGIL_VERSION.to_string(),
        }
    }

    /// Source of the local ruleset fingerprint.
    ///
    /// Default: the configured ruleset directories.
    pub fn with_ruleset(mut self, ruleset: Arc<dyn RulesetIntegrity>) -> Self {
        self.ruleset = Some(ruleset);
        self
    }

    /// Default: [`AllowAll`].
    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    /// Replace the built-in functions.
    pub fn with_registry(mut self, registry: FunctionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Per-node bound for requests without `wait_for_complete`.
    ///
    /// Default: the configured `request_timeout_secs`.
    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = Some(timeout);
        self
    }

    /// Release reported to peers. Default: this crate's version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Validate the configuration and assemble the node.
    pub fn build(self) -> Result<VigilNode> {
        self.config.validate()?;

        let ruleset: Arc<dyn RulesetIntegrity> = match self.ruleset {
            Some(ruleset) => ruleset,
            None => Arc::new(RulesetDirectories::new(self.config.paths.ruleset_dirs.clone())),
        };
        let ctx = Arc::new(NodeContext::with_version(self.config, ruleset, &self.version));

        let registry = Arc::new(self.registry.unwrap_or_else(builtin_registry));
        let mut dispatcher = Dispatcher::new(ctx.clone(), registry, self.authorizer);
        if let Some(timeout) = self.node_timeout {
            dispatcher = dispatcher.with_node_timeout(timeout);
        }
        let dispatcher = Arc::new(dispatcher);
        let service = Arc::new(NodeService::new(dispatcher.clone()));

        Ok(VigilNode {
            ctx,
            dispatcher,
            service,
        })
    }
}

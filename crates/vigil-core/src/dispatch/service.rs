//! Receiving side of cluster traffic.
//!
//! Every node serves a [`NodeService`] on its cluster port (and its local
//! socket). The service decodes one envelope per connection, runs the command
//! and always answers with a transport [`Reply`]; errors never escape as a
//! dropped connection.

use super::dispatcher::{Dispatcher, DistributedRequest, DAPI_COMMAND};
use crate::cluster::health::{self, commands};
use crate::error::{Result, VigilError};
use crate::protocol::{decode_envelope, Envelope, Reply};
use crate::transport::FrameHandler;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, error};

/// Command handler bound to one node's dispatcher.
pub struct NodeService {
    dispatcher: Arc<Dispatcher>,
}

impl NodeService {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    async fn handle_envelope(&self, envelope: Envelope) -> Result<Value> {
        debug!(
            "Command {} from {} ({})",
            envelope.command, envelope.origin.name, envelope.origin.module
        );
        let params = envelope.parameters;
        let ctx = self.dispatcher.ctx();

        match envelope.command.as_str() {
            DAPI_COMMAND => {
                let request: DistributedRequest = serde_json::from_value(Value::Object(params))?;
                let result = self.dispatcher.dispatch(request).await?;
                Ok(serde_json::to_value(result)?)
            }

            commands::PING => {
                if let Some(node) = params.get("node").and_then(Value::as_str) {
                    let version = params.get("version").and_then(Value::as_str);
                    ctx.directory.record_contact(node, version);
                }
                Ok(json!({
                    "node": ctx.node_id(),
                    "type": ctx.directory.node_type(),
                    "version": ctx.directory.local_version(),
                }))
            }

            commands::GET_HEALTH => {
                let filter = filter_param(&params, "filter_node")?;
                let result = health::get_health_nodes(ctx, filter.as_deref()).await?;
                Ok(serde_json::to_value(result)?)
            }

            commands::GET_NODES => {
                let filter = filter_param(&params, "filter_node")?;
                let result = health::get_nodes_info(ctx, filter.as_deref()).await?;
                Ok(serde_json::to_value(result)?)
            }

            commands::GET_RULESET_INTEGRITY => {
                let fingerprint = ctx.ruleset.fingerprint().await?;
                Ok(serde_json::to_value(fingerprint)?)
            }

            commands::RULESET_SYNC => {
                let nodes = filter_param(&params, "nodes")?;
                let result = health::get_cluster_ruleset_sync_status(&self.dispatcher, nodes).await?;
                Ok(serde_json::to_value(result)?)
            }

            other => Err(VigilError::Validation {
                field: "command".to_string(),
                message: format!("Unknown command '{}'", other),
            }),
        }
    }
}

#[async_trait::async_trait]
impl FrameHandler for NodeService {
    async fn handle(&self, request: Vec<u8>) -> Vec<u8> {
        let reply = match decode_envelope(&request) {
            Ok(envelope) => {
                let command = envelope.command.clone();
                match self.handle_envelope(envelope).await {
                    Ok(data) => Reply::success(data),
                    Err(e) => {
                        error!("Command {} failed: {}", command, e);
                        Reply::from_error(&e)
                    }
                }
            }
            Err(e) => {
                error!("Rejecting undecodable request: {}", e);
                Reply::from_error(&e)
            }
        };
        reply.to_bytes()
    }
}

/// Optional list of node names; `null` and absent both mean "no filter".
fn filter_param(params: &Map<String, Value>, name: &str) -> Result<Option<Vec<String>>> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
            VigilError::Validation {
                field: name.to_string(),
                message: e.to_string(),
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{RulesetFingerprint, RulesetIntegrity};
    use crate::config::{ClusterConfig, ProtocolConfig};
    use crate::context::NodeContext;
    use crate::dispatch::{AllowAll, FunctionRegistry};
    use crate::error::{codes, ErrorKind};
    use crate::protocol::DaemonProtocol;

    struct OneFile;

    #[async_trait::async_trait]
    impl RulesetIntegrity for OneFile {
        async fn fingerprint(&self) -> Result<RulesetFingerprint> {
            Ok(RulesetFingerprint::from([(
                "rules/local_rules.xml".to_string(),
                "ab12".to_string(),
            )]))
        }
    }

    fn service() -> NodeService {
        let ctx = Arc::new(NodeContext::with_ruleset(
            ClusterConfig::standalone(),
            Arc::new(OneFile),
        ));
        let registry = Arc::new(FunctionRegistry::new());
        NodeService::new(Arc::new(Dispatcher::new(ctx, registry, Arc::new(AllowAll))))
    }

    async fn call(service: &NodeService, command: &str, parameters: Value) -> Result<Value> {
        let protocol = DaemonProtocol::new(ProtocolConfig::new("test", "cluster"));
        let request = protocol.wrap(command, parameters).unwrap();
        let reply = service.handle(request).await;
        protocol.unwrap(&reply)
    }

    #[tokio::test]
    async fn test_ping() {
        let service = service();
        let data = call(&service, "ping", json!({})).await.unwrap();
        assert_eq!(data["node"], "manager");
        assert_eq!(data["type"], "master");
    }

    #[tokio::test]
    async fn test_ruleset_integrity() {
        let data = call(&service(), "get_ruleset_integrity", json!({})).await.unwrap();
        assert_eq!(data, json!({"rules/local_rules.xml": "ab12"}));
    }

    #[tokio::test]
    async fn test_unknown_command_and_function() {
        let service = service();
        let err = call(&service, "restart", json!({})).await.unwrap_err();
        assert!(matches!(err, VigilError::Validation { ref field, .. } if field == "command"));

        let err = call(
            &service,
            "dapi",
            json!({"function": "nope", "request_type": "local_any"}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_error_code(), codes::VALIDATION);
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_garbage_is_answered() {
        let reply = service().handle(b"not json".to_vec()).await;
        let reply: Reply = serde_json::from_slice(&reply).unwrap();
        assert_eq!(reply.error, codes::JSON);
        assert_eq!(reply.kind, Some(ErrorKind::Json));
    }

    #[tokio::test]
    async fn test_bad_filter_is_validation_error() {
        let err = call(&service(), "get_nodes", json!({"filter_node": 3})).await.unwrap_err();
        assert!(matches!(err, VigilError::Validation { ref field, .. } if field == "filter_node"));
    }
}

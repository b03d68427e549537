//! Named distributed functions.
//!
//! Requests name the function to run rather than carrying code, so every node
//! resolves the same name to the same implementation. Each entry also carries
//! the authorization action checked before it runs and the summary templates
//! its result is rendered with.

use crate::context::NodeContext;
use crate::error::{Result, VigilError};
use crate::results::AffectedItemsResult;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Arguments handed to a distributed function.
#[derive(Debug, Clone, Default)]
pub struct FunctionCall {
    pub arguments: Map<String, Value>,
    /// Resource ids that survived authorization, if the request named any.
    pub targets: Option<Vec<String>>,
}

impl FunctionCall {
    pub fn new(arguments: Map<String, Value>) -> Self {
        Self {
            arguments,
            targets: None,
        }
    }

    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.targets = Some(targets);
        self
    }

    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name).filter(|v| !v.is_null())
    }

    pub fn str_arg(&self, name: &str) -> Option<&str> {
        self.arg(name).and_then(Value::as_str)
    }

    pub fn bool_arg(&self, name: &str) -> Option<bool> {
        self.arg(name).and_then(Value::as_bool)
    }

    /// A list argument; a single string is accepted as a one-element list.
    pub fn list_arg(&self, name: &str) -> Result<Option<Vec<String>>> {
        match self.arg(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(vec![s.clone()])),
            Some(Value::Array(values)) => values
                .iter()
                .map(|v| {
                    v.as_str().map(str::to_string).ok_or_else(|| VigilError::Validation {
                        field: name.to_string(),
                        message: format!("expected a list of strings, found {}", v),
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(other) => Err(VigilError::Validation {
                field: name.to_string(),
                message: format!("expected a list of strings, found {}", other),
            }),
        }
    }

    pub fn require_str(&self, name: &str) -> Result<&str> {
        self.str_arg(name).ok_or_else(|| VigilError::Validation {
            field: name.to_string(),
            message: "missing required string argument".to_string(),
        })
    }
}

/// A function the dispatcher can run on any node.
#[async_trait::async_trait]
pub trait DistributedFunction: Send + Sync + 'static {
    async fn call(&self, ctx: Arc<NodeContext>, call: FunctionCall) -> Result<AffectedItemsResult>;
}

struct FnFunction<F>(F);

#[async_trait::async_trait]
impl<F, Fut> DistributedFunction for FnFunction<F>
where
    F: Fn(Arc<NodeContext>, FunctionCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AffectedItemsResult>> + Send + 'static,
{
    async fn call(&self, ctx: Arc<NodeContext>, call: FunctionCall) -> Result<AffectedItemsResult> {
        (self.0)(ctx, call).await
    }
}

/// Summary templates of a function's result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultMessages {
    pub all: String,
    pub some: String,
    pub none: String,
}

impl ResultMessages {
    pub fn new(all: impl Into<String>, some: impl Into<String>, none: impl Into<String>) -> Self {
        Self {
            all: all.into(),
            some: some.into(),
            none: none.into(),
        }
    }

    pub fn empty_result(&self) -> AffectedItemsResult {
        AffectedItemsResult::with_messages(&self.all, &self.some, &self.none)
    }
}

/// A registered function.
#[derive(Clone)]
pub struct FunctionEntry {
    pub name: String,
    /// Authorization action checked against the request targets.
    pub action: String,
    pub messages: ResultMessages,
    pub function: Arc<dyn DistributedFunction>,
}

impl std::fmt::Debug for FunctionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionEntry")
            .field("name", &self.name)
            .field("action", &self.action)
            .finish_non_exhaustive()
    }
}

/// Name to function lookup shared by every node of a cluster.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    entries: HashMap<String, FunctionEntry>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `function` under `name`, replacing any previous entry.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        action: impl Into<String>,
        messages: ResultMessages,
        function: Arc<dyn DistributedFunction>,
    ) -> &mut Self {
        let name = name.into();
        self.entries.insert(
            name.clone(),
            FunctionEntry {
                name,
                action: action.into(),
                messages,
                function,
            },
        );
        self
    }

    /// Register an async closure.
    pub fn register_fn<F, Fut>(
        &mut self,
        name: impl Into<String>,
        action: impl Into<String>,
        messages: ResultMessages,
        function: F,
    ) -> &mut Self
    where
        F: Fn(Arc<NodeContext>, FunctionCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<AffectedItemsResult>> + Send + 'static,
    {
        self.register(name, action, messages, Arc::new(FnFunction(function)))
    }

    pub fn get(&self, name: &str) -> Option<&FunctionEntry> {
        self.entries.get(name)
    }

    /// Look up `name`, failing with a validation error when unknown.
    pub fn resolve(&self, name: &str) -> Result<&FunctionEntry> {
        self.get(name).ok_or_else(|| VigilError::Validation {
            field: "function".to_string(),
            message: format!("unknown distributed function '{}'", name),
        })
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::RulesetFingerprint;
    use crate::config::ClusterConfig;
    use serde_json::json;

    struct NoRuleset;

    #[async_trait::async_trait]
    impl crate::cluster::RulesetIntegrity for NoRuleset {
        async fn fingerprint(&self) -> Result<RulesetFingerprint> {
            Ok(RulesetFingerprint::new())
        }
    }

    fn ctx() -> Arc<NodeContext> {
        Arc::new(NodeContext::with_ruleset(ClusterConfig::standalone(), Arc::new(NoRuleset)))
    }

    #[tokio::test]
    async fn test_register_and_call_closure() {
        let mut registry = FunctionRegistry::new();
        registry.register_fn(
            "echo_node",
            "cluster:read",
            ResultMessages::new("ok", "partial", "failed"),
            |ctx: Arc<NodeContext>, _call: FunctionCall| async move {
                let mut result = AffectedItemsResult::new();
                result.add_affected(ctx.node_id().to_string());
                Ok::<_, VigilError>(result)
            },
        );

        let entry = registry.resolve("echo_node").unwrap();
        assert_eq!(entry.action, "cluster:read");
        let result = entry.function.call(ctx(), FunctionCall::default()).await.unwrap();
        assert_eq!(result.affected_items(), &[json!("manager")]);
        assert!(registry.resolve("missing").is_err());
    }

    #[test]
    fn test_argument_helpers() {
        let arguments = json!({"node": "worker1", "nodes": ["a", "b"], "flag": true, "bad": [1]});
        let call = FunctionCall::new(arguments.as_object().unwrap().clone());

        assert_eq!(call.str_arg("node"), Some("worker1"));
        assert_eq!(call.list_arg("node").unwrap(), Some(vec!["worker1".to_string()]));
        assert_eq!(
            call.list_arg("nodes").unwrap(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(call.bool_arg("flag"), Some(true));
        assert!(call.list_arg("bad").is_err());
        assert!(call.list_arg("absent").unwrap().is_none());
        assert!(call.require_str("absent").is_err());
    }
}

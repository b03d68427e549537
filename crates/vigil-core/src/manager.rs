//! Built-in distributed functions.
//!
//! These are the operations every node answers: identity and configuration
//! reads, cluster health queries, ruleset synchronization, ruleset reload,
//! configuration validation, daemon logs, event ingestion and active
//! response. [`builtin_registry`] registers all of them.

use crate::active_response::{self, ArCommand};
use crate::cluster::{health, RulesetFingerprint};
use crate::config::ProtocolConfig;
use crate::context::NodeContext;
use crate::dispatch::{FunctionCall, FunctionRegistry, ResultMessages};
use crate::error::{codes, Result, VigilError};
use crate::event;
use crate::logs;
use crate::protocol::DaemonProtocol;
use crate::results::AffectedItemsResult;
use crate::transport::{FramedChannel, QueueSocket};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

/// Function names as registered by [`builtin_registry`].
pub mod functions {
    pub const GET_NODE: &str = "get_node";
    pub const READ_CONFIG: &str = "read_config";
    pub const GET_STATUS: &str = "get_status";
    pub const GET_HEALTH_NODES: &str = "get_health_nodes";
    pub const GET_NODES_INFO: &str = "get_nodes_info";
    pub const GET_RULESET_SYNC_STATUS: &str = crate::cluster::health::RULESET_SYNC_FUNCTION;
    pub const RELOAD_RULESET: &str = "reload_ruleset";
    pub const VALIDATE_CONFIGURATION: &str = "validate_configuration";
    pub const GET_LOGS: &str = "get_logs";
    pub const GET_LOGS_SUMMARY: &str = "get_logs_summary";
    pub const SEND_EVENT: &str = "send_event_to_analysisd";
    pub const RUN_COMMAND: &str = "run_command";
}

/// Authorization actions.
pub mod actions {
    pub const CLUSTER_READ: &str = "cluster:read";
    pub const CLUSTER_RESTART: &str = "cluster:restart";
    pub const LOGS_READ: &str = "cluster:read_logs";
    pub const EVENT_INGEST: &str = "event:ingest";
    /// Checked against the agent ids an active response targets.
    pub const AR_COMMAND: &str = "active-response:command";
}

/// Analysisd command reloading rules and decoders.
pub const RELOAD_RULESET_COMMAND: &str = "reload_ruleset";
/// Raw request understood by the com socket.
pub const CHECK_CONFIG_COMMAND: &str = "check-manager-configuration";

static EXECD_ERROR_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.*(?:ERROR: |CRITICAL: )(?:\[.*\] )?(.*)$").expect("execd error regex must compile")
});

/// Registry holding every built-in function.
pub fn builtin_registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    registry
        .register_fn(
            functions::GET_NODE,
            actions::CLUSTER_READ,
            ResultMessages::new(
                "Node information was returned",
                "",
                "No node information was returned",
            ),
            get_node,
        )
        .register_fn(
            functions::READ_CONFIG,
            actions::CLUSTER_READ,
            ResultMessages::new(
                "Cluster configuration was returned",
                "",
                "Could not read the cluster configuration",
            ),
            read_config,
        )
        .register_fn(
            functions::GET_STATUS,
            actions::CLUSTER_READ,
            ResultMessages::new("Cluster status was returned", "", "Could not read the cluster status"),
            get_status,
        )
        .register_fn(
            functions::GET_HEALTH_NODES,
            actions::CLUSTER_READ,
            ResultMessages::new(
                "All selected nodes healthcheck information was returned",
                "Some nodes healthcheck information was not returned",
                "No healthcheck information was returned",
            ),
            get_health_nodes,
        )
        .register_fn(
            functions::GET_NODES_INFO,
            actions::CLUSTER_READ,
            ResultMessages::new(
                "All selected nodes information was returned",
                "Some nodes information was not returned",
                "No node information was returned",
            ),
            get_nodes_info,
        )
        .register_fn(
            functions::GET_RULESET_SYNC_STATUS,
            actions::CLUSTER_READ,
            ResultMessages::new(
                "Nodes ruleset synchronization status was successfully read",
                "Could not read ruleset synchronization status in some nodes",
                "Could not read ruleset synchronization status in any node",
            ),
            get_ruleset_sync_status,
        )
        .register_fn(
            functions::RELOAD_RULESET,
            actions::CLUSTER_RESTART,
            ResultMessages::new(
                "Reload request sent to all specified nodes",
                "Could not send reload request to some specified nodes",
                "Could not send reload request to any node",
            ),
            reload_ruleset,
        )
        .register_fn(
            functions::VALIDATE_CONFIGURATION,
            actions::CLUSTER_READ,
            ResultMessages::new(
                "Validation was successfully checked",
                "Could not check validation in some nodes",
                "Could not check validation in any node",
            ),
            validate_configuration,
        )
        .register_fn(
            functions::GET_LOGS,
            actions::LOGS_READ,
            ResultMessages::new(
                "Logs were successfully read",
                "Could not read logs in some nodes",
                "Could not read logs in any node",
            ),
            get_logs,
        )
        .register_fn(
            functions::GET_LOGS_SUMMARY,
            actions::LOGS_READ,
            ResultMessages::new(
                "Log was successfully summarized",
                "Could not summarize the log in some nodes",
                "Could not summarize the log in any node",
            ),
            get_logs_summary,
        )
        .register_fn(
            functions::SEND_EVENT,
            actions::EVENT_INGEST,
            ResultMessages::new(
                "All events were forwarded to analysisd",
                "Some events were forwarded to analysisd",
                "No events were forwarded to analysisd",
            ),
            send_event_to_analysisd,
        )
        .register_fn(
            functions::RUN_COMMAND,
            actions::AR_COMMAND,
            ResultMessages::new(
                "AR command was sent to all agents",
                "AR command was not sent to some agents",
                "AR command was not sent to any agent",
            ),
            run_command,
        );
    registry
}

async fn get_node(ctx: Arc<NodeContext>, _call: FunctionCall) -> Result<AffectedItemsResult> {
    let mut result = AffectedItemsResult::new();
    result.add_affected(serde_json::to_value(ctx.directory.get_node())?);
    Ok(result)
}

async fn read_config(ctx: Arc<NodeContext>, _call: FunctionCall) -> Result<AffectedItemsResult> {
    let mut result = AffectedItemsResult::new();
    result.add_affected(serde_json::to_value(&ctx.config)?);
    Ok(result)
}

/// `{enabled, running}` as "yes"/"no". A node answering requests is running
/// whenever clustering is enabled.
async fn get_status(ctx: Arc<NodeContext>, _call: FunctionCall) -> Result<AffectedItemsResult> {
    let flag = if ctx.directory.is_enabled() { "yes" } else { "no" };
    let mut result = AffectedItemsResult::new();
    result.add_affected(json!({"enabled": flag, "running": flag}));
    Ok(result)
}

async fn get_health_nodes(ctx: Arc<NodeContext>, call: FunctionCall) -> Result<AffectedItemsResult> {
    let filter = call.list_arg("filter_node")?;
    health::get_health_nodes(&ctx, filter.as_deref()).await
}

async fn get_nodes_info(ctx: Arc<NodeContext>, call: FunctionCall) -> Result<AffectedItemsResult> {
    let filter = call.list_arg("filter_node")?;
    health::get_nodes_info(&ctx, filter.as_deref()).await
}

async fn get_ruleset_sync_status(
    ctx: Arc<NodeContext>,
    call: FunctionCall,
) -> Result<AffectedItemsResult> {
    let master_fingerprint: RulesetFingerprint = match call.arg("master_fingerprint") {
        Some(value) => serde_json::from_value(value.clone())?,
        None => {
            return Err(VigilError::Validation {
                field: "master_fingerprint".to_string(),
                message: "missing required argument".to_string(),
            })
        }
    };
    Ok(health::get_ruleset_sync_status(&ctx, &master_fingerprint).await)
}

/// Ask this node's analysis engine to reload its ruleset.
async fn reload_ruleset(ctx: Arc<NodeContext>, _call: FunctionCall) -> Result<AffectedItemsResult> {
    let node_id = ctx.node_id();
    let mut result = AffectedItemsResult::new();
    let channel = local_channel(&ctx.config.paths.analysisd_socket)?;

    match ctx
        .client
        .protocol()
        .request(&channel, RELOAD_RULESET_COMMAND, json!({}))
        .await
    {
        Ok(reply) => {
            let sent = reply.get("success").and_then(Value::as_bool).unwrap_or(true);
            let msg = if sent {
                "Ruleset reload request sent successfully."
            } else {
                "Failed to send the ruleset reload request."
            };
            info!("Ruleset reload on {}: {}", node_id, msg);
            result.add_affected(json!({"name": node_id, "msg": msg}));
        }
        Err(e) => result.add_failed(node_id, &e),
    }
    Ok(result)
}

async fn validate_configuration(
    ctx: Arc<NodeContext>,
    _call: FunctionCall,
) -> Result<AffectedItemsResult> {
    let node_id = ctx.node_id();
    let mut result = AffectedItemsResult::new();

    match check_configuration(&ctx.config.paths.com_socket).await {
        Ok(status) => {
            let mut item = json!({"name": node_id});
            if let (Some(item), Value::Object(status)) = (item.as_object_mut(), status) {
                item.extend(status);
            }
            result.add_affected(item);
        }
        Err(e) => result.add_failed(node_id, &e),
    }
    Ok(result)
}

/// `limit` argument, defaulting to [`logs::DEFAULT_LIMIT`].
fn limit_arg(call: &FunctionCall) -> Result<usize> {
    match call.arg("limit") {
        None => Ok(logs::DEFAULT_LIMIT),
        Some(value) => value
            .as_u64()
            .filter(|limit| *limit > 0)
            .map(|limit| limit as usize)
            .ok_or_else(|| VigilError::Validation {
                field: "limit".to_string(),
                message: format!("expected a positive integer, found {}", value),
            }),
    }
}

/// Parsed lines of this node's daemon log, optionally narrowed by `level` and `tag`.
async fn get_logs(ctx: Arc<NodeContext>, call: FunctionCall) -> Result<AffectedItemsResult> {
    let limit = limit_arg(&call)?;
    let level = call.str_arg("level").map(str::to_lowercase);
    let tag = call.str_arg("tag");
    let mut result = AffectedItemsResult::new();

    match logs::get_logs(&ctx.config.paths, ctx.config.log_format, limit).await {
        Ok(entries) => {
            for entry in entries.into_iter().filter(|e| {
                level.as_deref().map_or(true, |l| e.level == l) && tag.map_or(true, |t| e.tag == t)
            }) {
                result.add_affected(serde_json::to_value(entry)?);
            }
        }
        Err(e) => result.add_failed(ctx.node_id(), &e),
    }
    Ok(result)
}

/// One `{tag: counts}` item per tag in this node's daemon log.
async fn get_logs_summary(ctx: Arc<NodeContext>, call: FunctionCall) -> Result<AffectedItemsResult> {
    let limit = limit_arg(&call)?;
    let mut result = AffectedItemsResult::new();

    match logs::get_logs_summary(&ctx.config.paths, ctx.config.log_format, limit).await {
        Ok(summary) => {
            for (tag, counts) in summary {
                let mut item = Map::new();
                item.insert(tag, serde_json::to_value(counts)?);
                result.add_affected(Value::Object(item));
            }
        }
        Err(e) => result.add_failed(ctx.node_id(), &e),
    }
    Ok(result)
}

async fn send_event_to_analysisd(
    ctx: Arc<NodeContext>,
    call: FunctionCall,
) -> Result<AffectedItemsResult> {
    let events: Vec<String> = match call.arg("events") {
        Some(Value::Array(events)) => events.iter().map(event::event_text).collect(),
        Some(single) => vec![event::event_text(single)],
        None => {
            return Err(VigilError::Validation {
                field: "events".to_string(),
                message: "missing required argument".to_string(),
            })
        }
    };
    let queue = QueueSocket::new(&ctx.config.paths.queue_socket);
    Ok(event::send_event_to_analysisd(&queue, &events).await)
}

/// Active response on the authorized agent ids.
async fn run_command(ctx: Arc<NodeContext>, call: FunctionCall) -> Result<AffectedItemsResult> {
    let Some(agents) = call.targets.clone() else {
        return Err(VigilError::Validation {
            field: "targets".to_string(),
            message: "active response needs the agent ids to run on".to_string(),
        });
    };
    let command: ArCommand = serde_json::from_value(Value::Object(call.arguments.clone()))
        .map_err(|e| VigilError::Validation {
            field: "arguments".to_string(),
            message: e.to_string(),
        })?;

    let protocol = DaemonProtocol::new(ProtocolConfig::new(ctx.node_id(), "active-response"));
    let queue = QueueSocket::new(&ctx.config.paths.ar_queue);
    Ok(active_response::run_command(&protocol, &ctx.config.paths.ar_conf, &queue, &agents, &command).await)
}

/// Run the configuration check through the com socket at `socket`.
pub async fn check_configuration(socket: &Path) -> Result<Value> {
    let channel = local_channel(socket)?;
    let reply = channel.send(CHECK_CONFIG_COMMAND.as_bytes()).await?;
    let text = String::from_utf8_lossy(&reply);
    parse_execd_output(text.trim_end_matches('\0'))
}

#[derive(Debug, Deserialize)]
struct ExecdOutput {
    error: i32,
    #[serde(default)]
    message: String,
}

/// Interpret the configuration check report.
///
/// A clean report yields `{"status": "OK"}`. Otherwise every `ERROR:` or
/// `CRITICAL:` line is stripped of its timestamp, daemon and tag prefix, and
/// the distinct descriptions are returned in order under code 1908.
pub fn parse_execd_output(output: &str) -> Result<Value> {
    let report: ExecdOutput = serde_json::from_str(output)?;
    if report.error == 0 {
        return Ok(json!({"status": "OK"}));
    }

    let mut seen = HashSet::new();
    let errors: Vec<&str> = report
        .message
        .lines()
        .filter_map(|line| EXECD_ERROR_LINE.captures(line))
        .filter_map(|captures| captures.get(1).map(|m| m.as_str()))
        .filter(|description| seen.insert(*description))
        .collect();
    debug!("Configuration check reported {} distinct errors", errors.len());

    Err(VigilError::RemoteCommand {
        code: codes::INVALID_CONFIGURATION,
        message: errors.join(", "),
    })
}

#[cfg(unix)]
fn local_channel(path: &Path) -> Result<FramedChannel> {
    Ok(FramedChannel::unix(path))
}

#[cfg(not(unix))]
fn local_channel(path: &Path) -> Result<FramedChannel> {
    Err(VigilError::Config {
        message: format!("Local daemon sockets are not available here: {}", path.display()),
    })
}

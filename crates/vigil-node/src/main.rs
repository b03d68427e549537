//! Vigil Node - cluster member daemon and one-shot dispatch tool.
//!
//! `serve` runs the node: the cluster port for peers, the local socket for
//! tools on the same host, and the keep-alive loop on a master. The other
//! subcommands talk to a running node through its local socket.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use vigil_core::cluster::health::commands;
use vigil_core::dispatch::DAPI_COMMAND;
use vigil_core::{
    ActionPolicy, AffectedItemsResult, ClusterConfig, DaemonProtocol, DistributedRequest,
    FramedChannel, ProtocolConfig, RequestType, VigilNode,
};

#[derive(Parser, Debug)]
#[command(name = "vigil-node")]
#[command(about = "Vigil cluster node")]
struct Args {
    /// Cluster configuration file
    #[arg(short, long, default_value = "/var/vigil/etc/cluster.json")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the node until interrupted (default)
    Serve {
        /// Per-action allow-list of resource ids; everything is allowed without one
        #[arg(long)]
        policy: Option<PathBuf>,
    },

    /// Send one distributed request to the running node and print the result
    Dispatch {
        /// Registered function name
        function: String,

        /// local_master, distributed_master, local_any or local_worker
        #[arg(short = 't', long, default_value = "local_master")]
        request_type: RequestType,

        /// Function argument as name=value; values are parsed as JSON when possible
        #[arg(short, long = "arg", value_parser = parse_argument)]
        arguments: Vec<(String, Value)>,

        /// Resource ids to authorize
        #[arg(long, value_delimiter = ',')]
        targets: Vec<String>,

        /// Restrict a fan-out to these nodes
        #[arg(long, value_delimiter = ',')]
        nodes: Vec<String>,

        /// Do not bound the per-node wait
        #[arg(short, long)]
        wait: bool,
    },

    /// Compare every node's ruleset against the master's
    RulesetSync {
        /// Only check these nodes
        #[arg(long, value_delimiter = ',')]
        nodes: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let config = ClusterConfig::load(&args.config)
        .with_context(|| format!("Could not load {}", args.config.display()))?;

    match args.command.unwrap_or(Command::Serve { policy: None }) {
        Command::Serve { policy } => serve(config, policy).await,
        Command::Dispatch {
            function,
            request_type,
            arguments,
            targets,
            nodes,
            wait,
        } => {
            let mut request = DistributedRequest::new(function, request_type)
                .with_arguments(arguments.into_iter().collect())
                .wait_for_complete(wait);
            if !targets.is_empty() {
                request = request.with_targets(targets);
            }
            if !nodes.is_empty() {
                request = request.with_nodes(nodes);
            }
            let params = serde_json::to_value(&request)?;
            print_result(send_local(&config, DAPI_COMMAND, params).await?)
        }
        Command::RulesetSync { nodes } => {
            let params = if nodes.is_empty() {
                json!({})
            } else {
                json!({ "nodes": nodes })
            };
            print_result(send_local(&config, commands::RULESET_SYNC, params).await?)
        }
    }
}

async fn serve(config: ClusterConfig, policy: Option<PathBuf>) -> Result<()> {
    info!(
        "Starting Vigil node {} ({}) in cluster {}",
        config.node_name, config.node_type, config.name
    );

    let mut builder = VigilNode::builder(config);
    if let Some(path) = policy {
        let policy = ActionPolicy::load(&path)
            .with_context(|| format!("Could not load policy {}", path.display()))?;
        info!("Authorizing requests with {}", path.display());
        builder = builder.with_authorizer(Arc::new(policy));
    }
    let node = builder.build()?;
    let config = &node.ctx().config;

    let mut cluster_server = None;
    if !config.disabled {
        let addr = SocketAddr::new(config.bind_addr, config.port);
        let handle = node.serve_cluster(&addr.to_string()).await?;
        info!("Cluster port listening on {}", handle.endpoint());
        cluster_server = Some(handle);
    }

    #[cfg(unix)]
    let mut local_server = {
        let handle = node.serve_local().await?;
        info!("Local socket listening on {}", handle.endpoint());
        handle
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = node.spawn_health_monitor(shutdown_rx);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    let _ = shutdown_tx.send(true);
    if let Some(monitor) = monitor {
        let _ = monitor.await;
    }
    if let Some(mut handle) = cluster_server {
        handle.shutdown();
    }
    #[cfg(unix)]
    local_server.shutdown();

    Ok(())
}

/// One request to the node running on this host.
async fn send_local(config: &ClusterConfig, command: &str, params: Value) -> Result<Value> {
    let protocol = DaemonProtocol::new(ProtocolConfig::new("vigil-node", "cli"));
    let channel = local_channel(config);
    protocol
        .request(&channel, command, params)
        .await
        .with_context(|| format!("{} failed on {}", command, channel.endpoint()))
}

#[cfg(unix)]
fn local_channel(config: &ClusterConfig) -> FramedChannel {
    FramedChannel::unix(config.paths.local_socket.clone())
}

#[cfg(not(unix))]
fn local_channel(config: &ClusterConfig) -> FramedChannel {
    FramedChannel::tcp(format!("127.0.0.1:{}", config.port))
}

fn print_result(data: Value) -> Result<()> {
    let result: AffectedItemsResult =
        serde_json::from_value(data).context("Node answered with an unexpected result shape")?;
    println!("{}", serde_json::to_string_pretty(&result.render())?);
    Ok(())
}

/// `name=value`, with `value` taken as JSON when it parses and as a string otherwise.
fn parse_argument(raw: &str) -> Result<(String, Value)> {
    let Some((name, value)) = raw.split_once('=') else {
        bail!("expected name=value, got '{}'", raw);
    };
    if name.is_empty() {
        bail!("argument name must not be empty");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_argument() {
        assert_eq!(parse_argument("limit=5").unwrap(), ("limit".to_string(), json!(5)));
        assert_eq!(
            parse_argument("name=worker1").unwrap(),
            ("name".to_string(), json!("worker1"))
        );
        assert_eq!(
            parse_argument("filter=[\"a\",\"b\"]").unwrap(),
            ("filter".to_string(), json!(["a", "b"]))
        );
        assert!(parse_argument("novalue").is_err());
        assert!(parse_argument("=5").is_err());
    }

    #[test]
    fn test_dispatch_arguments() {
        let args = Args::parse_from([
            "vigil-node",
            "dispatch",
            "reload_ruleset",
            "-t",
            "distributed_master",
            "--nodes",
            "worker1,worker2",
            "--arg",
            "force=true",
        ]);
        match args.command {
            Some(Command::Dispatch {
                function,
                request_type,
                arguments,
                nodes,
                wait,
                ..
            }) => {
                assert_eq!(function, "reload_ruleset");
                assert_eq!(request_type, RequestType::DistributedMaster);
                assert_eq!(arguments, vec![("force".to_string(), json!(true))]);
                assert_eq!(nodes, vec!["worker1", "worker2"]);
                assert!(!wait);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_serve_policy() {
        let args = Args::parse_from(["vigil-node", "serve", "--policy", "/var/vigil/etc/policy.json"]);
        match args.command {
            Some(Command::Serve { policy }) => {
                assert_eq!(policy, Some(PathBuf::from("/var/vigil/etc/policy.json")));
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(Args::parse_from(["vigil-node"]).command.is_none());
    }
}

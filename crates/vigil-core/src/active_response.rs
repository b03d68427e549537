//! Active response: run a configured command on agents.
//!
//! A command is only sent when it is listed in the node's `ar.conf`, unless
//! its name starts with `!`, which marks a custom script the agent resolves
//! itself. Each agent gets its own message on the active response queue, so
//! one failing agent never prevents delivery to the others.

use crate::error::{codes, Result, VigilError};
use crate::protocol::DaemonProtocol;
use crate::results::AffectedItemsResult;
use crate::transport::QueueSocket;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

/// Prefix routing a queue message to a single agent as an active response.
pub const AGENT_MESSAGE_HEADER: &str = "(msg_to_agent) [] NNS ";

/// Prefix of custom commands, which skip the `ar.conf` check.
const CUSTOM_COMMAND_PREFIX: char = '!';

/// What to run, as given by the caller.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ArCommand {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Alert that triggered the response, forwarded to the agent as is.
    #[serde(default)]
    pub alert: Map<String, Value>,
}

impl ArCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Self::default()
        }
    }

    pub fn with_arguments(mut self, arguments: Vec<String>) -> Self {
        self.arguments = arguments;
        self
    }

    /// Build the agent message, checking the command against `known`.
    pub fn message(&self, protocol: &DaemonProtocol, known: &HashSet<String>) -> Result<String> {
        let command = match self.command.as_deref().map(str::trim) {
            Some(command) if !command.is_empty() => command,
            _ => {
                return Err(VigilError::Internal {
                    code: codes::AR_COMMAND_NOT_SPECIFIED,
                    message: "Active response - Command not specified".to_string(),
                })
            }
        };

        let name = match command.strip_prefix(CUSTOM_COMMAND_PREFIX) {
            Some(custom) => custom,
            None if known.contains(command) => command,
            None => {
                return Err(VigilError::Internal {
                    code: codes::AR_COMMAND_NOT_DEFINED,
                    message: "The command used is not defined in the configuration".to_string(),
                })
            }
        };

        let envelope = protocol.envelope(
            name,
            json!({"extra_args": self.arguments, "alert": self.alert}),
        )?;
        Ok(serde_json::to_string(&envelope)?)
    }
}

/// Command names listed in an `ar.conf` file.
///
/// Every non-empty line reads `name - script - timeout`; only the name is
/// kept.
pub fn parse_ar_conf(content: &str) -> HashSet<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split(" - ").next())
        .map(|name| name.trim().to_string())
        .collect()
}

/// Read the command list at `path`.
pub async fn read_ar_conf(path: &Path) -> Result<HashSet<String>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| VigilError::io_with_path(e, path))?;
    Ok(parse_ar_conf(&content))
}

/// Send `command` to every agent in `agents`.
///
/// Affected items are the agent ids the message was queued for. A command
/// that cannot be built fails every agent with the same error.
pub async fn run_command(
    protocol: &DaemonProtocol,
    ar_conf: &Path,
    queue: &QueueSocket,
    agents: &[String],
    command: &ArCommand,
) -> AffectedItemsResult {
    let mut result = AffectedItemsResult::with_messages(
        "AR command was sent to all agents",
        "AR command was not sent to some agents",
        "AR command was not sent to any agent",
    );

    let message = match read_ar_conf(ar_conf).await {
        Ok(known) => command.message(protocol, &known),
        Err(e) => Err(e),
    };
    let message = match message {
        Ok(message) => message,
        Err(e) => {
            warn!("Active response not sent: {}", e);
            for agent in agents {
                result.add_failed(agent.clone(), &e);
            }
            return result;
        }
    };

    for agent in agents {
        let header = format!("{}{} ", AGENT_MESSAGE_HEADER, agent);
        match queue.send_msg(&header, &message).await {
            Ok(()) => {
                debug!("Active response queued for agent {}", agent);
                result.add_affected(agent.clone());
            }
            Err(e) => result.add_failed(agent.clone(), &e),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolConfig;
    use crate::error::{ErrorKey, ErrorKind};

    const AR_CONF: &str = "restart-vigil0 - restart-vigil - 0\n\
                           firewall-drop0 - firewall-drop - 0\n\
                           \n\
                           # disabled-cmd - nope - 0\n";

    fn protocol() -> DaemonProtocol {
        DaemonProtocol::new(ProtocolConfig::new("master", "active-response"))
    }

    fn agents(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_ar_conf() {
        let known = parse_ar_conf(AR_CONF);
        assert_eq!(known.len(), 2);
        assert!(known.contains("restart-vigil0"));
        assert!(known.contains("firewall-drop0"));
    }

    #[test]
    fn test_message_carries_arguments_and_alert() {
        let mut command = ArCommand::new("restart-vigil0").with_arguments(agents(&["arg1", "arg2"]));
        command.alert.insert("rule".to_string(), json!({"id": 5712}));

        let message = command.message(&protocol(), &parse_ar_conf(AR_CONF)).unwrap();
        let value: Value = serde_json::from_str(&message).unwrap();
        assert_eq!(value["command"], "restart-vigil0");
        assert_eq!(value["origin"]["module"], "active-response");
        assert_eq!(value["parameters"]["extra_args"], json!(["arg1", "arg2"]));
        assert_eq!(value["parameters"]["alert"]["rule"]["id"], 5712);
    }

    #[test]
    fn test_message_validation() {
        let known = parse_ar_conf(AR_CONF);

        let err = ArCommand::default().message(&protocol(), &known).unwrap_err();
        assert_eq!(err.to_error_code(), codes::AR_COMMAND_NOT_SPECIFIED);

        let err = ArCommand::new("random").message(&protocol(), &known).unwrap_err();
        assert_eq!(err.to_error_code(), codes::AR_COMMAND_NOT_DEFINED);

        let custom = ArCommand::new("!custom-ar").message(&protocol(), &known).unwrap();
        assert!(custom.contains(r#""command":"custom-ar""#));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_command_queues_one_message_per_agent() {
        let dir = tempfile::TempDir::new().unwrap();
        let ar_conf = dir.path().join("ar.conf");
        std::fs::write(&ar_conf, AR_CONF).unwrap();
        let queue_path = dir.path().join("ar");
        let receiver = tokio::net::UnixDatagram::bind(&queue_path).unwrap();

        let result = run_command(
            &protocol(),
            &ar_conf,
            &QueueSocket::new(&queue_path),
            &agents(&["001", "002"]),
            &ArCommand::new("restart-vigil0"),
        )
        .await;
        assert_eq!(result.affected_items(), &[json!("001"), json!("002")]);
        assert_eq!(result.message(), "AR command was sent to all agents");

        let mut buf = vec![0u8; 4096];
        for agent in ["001", "002"] {
            let n = receiver.recv(&mut buf).await.unwrap();
            let datagram = String::from_utf8_lossy(&buf[..n]).to_string();
            let prefix = format!("(msg_to_agent) [] NNS {} ", agent);
            assert!(datagram.starts_with(&prefix), "{}", datagram);
            let body: Value = serde_json::from_str(&datagram[prefix.len()..]).unwrap();
            assert_eq!(body["command"], "restart-vigil0");
        }
    }

    #[tokio::test]
    async fn test_run_command_failures_are_per_agent() {
        let dir = tempfile::TempDir::new().unwrap();
        let ar_conf = dir.path().join("ar.conf");
        std::fs::write(&ar_conf, AR_CONF).unwrap();
        let queue = QueueSocket::new(dir.path().join("absent"));
        let ids = agents(&["001", "002", "003"]);

        let result = run_command(&protocol(), &ar_conf, &queue, &ids, &ArCommand::new("random")).await;
        assert_eq!(result.total_failed_items(), 3);
        assert_eq!(result.failed_items().len(), 1);
        assert_eq!(result.failed_items()[0].error.code, codes::AR_COMMAND_NOT_DEFINED);
        assert_eq!(result.message(), "AR command was not sent to any agent");

        // Valid command, but nobody listens on the queue.
        let result =
            run_command(&protocol(), &ar_conf, &queue, &ids, &ArCommand::new("firewall-drop0")).await;
        let unreachable = ErrorKey::new(ErrorKind::ConnectionFailure, codes::CONNECTION_FAILURE, "");
        assert_eq!(result.failed_ids(&unreachable).unwrap().len(), 3);
    }
}

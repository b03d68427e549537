//! Daemon message protocol.
//!
//! Wraps application payloads into the envelope understood by every Vigil
//! daemon and unwraps replies, turning server-side error signaling back into
//! a [`VigilError`]. Sits directly on top of the framed channel
//! but does not depend on it for encoding.
//!
//! ```text
//! out:  {"version": 1, "origin": {"name": .., "module": ..}, "command": .., "parameters": {..}}
//! back: {"error": 0, "data": ..}  |  {"error": N, "kind": .., "message": ..}
//! ```

use crate::config::ProtocolConfig;
use crate::error::{ErrorKind, Result, VigilError};
use crate::transport::FramedChannel;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Identity of the process that built an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub name: String,
    pub module: String,
}

/// Request envelope. Built once per request and never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u32,
    pub origin: Origin,
    pub command: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// Transport-level reply.
///
/// Exactly one of `message` (when `error != 0`) or `data` (when `error == 0`)
/// is populated. Vigil nodes also send the error `kind`; other daemons leave
/// it out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub error: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Reply {
    pub fn success(data: Value) -> Self {
        Self {
            error: 0,
            kind: None,
            message: None,
            data: Some(data),
        }
    }

    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        // Code 0 means success on the wire, so a failure can never carry it.
        let code = if code == 0 { crate::error::codes::INTERNAL } else { code };
        Self {
            error: code,
            kind: None,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Build the reply for a handler outcome.
    pub fn from_result(result: Result<Value>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(e) => Self::from_error(&e),
        }
    }

    /// Failure reply that lets the receiving node rebuild `err` as raised.
    pub fn from_error(err: &VigilError) -> Self {
        Self {
            kind: Some(err.kind()),
            ..Self::failure(err.to_error_code(), err.wire_message())
        }
    }

    /// Collapse into the single populated outcome.
    pub fn into_result(self) -> Result<Value> {
        if self.error != 0 {
            let message = self.message.unwrap_or_else(|| "Unknown error".to_string());
            return Err(VigilError::from_wire(self.kind, self.error, message));
        }
        Ok(self.data.unwrap_or(Value::Null))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // A Reply only holds JSON values and strings, which always serialize.
        serde_json::to_vec(self).unwrap_or_else(|_| b"{\"error\":1000,\"message\":\"Unserializable reply\"}".to_vec())
    }
}

/// Reply of session-oriented daemon commands (logtest and friends).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandReply {
    #[serde(default)]
    pub token: String,
    pub codemsg: i32,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default)]
    pub output: Map<String, Value>,
    #[serde(default)]
    pub alert: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_debug: Option<Vec<String>>,
}

impl CommandReply {
    pub fn is_failure(&self) -> bool {
        self.codemsg < 0
    }
}

/// Encoder/decoder for daemon envelopes.
#[derive(Debug, Clone, Default)]
pub struct DaemonProtocol {
    config: ProtocolConfig,
}

impl DaemonProtocol {
    pub fn new(config: ProtocolConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Build the envelope for a command.
    ///
    /// `parameters` must be a JSON object; `null` is accepted as an empty one.
    pub fn envelope(&self, command: &str, parameters: Value) -> Result<Envelope> {
        let parameters = match parameters {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(VigilError::Validation {
                    field: "parameters".to_string(),
                    message: format!("expected an object, got {}", other),
                })
            }
        };
        Ok(Envelope {
            version: self.config.version,
            origin: Origin {
                name: self.config.origin_name.clone(),
                module: self.config.origin_module.clone(),
            },
            command: command.to_string(),
            parameters,
        })
    }

    /// Serialize a command into wire bytes.
    pub fn wrap(&self, command: &str, parameters: Value) -> Result<Vec<u8>> {
        let envelope = self.envelope(command, parameters)?;
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Decode a transport reply, failing with the server-reported error if any.
    pub fn unwrap(&self, bytes: &[u8]) -> Result<Value> {
        let reply: Reply = serde_json::from_slice(bytes).map_err(|e| VigilError::Json {
            message: format!("Failed to parse daemon reply: {}", e),
            source: Some(e),
        })?;
        reply.into_result()
    }

    /// Decode a session-oriented command reply.
    ///
    /// Both the transport error and a negative `codemsg` are failures.
    pub fn unwrap_command(&self, bytes: &[u8]) -> Result<CommandReply> {
        let data = self.unwrap(bytes)?;
        let reply: CommandReply = serde_json::from_value(data)?;
        if reply.is_failure() {
            let messages = reply
                .messages
                .iter()
                .map(|m| format!("\n\t{}", m))
                .collect::<String>();
            return Err(VigilError::RemoteCommand {
                code: reply.codemsg,
                message: messages,
            });
        }
        Ok(reply)
    }

    /// Wrap, send over `channel`, and unwrap.
    pub async fn request(&self, channel: &FramedChannel, command: &str, parameters: Value) -> Result<Value> {
        let request = self.wrap(command, parameters)?;
        debug!("Request to {}: {} ({} bytes)", channel.endpoint(), command, request.len());
        let reply = channel.send(&request).await?;
        self.unwrap(&reply)
    }
}

/// Decode an incoming envelope on the server side.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope> {
    serde_json::from_slice(bytes).map_err(|e| VigilError::Json {
        message: format!("Failed to parse envelope: {}", e),
        source: Some(e),
    })
}

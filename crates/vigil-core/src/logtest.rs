//! Logtest session client.
//!
//! Logtest lets rule authors push single events through the analysis engine
//! and see how each phase handled them. The engine keeps per-session state
//! (previously seen events, frequency counters) keyed by a token it hands out
//! on the first event; the client echoes the token back on every later call.

use crate::config::ProtocolConfig;
use crate::error::{Result, VigilError};
use crate::protocol::{CommandReply, DaemonProtocol};
use crate::transport::FramedChannel;
use serde_json::{json, Map, Value};
use tracing::debug;

/// Commands understood by the logtest socket.
pub mod commands {
    pub const LOG_PROCESSING: &str = "log_processing";
    pub const REMOVE_SESSION: &str = "remove_session";
}

pub const DEFAULT_LOCATION: &str = "stdin";
pub const DEFAULT_LOG_FORMAT: &str = "syslog";

/// Expected or observed `[rule id, rule level, decoder name]`.
pub type UnitTest = [String; 3];

/// Parse a `rule:alert:decoder` unit-test expectation.
pub fn parse_unit_test(spec: &str) -> Result<UnitTest> {
    let parts: Vec<&str> = spec.split(':').collect();
    match parts.as_slice() {
        [rule, level, decoder] => Ok([rule.to_string(), level.to_string(), decoder.to_string()]),
        _ => Err(VigilError::Validation {
            field: "unit_test".to_string(),
            message: format!("Unit test configuration wrong syntax: {}", spec),
        }),
    }
}

/// Client for one logtest session at a time.
#[derive(Debug)]
pub struct LogtestClient {
    protocol: DaemonProtocol,
    channel: FramedChannel,
    fixed_fields: Map<String, Value>,
    last_token: Option<String>,
    last_ut: UnitTest,
}

impl LogtestClient {
    pub fn new(channel: FramedChannel, location: impl Into<String>) -> Self {
        let mut fixed_fields = Map::new();
        fixed_fields.insert("location".to_string(), Value::String(location.into()));
        fixed_fields.insert(
            "log_format".to_string(),
            Value::String(DEFAULT_LOG_FORMAT.to_string()),
        );
        Self {
            protocol: DaemonProtocol::new(ProtocolConfig::new("vigil-logtest", "vigil-logtest")),
            channel,
            fixed_fields,
            last_token: None,
            last_ut: Default::default(),
        }
    }

    pub fn with_log_format(mut self, log_format: impl Into<String>) -> Self {
        self.fixed_fields
            .insert("log_format".to_string(), Value::String(log_format.into()));
        self
    }

    /// Token of the last session the engine answered with.
    pub fn last_token(&self) -> Option<&str> {
        self.last_token.as_deref()
    }

    /// Unit-test triple of the last processed event.
    pub fn last_ut(&self) -> &UnitTest {
        &self.last_ut
    }

    /// Send one event through the engine.
    ///
    /// Without a token the engine opens a new session. A negative `codemsg`
    /// is returned as [`VigilError::RemoteCommand`].
    pub async fn process_log(
        &mut self,
        event: &str,
        token: Option<&str>,
        options: Option<Map<String, Value>>,
    ) -> Result<CommandReply> {
        let mut parameters = self.fixed_fields.clone();
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            parameters.insert("token".to_string(), json!(token));
        }
        parameters.insert("event".to_string(), json!(event));
        if let Some(options) = options.filter(|o| !o.is_empty()) {
            parameters.insert("options".to_string(), Value::Object(options));
        }

        let reply = self.send(commands::LOG_PROCESSING, parameters).await?;

        self.last_token = Some(reply.token.clone());
        self.last_ut = unit_test_of(&reply);
        Ok(reply)
    }

    /// Close the session behind `token`.
    ///
    /// Returns `false` when the engine could not be reached or refused.
    pub async fn remove_session(&self, token: &str) -> bool {
        let mut parameters = self.fixed_fields.clone();
        parameters.insert("token".to_string(), json!(token));
        debug!("Removing session with token {}", token);

        match self.send(commands::REMOVE_SESSION, parameters).await {
            Ok(_) => true,
            Err(e) => {
                debug!("Could not remove session {}: {}", token, e);
                false
            }
        }
    }

    /// Close the last known session, if any.
    pub async fn remove_last_session(&self) -> Option<bool> {
        match &self.last_token {
            Some(token) => Some(self.remove_session(token).await),
            None => None,
        }
    }

    async fn send(&self, command: &str, parameters: Map<String, Value>) -> Result<CommandReply> {
        let request = self.protocol.wrap(command, Value::Object(parameters))?;
        debug!("Request: {}", String::from_utf8_lossy(&request));
        let reply = self.channel.send(&request).await?;
        debug!("Reply: {}", String::from_utf8_lossy(&reply));
        self.protocol.unwrap_command(&reply)
    }
}

fn unit_test_of(reply: &CommandReply) -> UnitTest {
    let mut ut = UnitTest::default();
    if let Some(rule) = reply.output.get("rule") {
        ut[0] = scalar(rule.get("id"));
        ut[1] = scalar(rule.get("level"));
    }
    if let Some(decoder) = reply.output.get("decoder").filter(|d| is_present(d)) {
        ut[2] = scalar(decoder.get("name"));
    }
    ut
}

fn scalar(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

/// Human-readable phase listing of a logtest reply, one line per entry.
pub fn render_output(reply: &CommandReply) -> Vec<String> {
    let mut lines = Vec::new();
    let output = &reply.output;

    lines.push("**Phase 1: Completed pre-decoding.".to_string());
    if let Some(full_log) = output.get("full_log") {
        lines.push(format!("\tfull event: '{}'", scalar(Some(full_log))));
    }
    if let Some(Value::Object(predecoder)) = output.get("predecoder") {
        phase_info(predecoder, &["timestamp", "hostname", "program_name"], "", &mut lines);
    }

    lines.push(String::new());
    lines.push("**Phase 2: Completed decoding.".to_string());
    match output.get("decoder") {
        Some(Value::Object(decoder)) if !decoder.is_empty() => {
            phase_info(decoder, &["name", "parent"], "", &mut lines);
            if let Some(Value::Object(data)) = output.get("data") {
                phase_info(data, &[], "", &mut lines);
            }
        }
        _ => lines.push("\tNo decoder matched.".to_string()),
    }

    if let Some(rules_debug) = &reply.rules_debug {
        lines.push(String::new());
        lines.push("**Rule debugging:".to_string());
        for message in rules_debug {
            let indent = if message.starts_with('*') { "\t\t" } else { "\t" };
            lines.push(format!("{}{}", indent, message));
        }
    }

    if let Some(Value::Object(rule)) = output.get("rule") {
        lines.push(String::new());
        lines.push("**Phase 3: Completed filtering (rules).".to_string());
        phase_info(
            rule,
            &["id", "level", "description", "groups", "firedtimes"],
            "",
            &mut lines,
        );
    }
    if reply.alert {
        lines.push("**Alert to be generated.".to_string());
    }
    lines
}

/// Listed fields first, then the rest sorted; nested objects are flattened
/// with dotted names.
fn phase_info(phase: &Map<String, Value>, show_first: &[&str], prefix: &str, lines: &mut Vec<String>) {
    for field in show_first {
        if let Some(value) = phase.get(*field) {
            lines.push(format!("\t{}{}: '{}'", prefix, field, scalar(Some(value))));
        }
    }

    let mut rest: Vec<(&String, &Value)> = phase
        .iter()
        .filter(|(k, _)| !show_first.contains(&k.as_str()))
        .collect();
    rest.sort_by(|a, b| a.0.cmp(b.0));

    for (field, value) in rest {
        match value {
            Value::Object(nested) => {
                phase_info(nested, &[], &format!("{}{}.", prefix, field), lines);
            }
            other => lines.push(format!("\t{}{}: '{}'", prefix, field, scalar(Some(other)))),
        }
    }
}

//! Error types for the Vigil control plane.
//!
//! Every failure that can be attributed to a single target (a node, an agent, an
//! event) is eventually folded into an [`AffectedItemsResult`](crate::results::AffectedItemsResult)
//! through its [`ErrorKey`]. Failures that make a whole operation meaningless are
//! returned as `Err(VigilError)` instead.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Numeric error codes reported to callers and carried over the wire.
pub mod codes {
    /// Generic internal error.
    pub const INTERNAL: i32 = 1000;
    /// Malformed JSON payload.
    pub const JSON: i32 = 1019;
    /// Daemon log file missing for the active log format.
    pub const LOG_UNAVAILABLE: i32 = 1020;
    /// Invalid cluster configuration.
    pub const CONFIG: i32 = 1101;
    /// Invalid request parameters.
    pub const VALIDATION: i32 = 1102;
    /// Active response request without a command.
    pub const AR_COMMAND_NOT_SPECIFIED: i32 = 1650;
    /// Active response command absent from the node's command list.
    pub const AR_COMMAND_NOT_DEFINED: i32 = 1652;
    /// Requested node is not part of the cluster.
    pub const NODE_NOT_FOUND: i32 = 1730;
    /// Execd reported configuration errors.
    pub const INVALID_CONFIGURATION: i32 = 1908;
    /// Peer unreachable or connection dropped mid-request.
    pub const CONNECTION_FAILURE: i32 = 3012;
    /// Bounded wait exceeded.
    pub const TIMEOUT: i32 = 3021;
    /// Authorization rejected the target.
    pub const PERMISSION_DENIED: i32 = 4000;
}

/// Main error type for the Vigil library.
#[derive(Debug, Error)]
pub enum VigilError {
    // Transport errors
    #[error("Connection failure with {endpoint}: {message}")]
    ConnectionFailure { endpoint: String, message: String },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    // Peer errors
    #[error("Remote command error {code}: {message}")]
    RemoteCommand { code: i32, message: String },

    // Target errors
    #[error("Permission denied for action {action}")]
    PermissionDenied { action: String },

    #[error("{message}")]
    ResourceNotFound { code: i32, message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Error {code}: {message}")]
    Internal { code: i32, message: String },
}

/// Result type alias for Vigil operations.
pub type Result<T> = std::result::Result<T, VigilError>;

impl From<std::io::Error> for VigilError {
    fn from(err: std::io::Error) -> Self {
        VigilError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for VigilError {
    fn from(err: serde_json::Error) -> Self {
        VigilError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl VigilError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        VigilError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a connection failure for an endpoint.
    pub fn connection(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        VigilError::ConnectionFailure {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// The "node does not exist" error shared by every missing cluster node.
    pub fn node_not_found() -> Self {
        VigilError::ResourceNotFound {
            code: codes::NODE_NOT_FOUND,
            message: "Specified node does not exist".to_string(),
        }
    }

    /// Convert to the numeric code reported to callers.
    pub fn to_error_code(&self) -> i32 {
        match self {
            VigilError::ConnectionFailure { .. } => codes::CONNECTION_FAILURE,
            VigilError::Timeout(_) => codes::TIMEOUT,
            VigilError::RemoteCommand { code, .. } => *code,
            VigilError::PermissionDenied { .. } => codes::PERMISSION_DENIED,
            VigilError::ResourceNotFound { code, .. } => *code,
            VigilError::Json { .. } => codes::JSON,
            VigilError::Config { .. } => codes::CONFIG,
            VigilError::Validation { .. } => codes::VALIDATION,
            VigilError::Internal { code, .. } => *code,
            VigilError::Io { .. } => codes::INTERNAL,
        }
    }

    /// Coarse classification used for grouping failed items.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VigilError::ConnectionFailure { .. } => ErrorKind::ConnectionFailure,
            VigilError::Timeout(_) => ErrorKind::Timeout,
            VigilError::RemoteCommand { .. } => ErrorKind::RemoteCommand,
            VigilError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            VigilError::ResourceNotFound { .. } => ErrorKind::ResourceNotFound,
            VigilError::Validation { .. } => ErrorKind::Validation,
            VigilError::Config { .. } => ErrorKind::Config,
            VigilError::Json { .. } => ErrorKind::Json,
            VigilError::Io { .. } => ErrorKind::Io,
            VigilError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// The variant's own fields flattened into one string, as sent to peers.
    ///
    /// Together with [`kind`](Self::kind) and the code this is enough for
    /// [`from_wire`](Self::from_wire) to rebuild the variant on the other side.
    pub fn wire_message(&self) -> String {
        match self {
            VigilError::ConnectionFailure { endpoint, message } => {
                format!("{}: {}", endpoint, message)
            }
            VigilError::Timeout(after) => after.as_millis().to_string(),
            VigilError::PermissionDenied { action } => action.clone(),
            VigilError::Validation { field, message } => format!("{}: {}", field, message),
            VigilError::RemoteCommand { message, .. }
            | VigilError::ResourceNotFound { message, .. }
            | VigilError::Io { message, .. }
            | VigilError::Json { message, .. }
            | VigilError::Config { message }
            | VigilError::Internal { message, .. } => message.clone(),
        }
    }

    /// Rebuild an error reported by a peer.
    ///
    /// Replies without a kind come from daemons that only report a code and a
    /// message; those stay [`VigilError::RemoteCommand`].
    pub fn from_wire(kind: Option<ErrorKind>, code: i32, message: String) -> Self {
        fn split(message: String) -> (String, String) {
            match message.split_once(": ") {
                Some((head, tail)) => (head.to_string(), tail.to_string()),
                None => (String::new(), message),
            }
        }

        match kind {
            Some(ErrorKind::ConnectionFailure) => {
                let (endpoint, message) = split(message);
                VigilError::ConnectionFailure { endpoint, message }
            }
            Some(ErrorKind::Timeout) => {
                VigilError::Timeout(Duration::from_millis(message.parse().unwrap_or(0)))
            }
            Some(ErrorKind::PermissionDenied) => VigilError::PermissionDenied { action: message },
            Some(ErrorKind::ResourceNotFound) => VigilError::ResourceNotFound { code, message },
            Some(ErrorKind::Validation) => {
                let (field, message) = split(message);
                VigilError::Validation { field, message }
            }
            Some(ErrorKind::Config) => VigilError::Config { message },
            Some(ErrorKind::Json) => VigilError::Json {
                message,
                source: None,
            },
            Some(ErrorKind::Io) => VigilError::Io {
                message,
                path: None,
                source: None,
            },
            Some(ErrorKind::Internal) => VigilError::Internal { code, message },
            Some(ErrorKind::RemoteCommand) | None => VigilError::RemoteCommand { code, message },
        }
    }

    /// Build the grouping key for this error.
    ///
    /// The key message is the one shown in rendered results; it deliberately
    /// drops per-target details such as the endpoint, so that all failures of
    /// one kind and code read the same.
    pub fn key(&self) -> ErrorKey {
        let message = match self {
            VigilError::ConnectionFailure { .. } => "Could not connect to node".to_string(),
            VigilError::Timeout(_) => "Timeout executing request".to_string(),
            VigilError::PermissionDenied { action } => {
                format!("Permission denied: action {} not allowed", action)
            }
            VigilError::RemoteCommand { message, .. }
            | VigilError::ResourceNotFound { message, .. }
            | VigilError::Internal { message, .. } => message.clone(),
            other => other.to_string(),
        };
        ErrorKey {
            kind: self.kind(),
            code: self.to_error_code(),
            message,
        }
    }
}

/// Classification of an error for result grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConnectionFailure,
    RemoteCommand,
    Timeout,
    PermissionDenied,
    ResourceNotFound,
    Validation,
    Config,
    Json,
    Io,
    Internal,
}

/// Tagged error value usable as a map key.
///
/// Equality and hashing only consider `(kind, code)`: two failures with the same
/// code land in the same bucket no matter where they were raised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorKey {
    pub kind: ErrorKind,
    pub code: i32,
    pub message: String,
}

impl ErrorKey {
    pub fn new(kind: ErrorKind, code: i32, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }
}

impl PartialEq for ErrorKey {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.code == other.code
    }
}

impl Eq for ErrorKey {}

impl Hash for ErrorKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.code.hash(state);
    }
}

impl From<&VigilError> for ErrorKey {
    fn from(err: &VigilError) -> Self {
        err.key()
    }
}

impl From<VigilError> for ErrorKey {
    fn from(err: VigilError) -> Self {
        err.key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_error_display() {
        let err = VigilError::RemoteCommand {
            code: 7,
            message: "bad command".into(),
        };
        assert_eq!(err.to_string(), "Remote command error 7: bad command");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            VigilError::Timeout(Duration::from_secs(1)).to_error_code(),
            codes::TIMEOUT
        );
        assert_eq!(VigilError::node_not_found().to_error_code(), 1730);
        assert_eq!(
            VigilError::connection("127.0.0.1:1", "refused").to_error_code(),
            codes::CONNECTION_FAILURE
        );
    }

    #[test]
    fn test_key_equality_ignores_message() {
        let a = ErrorKey::new(ErrorKind::Internal, 1000, "first");
        let b = ErrorKey::new(ErrorKind::Internal, 1000, "second");
        let c = ErrorKey::new(ErrorKind::RemoteCommand, 1000, "first");

        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut map = HashMap::new();
        map.insert(a, 1);
        *map.entry(b).or_insert(0) += 1;
        assert_eq!(map.len(), 1);
        assert_eq!(map.values().next(), Some(&2));
    }

    #[test]
    fn test_connection_failures_share_key() {
        let a = VigilError::connection("10.0.0.1:1516", "refused").key();
        let b = VigilError::connection("10.0.0.2:1516", "reset").key();
        assert_eq!(a, b);
        assert_eq!(a.message, b.message);
    }

    #[test]
    fn test_from_wire_rebuilds_variant() {
        let errors = [
            VigilError::connection("10.0.0.1:1516", "refused"),
            VigilError::Timeout(Duration::from_millis(1500)),
            VigilError::PermissionDenied {
                action: "cluster:restart".into(),
            },
            VigilError::node_not_found(),
            VigilError::Validation {
                field: "events".into(),
                message: "missing required argument".into(),
            },
            VigilError::Internal {
                code: 1000,
                message: "boom".into(),
            },
        ];
        for err in errors {
            let back = VigilError::from_wire(Some(err.kind()), err.to_error_code(), err.wire_message());
            assert_eq!(back.to_string(), err.to_string());
            assert_eq!(back.key(), err.key());
            assert_eq!(back.key().message, err.key().message);
        }
    }

    #[test]
    fn test_from_wire_without_kind_is_remote_command() {
        let err = VigilError::from_wire(None, 1707, "Agent not active".into());
        assert!(matches!(err, VigilError::RemoteCommand { code: 1707, .. }));
    }
}

//! Request-type classification driving the dispatcher's routing.

use crate::error::VigilError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a request is allowed to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    /// Runs on the master; workers forward it.
    LocalMaster,
    /// Runs on the master and every worker; workers forward it to the master.
    DistributedMaster,
    /// Runs on whichever node receives it.
    LocalAny,
    /// Runs on the receiving worker.
    LocalWorker,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::LocalMaster => "local_master",
            RequestType::DistributedMaster => "distributed_master",
            RequestType::LocalAny => "local_any",
            RequestType::LocalWorker => "local_worker",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RequestType {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local_master" => Ok(RequestType::LocalMaster),
            "distributed_master" => Ok(RequestType::DistributedMaster),
            "local_any" => Ok(RequestType::LocalAny),
            "local_worker" => Ok(RequestType::LocalWorker),
            other => Err(VigilError::Validation {
                field: "request_type".to_string(),
                message: format!("unknown request type '{}'", other),
            }),
        }
    }
}

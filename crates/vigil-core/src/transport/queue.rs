//! Datagram queue sockets.
//!
//! Daemons that only consume messages (the analysis queue, the active
//! response queue) listen on Unix datagram sockets. A send is exactly one
//! datagram and nothing comes back.

use crate::config::SocketConfig;
use crate::error::{Result, VigilError};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Write-only handle on a daemon queue.
#[derive(Debug, Clone)]
pub struct QueueSocket {
    path: PathBuf,
}

impl QueueSocket {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Send `header` immediately followed by `message` as one datagram.
    pub async fn send_msg(&self, header: &str, message: &str) -> Result<()> {
        let datagram = format!("{}{}", header, message);
        if datagram.len() > SocketConfig::MAX_QUEUE_MESSAGE_SIZE {
            return Err(VigilError::Validation {
                field: "message".to_string(),
                message: format!(
                    "Queue message size {} exceeds maximum {}",
                    datagram.len(),
                    SocketConfig::MAX_QUEUE_MESSAGE_SIZE
                ),
            });
        }

        self.deliver(datagram.as_bytes()).await?;
        debug!("Queued {} bytes on {}", datagram.len(), self.path.display());
        Ok(())
    }

    #[cfg(unix)]
    async fn deliver(&self, datagram: &[u8]) -> Result<()> {
        let socket = tokio::net::UnixDatagram::unbound().map_err(|e| self.failure(e.to_string()))?;
        socket
            .send_to(datagram, &self.path)
            .await
            .map_err(|e| self.failure(e.to_string()))?;
        Ok(())
    }

    #[cfg(not(unix))]
    async fn deliver(&self, _datagram: &[u8]) -> Result<()> {
        Err(self.failure("datagram sockets are not available on this platform"))
    }

    fn failure(&self, message: impl Into<String>) -> VigilError {
        VigilError::connection(format!("unix:{}", self.path.display()), message)
    }
}

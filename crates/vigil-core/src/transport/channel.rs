//! One-request-per-connection framed socket client.
//!
//! Each [`FramedChannel::send`] opens a fresh connection, writes one frame,
//! reads exactly one reply frame and closes. Connections are never pooled or
//! shared between concurrent requests, and nothing here retries: any
//! socket-level problem is reported once as `ConnectionFailure`.

use super::framing::{read_frame, write_frame};
use crate::config::SocketConfig;
use crate::error::{Result, VigilError};
use std::fmt;
#[cfg(unix)]
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::debug;

/// Where a framed peer listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Local daemon socket.
    #[cfg(unix)]
    Unix(PathBuf),
    /// Cluster-internal `host:port`.
    Tcp(String),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(unix)]
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp:{}", addr),
        }
    }
}

/// Framed socket client bound to one endpoint.
#[derive(Debug, Clone)]
pub struct FramedChannel {
    endpoint: Endpoint,
    connect_timeout: Duration,
}

impl FramedChannel {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            connect_timeout: SocketConfig::CONNECT_TIMEOUT,
        }
    }

    #[cfg(unix)]
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self::new(Endpoint::Unix(path.into()))
    }

    pub fn tcp(addr: impl Into<String>) -> Self {
        Self::new(Endpoint::Tcp(addr.into()))
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Send one payload and wait for the peer's reply.
    pub async fn send(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() > SocketConfig::MAX_MESSAGE_SIZE {
            return Err(VigilError::Validation {
                field: "payload".to_string(),
                message: format!(
                    "Message size {} exceeds maximum {}",
                    payload.len(),
                    SocketConfig::MAX_MESSAGE_SIZE
                ),
            });
        }

        match &self.endpoint {
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let stream = self.connect(UnixStream::connect(path)).await?;
                self.exchange(stream, payload).await
            }
            Endpoint::Tcp(addr) => {
                let stream = self.connect(TcpStream::connect(addr.as_str())).await?;
                self.exchange(stream, payload).await
            }
        }
    }

    async fn connect<S>(
        &self,
        connecting: impl std::future::Future<Output = std::io::Result<S>>,
    ) -> Result<S> {
        match tokio::time::timeout(self.connect_timeout, connecting).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(self.failure(e.to_string())),
            Err(_) => Err(self.failure(format!(
                "connect timed out after {:?}",
                self.connect_timeout
            ))),
        }
    }

    async fn exchange<S>(&self, mut stream: S, payload: &[u8]) -> Result<Vec<u8>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        write_frame(&mut stream, payload)
            .await
            .map_err(|e| self.failure(e.to_string()))?;

        let reply = read_frame(&mut stream)
            .await
            .map_err(|e| self.failure(e.to_string()))?
            .ok_or_else(|| self.failure("connection closed before reply"))?;

        // Best effort: the exchange is complete either way.
        let _ = stream.shutdown().await;

        debug!(
            "Framed exchange with {}: sent {} bytes, received {} bytes",
            self.endpoint,
            payload.len(),
            reply.len()
        );
        Ok(reply)
    }

    fn failure(&self, message: impl Into<String>) -> VigilError {
        VigilError::connection(self.endpoint.to_string(), message)
    }
}

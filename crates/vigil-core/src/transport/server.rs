//! Framed socket server.
//!
//! Listens on a TCP address (cluster traffic) or a Unix socket (local
//! traffic), reads exactly one request frame per connection, hands it to a
//! [`FrameHandler`] and writes the handler's reply before closing.
//!
//! # Thread Safety
//!
//! The server runs on the tokio runtime. Each connection is handled in its own
//! spawned task; the handler is shared via `Arc` and must synchronize any
//! mutable state internally.

use super::channel::Endpoint;
use super::framing::{read_frame, write_frame};
use crate::config::SocketConfig;
use crate::error::Result;
use std::net::SocketAddr;
#[cfg(unix)]
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

/// Handles one decoded request frame and produces the reply frame.
#[async_trait::async_trait]
pub trait FrameHandler: Send + Sync + 'static {
    async fn handle(&self, request: Vec<u8>) -> Vec<u8>;
}

/// Handle to a running framed server. Dropping shuts down the server.
pub struct FramedServerHandle {
    endpoint: Endpoint,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl FramedServerHandle {
    /// Endpoint clients should connect to (resolved port for `:0` binds).
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Shut down the server.
    ///
    /// Stops accepting new connections and signals in-flight handlers to close.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
        #[cfg(unix)]
        if let Endpoint::Unix(path) = &self.endpoint {
            let _ = std::fs::remove_file(path);
        }
    }
}

impl Drop for FramedServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

enum Accepted {
    Tcp(TcpStream, SocketAddr),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Listener {
    async fn accept(&self) -> std::io::Result<Accepted> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok(Accepted::Tcp(stream, peer))
            }
            #[cfg(unix)]
            Listener::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Accepted::Unix(stream))
            }
        }
    }
}

/// Framed server that dispatches every request to a [`FrameHandler`].
pub struct FramedServer;

impl FramedServer {
    /// Start serving on a TCP address (`127.0.0.1:0` picks a free port).
    pub async fn bind_tcp<H: FrameHandler>(addr: &str, handler: Arc<H>) -> Result<FramedServerHandle> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!("Framed server listening on tcp:{}", local);
        Ok(Self::spawn(
            Listener::Tcp(listener),
            Endpoint::Tcp(local.to_string()),
            handler,
        ))
    }

    /// Start serving on a Unix socket path, replacing a stale socket file.
    #[cfg(unix)]
    pub async fn bind_unix<H: FrameHandler>(
        path: impl AsRef<Path>,
        handler: Arc<H>,
    ) -> Result<FramedServerHandle> {
        let path: PathBuf = path.as_ref().to_path_buf();
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| crate::VigilError::io_with_path(e, &path))?;
        }
        let listener = UnixListener::bind(&path).map_err(|e| crate::VigilError::io_with_path(e, &path))?;
        info!("Framed server listening on unix:{}", path.display());
        Ok(Self::spawn(Listener::Unix(listener), Endpoint::Unix(path), handler))
    }

    fn spawn<H: FrameHandler>(
        listener: Listener,
        endpoint: Endpoint,
        handler: Arc<H>,
    ) -> FramedServerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let active_connections = Arc::new(AtomicUsize::new(0));

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            handler,
            shutdown_rx,
            conn_shutdown_rx,
            active_connections,
        ));

        FramedServerHandle {
            endpoint,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        }
    }

    async fn accept_loop<H: FrameHandler>(
        listener: Listener,
        handler: Arc<H>,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
        active_connections: Arc<AtomicUsize>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Framed server shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    let accepted = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!("Framed server accept error: {}", e);
                            continue;
                        }
                    };

                    let current = active_connections.load(Ordering::Relaxed);
                    if current >= SocketConfig::MAX_CONNECTIONS {
                        warn!(
                            "Rejecting connection: at max capacity ({})",
                            SocketConfig::MAX_CONNECTIONS
                        );
                        continue;
                    }

                    active_connections.fetch_add(1, Ordering::Relaxed);
                    let handler = handler.clone();
                    let conns = active_connections.clone();
                    let mut conn_shutdown = conn_shutdown_rx.clone();

                    tokio::spawn(async move {
                        let outcome = match accepted {
                            Accepted::Tcp(stream, peer) => {
                                debug!("Connection from {}", peer);
                                Self::handle_connection(stream, &*handler, &mut conn_shutdown).await
                            }
                            #[cfg(unix)]
                            Accepted::Unix(stream) => {
                                Self::handle_connection(stream, &*handler, &mut conn_shutdown).await
                            }
                        };
                        if let Err(e) = outcome {
                            debug!("Connection ended with error: {}", e);
                        }
                        conns.fetch_sub(1, Ordering::Relaxed);
                    });
                }
            }
        }
    }

    async fn handle_connection<S, H>(
        mut stream: S,
        handler: &H,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        H: FrameHandler,
    {
        let frame = tokio::select! {
            result = read_frame(&mut stream) => {
                match result? {
                    Some(f) => f,
                    None => return Ok(()),
                }
            }
            _ = shutdown_rx.changed() => {
                return Ok(());
            }
        };

        let reply = handler.handle(frame).await;
        write_frame(&mut stream, &reply).await?;
        stream.shutdown().await?;
        Ok(())
    }
}

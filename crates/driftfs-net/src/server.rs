use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};

use crate::conn::MessageConn;
use crate::error::NetError;

/// Per-connection protocol logic. One handler instance serves every
/// connection; per-connection state lives on the task's stack.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    async fn handle(self: Arc<Self>, conn: MessageConn);
}

/// Accepts TCP connections and spawns a handler task per connection.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

/// Handle for a running server; dropping it does not stop the accept loop,
/// call [`ServerHandle::shutdown`] for that.
pub struct ServerHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl Server {
    /// Bind to the given port on all interfaces. Port 0 picks a free port.
    pub async fn bind(port: u16) -> Result<Self, NetError> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "listener bound");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Start the accept loop in a background task.
    pub fn start<H: ConnectionHandler>(self, handler: Arc<H>) -> ServerHandle {
        let shutdown = Arc::new(Notify::new());
        let shutdown_rx = Arc::clone(&shutdown);
        let addr = self.local_addr;

        let task = tokio::spawn(async move {
            Self::accept_loop(self.listener, handler, shutdown_rx).await;
            tracing::info!(%addr, "accept loop exited");
        });

        ServerHandle { shutdown, task }
    }

    async fn accept_loop<H: ConnectionHandler>(
        listener: TcpListener,
        handler: Arc<H>,
        shutdown: Arc<Notify>,
    ) {
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.notified() => {
                    tracing::info!("server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            tracing::debug!(%peer, "accepted connection");
                            match MessageConn::from_stream(stream) {
                                Ok(conn) => {
                                    let handler = Arc::clone(&handler);
                                    tasks.spawn(handler.handle(conn));
                                }
                                Err(e) => tracing::warn!(%peer, "dropping connection: {e}"),
                            }
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        }
                    }
                }
            }
        }

        tasks.shutdown().await;
    }
}

impl ServerHandle {
    /// Stop accepting and cancel in-flight connection tasks.
    pub async fn shutdown(self) {
        self.shutdown.notify_waiters();
        let _ = self.task.await;
    }
}

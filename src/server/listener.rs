//! Connection acceptor
//!
//! Accepts inbound TCP connections and routes them by request path:
//! `/stream` is handed to the client registry, everything else gets the
//! viewer page. Each connection is answered on its own task so a slow
//! request never holds up the accept loop.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::protocol::http::{self, Route};
use crate::registry::{ClientRegistry, Rejected};
use crate::server::config::ServerConfig;
use crate::stats::PipelineStats;

/// Accept loop state
pub(crate) struct Acceptor {
    listener: TcpListener,
    config: ServerConfig,
    registry: Arc<ClientRegistry>,
    stats: Arc<PipelineStats>,
}

impl Acceptor {
    pub(crate) fn new(
        listener: TcpListener,
        config: ServerConfig,
        registry: Arc<ClientRegistry>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            listener,
            config,
            registry,
            stats,
        }
    }

    /// Accept connections until shutdown is signalled
    ///
    /// Accept errors are logged and retried after a short backoff; they
    /// never end the loop.
    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        let config = self.config.clone();
                        let registry = Arc::clone(&self.registry);
                        let stats = Arc::clone(&self.stats);

                        connections.spawn(async move {
                            if let Err(e) =
                                handle_connection(socket, peer, config, registry, stats).await
                            {
                                tracing::debug!(peer = %peer, error = %e, "Connection error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = tokio::time::sleep(self.config.accept_backoff) => {}
                        }
                    }
                },

                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        // Handshakes still in progress are dropped with the listener
        connections.shutdown().await;
        tracing::debug!("Acceptor stopped");
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    peer: SocketAddr,
    config: ServerConfig,
    registry: Arc<ClientRegistry>,
    stats: Arc<PipelineStats>,
) -> Result<()> {
    if config.tcp_nodelay {
        socket.set_nodelay(true)?;
    }

    let head = match tokio::time::timeout(
        config.request_timeout,
        http::read_request_head(&mut socket),
    )
    .await
    {
        Ok(Ok(head)) => head,
        Ok(Err(Error::BadRequest(reason))) => {
            tracing::debug!(peer = %peer, reason = %reason, "Rejecting malformed request");
            socket.write_all(&http::bad_request_response()).await?;
            socket.shutdown().await?;
            return Ok(());
        }
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            tracing::debug!(peer = %peer, "Timed out waiting for request head");
            return Ok(());
        }
    };

    tracing::debug!(peer = %peer, method = %head.method, path = %head.path, "Request");

    match head.route() {
        Route::Viewer => {
            socket.write_all(&http::viewer_response()).await?;
            socket.shutdown().await?;
        }
        Route::Stream => match registry.register(Some(peer), Box::new(socket)).await {
            Ok(_) => stats.record_client_accepted(),
            Err(Rejected { error, mut conn }) => {
                stats.record_client_rejected();
                tracing::warn!(peer = %peer, error = %error, "Stream client rejected");

                let reply = async {
                    conn.write_all(&http::service_unavailable_response()).await?;
                    conn.shutdown().await
                };
                if tokio::time::timeout(config.send_timeout, reply).await.is_err() {
                    tracing::debug!(peer = %peer, "Timed out writing 503 response");
                }
            }
        },
    }

    Ok(())
}

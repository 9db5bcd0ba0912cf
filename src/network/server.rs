//! Listener accepting client connections

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::proxy::ProxyController;
use crate::{ProxyError, Result};

use super::connection_pool::ConnectionPool;
use super::http::HttpHandler;
use super::SHUTDOWN_TIMEOUT_MS;

/// HTTP/1.1 server in front of a [`ProxyController`]
pub struct ProxyServer {
    listener: TcpListener,
    controller: Arc<ProxyController>,
    connection_pool: ConnectionPool,
    shutdown_tx: broadcast::Sender<()>,
}

impl ProxyServer {
    /// Bind the configured listen address
    ///
    /// # Errors
    ///
    /// Returns `Config` error if the address cannot be bound
    pub async fn bind(controller: Arc<ProxyController>) -> Result<Self> {
        let addr = controller.config().listen;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ProxyError::Config(format!("Failed to bind {addr}: {e}")))?;

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            listener,
            connection_pool: ConnectionPool::new(controller.config().limits.max_connections),
            controller,
            shutdown_tx,
        })
    }

    /// Address actually bound (useful with port 0)
    ///
    /// # Errors
    ///
    /// Returns error if the socket address cannot be read
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Sender that stops [`run`](Self::run) when a message is sent
    #[must_use]
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Serve connections until ctrl-c or a shutdown message
    ///
    /// Pending pact writes are flushed before returning.
    ///
    /// # Errors
    ///
    /// Returns error if the final flush fails
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!(
            "Listening on {} (proxy to {}, mode {})",
            self.local_addr()?,
            self.controller.config().base_url,
            self.controller.modes().await.mode
        );

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => self.accept(stream, peer_addr),
                        Err(e) => error!("Accept error: {}", e),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received SIGINT, shutting down");
                    break;
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        self.shutdown_tx.send(()).ok();
        self.drain().await;
        self.controller.flush().await?;

        info!("Shutdown complete");
        Ok(())
    }

    fn accept(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let Some(guard) = self.connection_pool.try_acquire() else {
            warn!("Connection limit reached, rejecting {}", peer_addr);
            return;
        };

        let controller = Arc::clone(&self.controller);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _guard = guard;

            let service = service_fn(move |request: Request<Incoming>| {
                let controller = Arc::clone(&controller);
                async move { Ok::<_, Infallible>(serve(&controller, request).await) }
            });

            let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
            tokio::pin!(connection);

            let result = tokio::select! {
                result = connection.as_mut() => result,
                _ = shutdown_rx.recv() => {
                    // Finish the in-flight request, then close
                    connection.as_mut().graceful_shutdown();
                    connection.await
                }
            };

            if let Err(e) = result {
                debug!("Connection from {} closed: {}", peer_addr, e);
            }
        });
    }

    /// Wait for open connections to finish, up to the shutdown timeout
    async fn drain(&self) {
        let deadline = Duration::from_millis(SHUTDOWN_TIMEOUT_MS);
        let drained = tokio::time::timeout(deadline, async {
            while self.connection_pool.active_connections() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "{} connections still open after {}ms",
                self.connection_pool.active_connections(),
                SHUTDOWN_TIMEOUT_MS
            );
        }
    }
}

async fn serve(
    controller: &Arc<ProxyController>,
    request: Request<Incoming>,
) -> hyper::Response<http_body_util::Full<bytes::Bytes>> {
    let response = match HttpHandler::read_request(request, &controller.config().limits).await {
        Ok(request) => controller.dispatch(request).await,
        Err(e) => {
            warn!("Rejecting request: {}", e);
            HttpHandler::error_response(&e)
        }
    };
    HttpHandler::into_response(response)
}

//! Client socket listener.
//!
//! Accepts client connections on the node's socket port and hands each one
//! to a [`ConnectionHandler`]. The request-serving data path lives behind
//! that seam.
//!
//! Two connector flavours bound concurrency differently:
//! - `pooled` serves at most `core_threads` connections at a time
//! - `multiplexed` serves up to `max_threads` connections at a time

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tessera_core::{ConnectorKind, Error, Result, Service, ServiceStatus, ServiceType};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::bind_listener;

/// Serves one client connection.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// Handles `stream` until the client disconnects.
    async fn handle(&self, stream: TcpStream, peer: SocketAddr) -> Result<()>;
}

/// A connection handler that closes every connection immediately.
pub struct NoOpConnectionHandler;

#[async_trait]
impl ConnectionHandler for NoOpConnectionHandler {
    async fn handle(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        debug!(peer = %peer, "Closing client connection");
        drop(stream);
        Ok(())
    }
}

/// Socket listener settings.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Address to bind.
    pub bind: SocketAddr,
    /// Connector flavour.
    pub connector: ConnectorKind,
    /// Concurrent connections for the pooled connector.
    pub core_threads: usize,
    /// Concurrent connections for the multiplexed connector.
    pub max_threads: usize,
}

impl SocketConfig {
    fn concurrency(&self) -> usize {
        match self.connector {
            ConnectorKind::Pooled => self.core_threads,
            ConnectorKind::Multiplexed => self.max_threads,
        }
        .max(1)
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// Listens for client connections.
pub struct SocketService {
    config: SocketConfig,
    handler: Arc<dyn ConnectionHandler>,
    running: Mutex<Option<Running>>,
    status: ServiceStatus,
}

impl SocketService {
    /// Creates the listener.
    pub fn new(config: SocketConfig, handler: Arc<dyn ConnectionHandler>) -> Self {
        Self { config, handler, running: Mutex::new(None), status: ServiceStatus::new() }
    }

    /// The bound address while running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.local_addr)
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn ConnectionHandler>,
    permits: Arc<Semaphore>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let permit = tokio::select! {
            _ = shutdown.changed() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let (stream, peer) = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept client connection");
                    continue;
                }
            },
        };

        let handler = handler.clone();
        tokio::spawn(async move {
            if let Err(e) = handler.handle(stream, peer).await {
                warn!(peer = %peer, error = %e, "Client connection failed");
            }
            drop(permit);
        });
    }
    debug!("Socket accept loop exited");
}

#[async_trait]
impl Service for SocketService {
    fn service_type(&self) -> ServiceType {
        ServiceType::Socket
    }

    async fn start(&self) -> Result<()> {
        if !self.status.begin_start() {
            return Ok(());
        }

        let (listener, local_addr) = match bind_listener(self.config.bind).await {
            Ok(bound) => bound,
            Err(e) => {
                self.status.reset();
                return Err(Error::service_start(
                    ServiceType::Socket,
                    format!("cannot bind {}: {e}", self.config.bind),
                ));
            }
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let permits = Arc::new(Semaphore::new(self.config.concurrency()));
        let task = tokio::spawn(accept_loop(listener, self.handler.clone(), permits, shutdown_rx));
        *self.running.lock() = Some(Running { shutdown, task, local_addr });

        info!(
            addr = %local_addr,
            connector = ?self.config.connector,
            concurrency = self.config.concurrency(),
            "Socket listener started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if !self.status.begin_stop() {
            return Ok(());
        }

        let Some(running) = self.running.lock().take() else {
            return Ok(());
        };
        let _ = running.shutdown.send(true);
        running
            .task
            .await
            .map_err(|e| Error::service_stop(ServiceType::Socket, e))?;

        info!(addr = %running.local_addr, "Socket listener stopped");
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.status.is_started()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingHandler(AtomicUsize);

    #[async_trait]
    impl ConnectionHandler for CountingHandler {
        async fn handle(&self, _stream: TcpStream, _peer: SocketAddr) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config(connector: ConnectorKind) -> SocketConfig {
        SocketConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            connector,
            core_threads: 2,
            max_threads: 8,
        }
    }

    #[test]
    fn test_connector_concurrency() {
        assert_eq!(config(ConnectorKind::Pooled).concurrency(), 2);
        assert_eq!(config(ConnectorKind::Multiplexed).concurrency(), 8);
    }

    #[tokio::test]
    async fn test_accepts_connections() {
        let handler = Arc::new(CountingHandler(AtomicUsize::new(0)));
        let service = SocketService::new(config(ConnectorKind::Pooled), handler.clone());
        service.start().await.unwrap();

        let addr = service.local_addr().unwrap();
        for _ in 0..3 {
            let _stream = TcpStream::connect(addr).await.unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(handler.0.load(Ordering::SeqCst), 3);

        service.stop().await.unwrap();
        assert!(service.local_addr().is_none());
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_conflict_fails_start() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = config(ConnectorKind::Multiplexed);
        config.bind = taken.local_addr().unwrap();

        let service = SocketService::new(config, Arc::new(NoOpConnectionHandler));
        let err = service.start().await.unwrap_err();
        assert!(matches!(err, Error::ServiceStart { service: ServiceType::Socket, .. }));
        assert!(!service.is_started());
    }
}

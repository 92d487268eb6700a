//! Administrative listener serving the admin HTTP API.

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::Router;
use parking_lot::Mutex;
use tessera_core::{Error, Result, Service, ServiceStatus, ServiceType};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::bind_listener;

struct Running {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// Serves the admin router on the node's admin port.
pub struct AdminService {
    bind: SocketAddr,
    router: Router,
    running: Mutex<Option<Running>>,
    status: ServiceStatus,
}

impl AdminService {
    /// Creates the listener for `router`.
    #[must_use]
    pub fn new(bind: SocketAddr, router: Router) -> Self {
        Self { bind, router, running: Mutex::new(None), status: ServiceStatus::new() }
    }

    /// The bound address while running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.local_addr)
    }
}

#[async_trait]
impl Service for AdminService {
    fn service_type(&self) -> ServiceType {
        ServiceType::Admin
    }

    async fn start(&self) -> Result<()> {
        if !self.status.begin_start() {
            return Ok(());
        }

        let (listener, local_addr) = match bind_listener(self.bind).await {
            Ok(bound) => bound,
            Err(e) => {
                self.status.reset();
                return Err(Error::service_start(
                    ServiceType::Admin,
                    format!("cannot bind {}: {e}", self.bind),
                ));
            }
        };

        let (shutdown, shutdown_rx) = oneshot::channel();
        let app = self.router.clone();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                error!(error = %e, "Admin server error");
            }
        });
        *self.running.lock() = Some(Running { shutdown, task, local_addr });

        info!("Admin API listening on http://{}", local_addr);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if !self.status.begin_stop() {
            return Ok(());
        }

        let Some(running) = self.running.lock().take() else {
            return Ok(());
        };
        let _ = running.shutdown.send(());
        running.task.await.map_err(|e| Error::service_stop(ServiceType::Admin, e))?;

        info!(addr = %running.local_addr, "Admin API stopped");
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.status.is_started()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_conflict_leaves_service_stopped() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let service = AdminService::new(taken.local_addr().unwrap(), Router::new());

        let err = service.start().await.unwrap_err();
        assert!(matches!(err, Error::ServiceStart { service: ServiceType::Admin, .. }));
        assert!(!service.is_started());
        assert!(service.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_start_stop_releases_port() {
        let service = AdminService::new("127.0.0.1:0".parse().unwrap(), Router::new());
        service.start().await.unwrap();
        let addr = service.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        service.stop().await.unwrap();
        assert!(!service.is_started());
        assert!(std::net::TcpListener::bind(addr).is_ok());
    }
}

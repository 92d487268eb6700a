//! Management exporter serving Prometheus metrics.

use std::net::SocketAddr;
use std::sync::OnceLock;

use async_trait::async_trait;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;
use tessera_api::init_metrics;
use tessera_core::{Error, Result, Service, ServiceStatus, ServiceType};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::bind_listener;

struct Running {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Serves `/metrics` from an installed Prometheus recorder.
pub struct MetricsService {
    bind: SocketAddr,
    handle: PrometheusHandle,
    running: Mutex<Option<Running>>,
    status: ServiceStatus,
}

impl MetricsService {
    /// Creates the exporter for a handle returned by [`install_recorder`].
    #[must_use]
    pub fn new(bind: SocketAddr, handle: PrometheusHandle) -> Self {
        Self { bind, handle, running: Mutex::new(None), status: ServiceStatus::new() }
    }
}

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs a Prometheus recorder as the global recorder and returns its
/// render handle. Must run before any service records metrics.
///
/// Repeated calls return the handle of the first install. If a foreign
/// recorder is already installed the handle still renders, but only
/// metrics recorded through it.
pub fn install_recorder() -> PrometheusHandle {
    HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if metrics::set_global_recorder(recorder).is_err() {
                warn!(
                    "A metrics recorder is already installed, exporter will not see node metrics"
                );
            }
            init_metrics();
            handle
        })
        .clone()
}

#[async_trait]
impl Service for MetricsService {
    fn service_type(&self) -> ServiceType {
        ServiceType::Metrics
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
                    ServiceType::Metrics,
                    format!("cannot bind {}: {e}", self.bind),
                ));
            }
        };

        let handle = self.handle.clone();
        let app = Router::new().route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );

        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                error!(error = %e, "Metrics server error");
            }
        });
        *self.running.lock() = Some(Running { shutdown, task });

        info!("Metrics endpoint listening on http://{}/metrics", local_addr);
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
        running.task.await.map_err(|e| Error::service_stop(ServiceType::Metrics, e))?;

        info!("Metrics endpoint stopped");
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.status.is_started()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_handle() -> PrometheusHandle {
        PrometheusBuilder::new().build_recorder().handle()
    }

    #[tokio::test]
    async fn test_bind_conflict_leaves_service_stopped() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let service = MetricsService::new(taken.local_addr().unwrap(), local_handle());

        let err = service.start().await.unwrap_err();
        assert!(matches!(err, Error::ServiceStart { service: ServiceType::Metrics, .. }));
        assert!(!service.is_started());

        // A later start on a free port succeeds.
        drop(taken);
        service.start().await.unwrap();
        assert!(service.is_started());
        service.stop().await.unwrap();
    }
}

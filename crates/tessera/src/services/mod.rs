//! The subsystems a node starts and stops.

pub mod admin;
pub mod gossip;
pub mod metrics;
pub mod scheduler;
pub mod socket;
pub mod storage;

use std::net::SocketAddr;

use tokio::net::TcpListener;

pub use admin::AdminService;
pub use gossip::GossipService;
pub use metrics::{install_recorder, MetricsService};
pub use scheduler::{JobFuture, SchedulerService};
pub use socket::{ConnectionHandler, NoOpConnectionHandler, SocketConfig, SocketService};
pub use storage::{StorageService, StoreRepository};

/// Binds `addr` and resolves the bound address.
pub(crate) async fn bind_listener(addr: SocketAddr) -> std::io::Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    Ok((listener, local_addr))
}

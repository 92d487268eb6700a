//! Peer metadata gossip.
//!
//! On every interval the node picks one random peer, fetches its versioned
//! cluster topology and adopts it if it is newer than the local copy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tessera_cluster::{AdminClientConfig, AdminClientFactory, MetadataStore};
use tessera_core::{NodeId, Result, Service, ServiceStatus, ServiceType};
use tracing::{debug, info, warn};

use super::scheduler::{JobFuture, SchedulerService};

const GOSSIP_JOB: &str = "metadata-gossip";

#[derive(Clone)]
struct Gossiper {
    node_id: NodeId,
    metadata: Arc<MetadataStore>,
    admin: Arc<dyn AdminClientFactory>,
    admin_config: AdminClientConfig,
}

impl Gossiper {
    /// One gossip round. Returns true if a newer topology was adopted.
    async fn round(&self) -> Result<bool> {
        let cluster = self.metadata.cluster()?;
        let peer = {
            let peers: Vec<NodeId> = cluster.node_ids().filter(|id| *id != self.node_id).collect();
            match peers.choose(&mut rand::thread_rng()) {
                Some(peer) => *peer,
                None => return Ok(false),
            }
        };

        let client = self.admin.open(&cluster, &self.admin_config)?;
        let fetched = client.fetch_cluster(peer).await;
        client.close().await;

        let remote = fetched?;
        let adopted = self.metadata.put_cluster_if_newer(&remote)?;
        if adopted {
            info!(peer, version = remote.version, "Adopted newer cluster topology from peer");
        } else {
            debug!(peer, version = remote.version, "Peer topology is not newer");
        }
        Ok(adopted)
    }
}

/// Periodically reconciles the cluster topology with a random peer.
pub struct GossipService {
    gossiper: Gossiper,
    scheduler: Arc<SchedulerService>,
    interval: Duration,
    status: ServiceStatus,
}

impl GossipService {
    /// Creates the service. Rounds run on `scheduler`.
    pub fn new(
        node_id: NodeId,
        metadata: Arc<MetadataStore>,
        admin: Arc<dyn AdminClientFactory>,
        admin_config: AdminClientConfig,
        scheduler: Arc<SchedulerService>,
        interval: Duration,
    ) -> Self {
        Self {
            gossiper: Gossiper { node_id, metadata, admin, admin_config },
            scheduler,
            interval,
            status: ServiceStatus::new(),
        }
    }

    /// Runs a single round immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer cannot be reached or the store fails.
    pub async fn gossip_once(&self) -> Result<bool> {
        self.gossiper.round().await
    }
}

#[async_trait]
impl Service for GossipService {
    fn service_type(&self) -> ServiceType {
        ServiceType::Gossip
    }

    async fn start(&self) -> Result<()> {
        if !self.status.begin_start() {
            return Ok(());
        }

        let gossiper = self.gossiper.clone();
        let scheduled = self.scheduler.schedule(GOSSIP_JOB, self.interval, move || -> JobFuture {
            let gossiper = gossiper.clone();
            Box::pin(async move {
                if let Err(e) = gossiper.round().await {
                    warn!(error = %e, "Metadata gossip round failed");
                }
            })
        });
        if let Err(e) = scheduled {
            self.status.reset();
            return Err(tessera_core::Error::service_start(ServiceType::Gossip, e));
        }

        info!(interval_ms = self.interval.as_millis() as u64, "Metadata gossip started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if !self.status.begin_stop() {
            return Ok(());
        }
        self.scheduler.cancel(GOSSIP_JOB);
        info!("Metadata gossip stopped");
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.status.is_started()
    }
}

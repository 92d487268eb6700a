// Copyright 2026 The Tessera Authors
// SPDX-License-Identifier: Apache-2.0

//! Node lifecycle: composition, startup, recovery and shutdown.
//!
//! A node is constructed once from its configuration and metadata store.
//! Construction resolves the node's identity against the cluster topology
//! and builds the ordered service list. `start` brings every service up and
//! then resolves any rebalance interrupted by a previous run. `stop` tears
//! the services down in reverse order.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tessera_api::{create_admin_router, AdminState};
use tessera_cluster::metadata::METADATA_DB_FILE;
use tessera_cluster::{
    AdminClientConfig, AdminClientFactory, AsyncTaskRunner, HttpAdminClientFactory, MetadataStore,
    MigrationExecutor, NoOpMigrationExecutor, RebalanceRecoveryController, RecoveryConfig,
    RecoveryOutcome,
};
use tessera_core::{
    Cluster, Config, Error, NodeIdentity, Result, Service, ServiceStatus, ServiceType,
};
use tracing::{debug, info};

use crate::registry::ServiceRegistry;
use crate::services::{
    install_recorder, AdminService, ConnectionHandler, GossipService, MetricsService,
    NoOpConnectionHandler, SchedulerService, SocketConfig, SocketService, StorageService,
    StoreRepository,
};

/// Pluggable collaborators a node talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Opens admin connections to peers.
    pub admin: Arc<dyn AdminClientFactory>,
    /// Runs migrations this node donates.
    pub executor: Arc<dyn MigrationExecutor>,
    /// Serves client connections.
    pub connection_handler: Arc<dyn ConnectionHandler>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            admin: Arc::new(HttpAdminClientFactory),
            executor: Arc::new(NoOpMigrationExecutor),
            connection_handler: Arc::new(NoOpConnectionHandler),
        }
    }
}

/// A node process: its identity, metadata and services.
pub struct NodeLifecycle {
    config: Config,
    identity: NodeIdentity,
    metadata: Arc<MetadataStore>,
    runner: Arc<AsyncTaskRunner>,
    scheduler: Arc<SchedulerService>,
    repository: Arc<StoreRepository>,
    admin: Arc<dyn AdminClientFactory>,
    registry: ServiceRegistry,
    status: ServiceStatus,
    recovery_outcome: Mutex<Option<RecoveryOutcome>>,
}

impl NodeLifecycle {
    /// Constructs a node from its configuration, opening the metadata store
    /// in `node.metadata_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid, no topology
    /// is available, or the node id is not in the topology.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let metadata = MetadataStore::open_dir(&config.node.metadata_dir)?;
        Self::from_parts(config, Arc::new(metadata), Collaborators::default())
    }

    /// Constructs a node with an explicit topology, which replaces the stored one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid or the node
    /// id is not in `cluster`. Nothing is written in that case.
    pub fn with_cluster(config: Config, cluster: Cluster) -> Result<Self> {
        config.validate()?;
        NodeIdentity::resolve(&cluster, config.node.node_id)?;

        std::fs::create_dir_all(&config.node.metadata_dir)?;
        let metadata = MetadataStore::open(config.node.metadata_dir.join(METADATA_DB_FILE))?;
        metadata.put_cluster(&cluster)?;
        Self::from_parts(config, Arc::new(metadata), Collaborators::default())
    }

    /// Constructs a node from an already opened metadata store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid, the store
    /// holds no topology, or the node id is not in it.
    pub fn from_parts(
        config: Config,
        metadata: Arc<MetadataStore>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;
        let cluster = metadata.cluster()?;
        let identity = NodeIdentity::resolve(&cluster, config.node.node_id)?;

        // Installed before any service exists so every metric is captured.
        let metrics_exporter = if config.metrics.enabled {
            let bind: SocketAddr = format!("{}:{}", config.metrics.bind, config.metrics.port)
                .parse()
                .map_err(|e| {
                    Error::Config(format!(
                        "invalid metrics bind address {}: {e}",
                        config.metrics.bind
                    ))
                })?;
            Some(MetricsService::new(bind, install_recorder()))
        } else {
            None
        };

        let runner = Arc::new(AsyncTaskRunner::new(&config.runner));
        let scheduler = Arc::new(SchedulerService::new(config.scheduler.threads));
        let storage =
            Arc::new(StorageService::new(&config.node.data_dir, config.storage.stores.clone()));
        let repository = storage.repository();

        let mut registry = ServiceRegistry::new();
        registry.register(storage)?;
        registry.register(scheduler.clone())?;
        registry.register(runner.clone())?;

        if config.server.socket_enabled {
            let socket = SocketConfig {
                bind: SocketAddr::from(([0, 0, 0, 0], identity.socket_port())),
                connector: config.server.connector,
                core_threads: config.server.core_threads,
                max_threads: config.server.max_threads,
            };
            registry.register(Arc::new(SocketService::new(
                socket,
                collaborators.connection_handler.clone(),
            )))?;
        }

        if config.admin.enabled {
            let router = create_admin_router(
                AdminState {
                    node_id: identity.id(),
                    metadata: metadata.clone(),
                    runner: runner.clone(),
                    executor: collaborators.executor.clone(),
                },
                config.admin.max_connections,
                true,
            );
            let bind = SocketAddr::from(([0, 0, 0, 0], identity.admin_port()));
            registry.register(Arc::new(AdminService::new(bind, router)))?;
        }

        if config.gossip.enabled {
            registry.register(Arc::new(GossipService::new(
                identity.id(),
                metadata.clone(),
                collaborators.admin.clone(),
                AdminClientConfig::from(&config.admin),
                scheduler.clone(),
                config.gossip.interval(),
            )))?;
        }

        if let Some(exporter) = metrics_exporter {
            registry.register(Arc::new(exporter))?;
        }

        debug!(
            node_id = identity.id(),
            services = ?registry.service_types(),
            "Composed node services"
        );

        Ok(Self {
            config,
            identity,
            metadata,
            runner,
            scheduler,
            repository,
            admin: collaborators.admin,
            registry,
            status: ServiceStatus::new(),
            recovery_outcome: Mutex::new(None),
        })
    }

    /// Starts every service, then resolves any interrupted rebalance.
    /// Does nothing if already started.
    ///
    /// # Errors
    ///
    /// Returns the first service start failure, or a metadata store error
    /// raised during recovery. Failed recovery attempts are not errors.
    pub async fn start(&self) -> Result<()> {
        if !self.status.begin_start() {
            debug!(node_id = self.identity.id(), "Node already started");
            return Ok(());
        }

        info!(
            node_id = self.identity.id(),
            services = ?self.registry.service_types(),
            "Starting node"
        );
        self.registry.start_all().await?;

        let controller = RebalanceRecoveryController::new(
            self.identity.id(),
            self.metadata.clone(),
            self.runner.clone(),
            self.admin.clone(),
            RecoveryConfig::from_config(&self.config),
        );
        let outcome = controller.run().await?;
        *self.recovery_outcome.lock() = Some(outcome);

        info!(node_id = self.identity.id(), outcome = ?outcome, "Node started");
        Ok(())
    }

    /// Stops every service in reverse start order. Does nothing if not started.
    ///
    /// # Errors
    ///
    /// Returns the first stop failure after every service has been stopped.
    pub async fn stop(&self) -> Result<()> {
        if !self.status.begin_stop() {
            debug!(node_id = self.identity.id(), "Node already stopped");
            return Ok(());
        }

        info!(node_id = self.identity.id(), "Stopping node");
        self.registry.stop_all().await?;
        info!(node_id = self.identity.id(), "Node stopped");
        Ok(())
    }

    /// Returns true between `start` and `stop`.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.status.is_started()
    }

    /// The node's identity.
    #[must_use]
    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// The node's configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The metadata store.
    #[must_use]
    pub fn metadata(&self) -> &Arc<MetadataStore> {
        &self.metadata
    }

    /// The async task runner.
    #[must_use]
    pub fn runner(&self) -> &Arc<AsyncTaskRunner> {
        &self.runner
    }

    /// The scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<SchedulerService> {
        &self.scheduler
    }

    /// Stores opened by the storage service.
    #[must_use]
    pub fn store_repository(&self) -> &Arc<StoreRepository> {
        &self.repository
    }

    /// The registered services.
    #[must_use]
    pub fn services(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Returns the service of the given type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceNotFound`] if it is not part of this node.
    pub fn service(&self, service_type: ServiceType) -> Result<Arc<dyn Service>> {
        self.registry.get(service_type)
    }

    /// How recovery ended on the last start.
    #[must_use]
    pub fn recovery_outcome(&self) -> Option<RecoveryOutcome> {
        *self.recovery_outcome.lock()
    }
}

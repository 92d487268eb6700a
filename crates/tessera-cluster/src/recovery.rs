// Copyright 2026 The Tessera Authors
// SPDX-License-Identifier: Apache-2.0

//! Resumption of a rebalance interrupted by a crash or restart.
//!
//! At startup the controller inspects the persisted operating state. A node
//! that went down while stealing partitions asks its donor to
//! finish the migration, since the donor knows how far it got. Each attempt
//! opens a fresh admin connection, submits the resume request through the
//! local [`AsyncTaskRunner`] and waits up to the rebalance timeout.
//!
//! Attempts are bounded. Once they are exhausted the node is forced back
//! into normal state rather than refusing to start. Either way the
//! rebalance state is cleared before the controller returns.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tessera_core::{Cluster, Config, NodeId, RebalanceStealInfo, Result};
use tracing::{error, info, warn};

use crate::admin::{AdminClient, AdminClientConfig, AdminClientFactory, MigrationRequest};
use crate::metadata::MetadataStore;
use crate::runner::AsyncTaskRunner;

/// Recovery settings.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryConfig {
    /// Deadline for one resume attempt.
    pub rebalance_timeout: Duration,
    /// Maximum number of resume attempts.
    pub max_attempts: u32,
    /// Settings for the per-attempt admin connection.
    pub admin: AdminClientConfig,
}

impl RecoveryConfig {
    /// Extracts the recovery settings from the node configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            rebalance_timeout: config.rebalance.timeout(),
            max_attempts: config.rebalance.max_attempts,
            admin: AdminClientConfig::from(&config.admin),
        }
    }
}

/// How recovery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The node was already in normal state.
    AlreadyNormal,
    /// The donor completed the migration.
    Resumed {
        /// Attempts made, including the successful one.
        attempts: u32,
    },
    /// Attempts ran out and the node was forced into normal state.
    Forced {
        /// Attempts made.
        attempts: u32,
    },
}

enum RecoveryState {
    Normal,
    Resuming(RebalanceStealInfo),
    Resolved(RecoveryOutcome),
}

/// Drives an interrupted rebalance to resolution.
pub struct RebalanceRecoveryController {
    node_id: NodeId,
    metadata: Arc<MetadataStore>,
    runner: Arc<AsyncTaskRunner>,
    admin: Arc<dyn AdminClientFactory>,
    config: RecoveryConfig,
}

impl RebalanceRecoveryController {
    /// Creates a controller for the local node.
    pub fn new(
        node_id: NodeId,
        metadata: Arc<MetadataStore>,
        runner: Arc<AsyncTaskRunner>,
        admin: Arc<dyn AdminClientFactory>,
        config: RecoveryConfig,
    ) -> Self {
        Self { node_id, metadata, runner, admin, config }
    }

    /// Runs recovery until the node is back in normal state.
    ///
    /// Failed attempts are logged and retried, never returned.
    ///
    /// # Errors
    ///
    /// Returns an error only if the metadata store cannot be read or written.
    pub async fn run(&self) -> Result<RecoveryOutcome> {
        let mut state = self.initial_state()?;
        loop {
            state = match state {
                RecoveryState::Normal => RecoveryState::Resolved(RecoveryOutcome::AlreadyNormal),
                RecoveryState::Resuming(steal_info) => {
                    RecoveryState::Resolved(self.resume(steal_info).await?)
                }
                RecoveryState::Resolved(outcome) => return Ok(outcome),
            };
        }
    }

    fn initial_state(&self) -> Result<RecoveryState> {
        let server_state = self.metadata.server_state()?;
        if server_state.is_normal() {
            return Ok(RecoveryState::Normal);
        }

        match self.metadata.rebalance_steal_info()? {
            Some(steal_info) => {
                info!(
                    node_id = self.node_id,
                    state = %server_state,
                    donor_id = steal_info.donor_id,
                    partitions = ?steal_info.partition_list,
                    "Found interrupted rebalance, resuming"
                );
                Ok(RecoveryState::Resuming(steal_info))
            }
            None => {
                warn!(
                    node_id = self.node_id,
                    state = %server_state,
                    "Node is rebalancing but has no steal info, forcing normal state"
                );
                self.metadata.clean_all_rebalancing_state()?;
                counter!("tessera_recovery_forced_total").increment(1);
                Ok(RecoveryState::Resolved(RecoveryOutcome::Forced { attempts: 0 }))
            }
        }
    }

    async fn resume(&self, mut steal_info: RebalanceStealInfo) -> Result<RecoveryOutcome> {
        let cluster = self.metadata.cluster()?;
        let mut attempts = 0;
        let mut resolved = false;

        while !resolved && steal_info.attempt < self.config.max_attempts {
            steal_info = steal_info.next_attempt();
            self.metadata.put_rebalance_steal_info(&steal_info)?;
            attempts += 1;
            counter!("tessera_recovery_attempts_total").increment(1);

            match self.attempt(&cluster, &steal_info).await {
                Ok(()) => resolved = true,
                Err(e) if e.is_recovery_attempt() => error!(
                    donor_id = steal_info.donor_id,
                    partitions = ?steal_info.partition_list,
                    attempt = steal_info.attempt,
                    max_attempts = self.config.max_attempts,
                    error = %e,
                    "Rebalance resume attempt failed"
                ),
                Err(e) => error!(
                    donor_id = steal_info.donor_id,
                    attempt = steal_info.attempt,
                    max_attempts = self.config.max_attempts,
                    error = %e,
                    "Rebalance resume attempt failed locally"
                ),
            }
        }

        self.metadata.clean_all_rebalancing_state()?;

        if resolved {
            info!(
                donor_id = steal_info.donor_id,
                attempts,
                "Interrupted rebalance completed, node is in normal state"
            );
            counter!("tessera_recovery_resolved_total").increment(1);
            Ok(RecoveryOutcome::Resumed { attempts })
        } else {
            warn!(
                donor_id = steal_info.donor_id,
                partitions = ?steal_info.partition_list,
                attempts,
                "Rebalance attempts exhausted, forcing node into normal state"
            );
            counter!("tessera_recovery_forced_total").increment(1);
            Ok(RecoveryOutcome::Forced { attempts })
        }
    }

    /// One attempt with its own admin connection, closed on every path.
    async fn attempt(&self, cluster: &Cluster, steal_info: &RebalanceStealInfo) -> Result<()> {
        let client = self.admin.open(cluster, &self.config.admin)?;
        let result = self.drive(client.clone(), steal_info).await;
        client.close().await;
        result
    }

    async fn drive(
        &self,
        client: Arc<dyn AdminClient>,
        steal_info: &RebalanceStealInfo,
    ) -> Result<()> {
        let request = MigrationRequest::from_steal_info(self.node_id, steal_info);
        let timeout = self.config.rebalance_timeout;

        let task_id = self.runner.submit(
            format!("resume rebalance from node {}", request.donor_id),
            async move {
                let remote_task = client.resume_migration(&request).await?;
                client.wait_for_completion(request.donor_id, remote_task, timeout).await
            },
        )?;

        self.runner.await_completion(task_id, timeout).await
    }
}

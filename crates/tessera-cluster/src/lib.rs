//! Cluster state and interrupted-rebalance recovery for Tessera nodes.
//!
//! This crate provides:
//! - A durable, versioned metadata store for topology and node state
//! - A bounded task runner for long-running operations
//! - An admin client for driving peers
//! - The controller that resumes a rebalance interrupted by a restart
//!
//! # Example
//!
//! ```ignore
//! use tessera_cluster::{RebalanceRecoveryController, RecoveryConfig};
//!
//! let controller = RebalanceRecoveryController::new(
//!     node_id,
//!     metadata,
//!     runner,
//!     Arc::new(HttpAdminClientFactory),
//!     RecoveryConfig::from_config(&config),
//! );
//! let outcome = controller.run().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admin;
pub mod metadata;
pub mod migration;
pub mod recovery;
pub mod runner;

pub use admin::{
    AdminClient, AdminClientConfig, AdminClientFactory, HttpAdminClient, HttpAdminClientFactory,
    MigrationRequest, SubmitTaskResponse,
};
pub use metadata::MetadataStore;
pub use migration::{MigrationExecutor, NoOpMigrationExecutor};
pub use recovery::{RebalanceRecoveryController, RecoveryConfig, RecoveryOutcome};
pub use runner::{AsyncTaskRunner, TaskFuture, TaskInfo, TaskStatus};

//! Seam for the donor-side partition migration.
//!
//! Moving partition data is owned by the storage layer. The admin API hands
//! each accepted migration request to a [`MigrationExecutor`] running on the
//! local task runner.

use async_trait::async_trait;
use tessera_core::Result;
use tracing::info;

use crate::admin::MigrationRequest;

/// Moves partitions from this node to a stealer.
#[async_trait]
pub trait MigrationExecutor: Send + Sync {
    /// Runs the migration to completion.
    async fn migrate(&self, request: &MigrationRequest) -> Result<()>;
}

/// A migration executor that moves nothing and always succeeds.
pub struct NoOpMigrationExecutor;

#[async_trait]
impl MigrationExecutor for NoOpMigrationExecutor {
    async fn migrate(&self, request: &MigrationRequest) -> Result<()> {
        info!(
            donor_id = request.donor_id,
            stealer_id = request.stealer_id,
            partitions = ?request.partitions,
            "No migration executor configured, reporting migration as complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_op_migration_executor() {
        let request = MigrationRequest {
            donor_id: 1,
            stealer_id: 2,
            partitions: vec![0, 3],
            store_names: vec![],
        };
        assert!(NoOpMigrationExecutor.migrate(&request).await.is_ok());
    }
}

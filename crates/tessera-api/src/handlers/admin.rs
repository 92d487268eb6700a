//! Node admin API handlers.
//!
//! Peers call these endpoints through `HttpAdminClient`: a recovering node
//! asks its donor to resume a migration and polls the resulting task, and
//! gossip fetches the versioned topology.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tessera_cluster::{
    AsyncTaskRunner, MetadataStore, MigrationExecutor, MigrationRequest, SubmitTaskResponse,
    TaskInfo,
};
use tessera_core::{Cluster, NodeId, RebalanceStealInfo, ServerState, TaskId, Versioned};
use tracing::info;

use crate::error::ApiError;

/// Application state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    /// This node's ID.
    pub node_id: NodeId,
    /// The node's metadata store.
    pub metadata: Arc<MetadataStore>,
    /// Runner executing accepted migrations.
    pub runner: Arc<AsyncTaskRunner>,
    /// Moves partition data for accepted migrations.
    pub executor: Arc<dyn MigrationExecutor>,
}

/// Node state response.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeStateResponse {
    /// This node's ID.
    pub node_id: NodeId,
    /// Operating state.
    pub state: ServerState,
    /// In-flight rebalance, if this node is stealing.
    pub steal_info: Option<RebalanceStealInfo>,
}

/// Get the node's operating state.
///
/// GET /admin/state
pub async fn get_state(
    State(state): State<AdminState>,
) -> Result<Json<NodeStateResponse>, ApiError> {
    Ok(Json(NodeStateResponse {
        node_id: state.node_id,
        state: state.metadata.server_state()?,
        steal_info: state.metadata.rebalance_steal_info()?,
    }))
}

/// Get the versioned cluster topology.
///
/// GET /admin/metadata/cluster
pub async fn get_cluster(
    State(state): State<AdminState>,
) -> Result<Json<Versioned<Cluster>>, ApiError> {
    Ok(Json(state.metadata.cluster_versioned()?))
}

/// Accept a migration with this node as donor and run it in the background.
///
/// POST /admin/migrations
pub async fn submit_migration(
    State(state): State<AdminState>,
    Json(request): Json<MigrationRequest>,
) -> Result<Json<SubmitTaskResponse>, ApiError> {
    if request.donor_id != state.node_id {
        return Err(ApiError::new(
            axum::http::StatusCode::BAD_REQUEST,
            format!("node {} is not the donor {}", state.node_id, request.donor_id),
        ));
    }

    let description = format!(
        "migrate partitions {:?} to node {}",
        request.partitions, request.stealer_id
    );
    let executor = state.executor.clone();
    let stealer_id = request.stealer_id;
    let task_id = state
        .runner
        .submit(description, async move { executor.migrate(&request).await })?;

    info!(task_id, stealer_id, "Accepted migration request");
    Ok(Json(SubmitTaskResponse { task_id }))
}

/// List retained tasks.
///
/// GET /admin/tasks
pub async fn list_tasks(State(state): State<AdminState>) -> Json<Vec<TaskInfo>> {
    Json(state.runner.list())
}

/// Get one task.
///
/// GET /admin/tasks/{task_id}
pub async fn get_task(
    State(state): State<AdminState>,
    Path(task_id): Path<TaskId>,
) -> Result<Json<TaskInfo>, ApiError> {
    Ok(Json(state.runner.info(task_id)?))
}

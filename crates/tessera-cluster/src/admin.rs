//! Administrative client used to drive peers.
//!
//! The recovery controller opens a client per attempt through an
//! [`AdminClientFactory`] and always closes it afterwards. The HTTP
//! implementation talks to the admin router every node serves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tessera_core::config::AdminConfig;
use tessera_core::{
    Cluster, Error, NodeId, PartitionId, RebalanceStealInfo, Result, TaskId, Versioned,
};
use tracing::debug;

use crate::runner::{TaskInfo, TaskStatus};

/// Request to move partitions from a donor to a stealer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRequest {
    /// Node the partitions are moved from. The request is sent to this node.
    pub donor_id: NodeId,
    /// Node receiving the partitions.
    pub stealer_id: NodeId,
    /// Partitions to move, in order.
    pub partitions: Vec<PartitionId>,
    /// Stores whose data is moved.
    pub store_names: Vec<String>,
}

impl MigrationRequest {
    /// Builds the request that resumes `info` on behalf of `stealer_id`.
    #[must_use]
    pub fn from_steal_info(stealer_id: NodeId, info: &RebalanceStealInfo) -> Self {
        Self {
            donor_id: info.donor_id,
            stealer_id,
            partitions: info.partition_list.clone(),
            store_names: info.store_names.clone(),
        }
    }
}

/// Body returned when a task is submitted on a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitTaskResponse {
    /// Id of the task on the peer.
    pub task_id: TaskId,
}

/// Timeouts for admin connections.
#[derive(Debug, Clone, Copy)]
pub struct AdminClientConfig {
    /// TCP connect timeout.
    pub connection_timeout: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Interval between status polls while waiting on a remote task.
    pub poll_interval: Duration,
}

impl Default for AdminClientConfig {
    fn default() -> Self {
        Self::from(&AdminConfig::default())
    }
}

impl From<&AdminConfig> for AdminClientConfig {
    fn from(config: &AdminConfig) -> Self {
        Self {
            connection_timeout: config.connection_timeout(),
            request_timeout: config.request_timeout(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// Client for administrative operations on peers.
#[async_trait]
pub trait AdminClient: Send + Sync {
    /// Asks the donor named in `request` to resume moving partitions to the
    /// stealer. Returns the donor-side task id.
    async fn resume_migration(&self, request: &MigrationRequest) -> Result<TaskId>;

    /// Returns the status of a task on `node_id`.
    async fn task_status(&self, node_id: NodeId, task_id: TaskId) -> Result<TaskStatus>;

    /// Waits until a task on `node_id` finishes or `timeout` elapses.
    async fn wait_for_completion(
        &self,
        node_id: NodeId,
        task_id: TaskId,
        timeout: Duration,
    ) -> Result<()>;

    /// Fetches the versioned cluster topology held by `node_id`.
    async fn fetch_cluster(&self, node_id: NodeId) -> Result<Versioned<Cluster>>;

    /// Releases the connection. Further calls fail.
    async fn close(&self);
}

/// Opens admin clients.
pub trait AdminClientFactory: Send + Sync {
    /// Opens a client against `cluster`.
    fn open(&self, cluster: &Cluster, config: &AdminClientConfig) -> Result<Arc<dyn AdminClient>>;
}

/// Admin client over HTTP.
pub struct HttpAdminClient {
    client: Client,
    cluster: Cluster,
    poll_interval: Duration,
    closed: AtomicBool,
}

impl HttpAdminClient {
    /// Creates a client for the nodes of `cluster`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Admin`] if the HTTP client cannot be built.
    pub fn new(cluster: Cluster, config: &AdminClientConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connection_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Admin(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            cluster,
            poll_interval: config.poll_interval,
            closed: AtomicBool::new(false),
        })
    }

    fn url(&self, node_id: NodeId, path: &str) -> Result<String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Admin("admin client is closed".to_string()));
        }
        let node = self
            .cluster
            .node_by_id(node_id)
            .ok_or_else(|| Error::Admin(format!("node {node_id} is not in the cluster")))?;
        Ok(format!("{}{path}", node.admin_url()))
    }

    async fn decode<T: DeserializeOwned>(url: &str, response: Response) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Admin(format!("{url} returned {status}: {body}")));
        }
        response.json().await.map_err(|e| Error::Admin(format!("invalid response from {url}: {e}")))
    }
}

#[async_trait]
impl AdminClient for HttpAdminClient {
    async fn resume_migration(&self, request: &MigrationRequest) -> Result<TaskId> {
        let url = self.url(request.donor_id, "/admin/migrations")?;
        debug!(url = %url, partitions = ?request.partitions, "Requesting migration");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Admin(format!("failed to reach {url}: {e}")))?;

        let body: SubmitTaskResponse = Self::decode(&url, response).await?;
        Ok(body.task_id)
    }

    async fn task_status(&self, node_id: NodeId, task_id: TaskId) -> Result<TaskStatus> {
        let url = self.url(node_id, &format!("/admin/tasks/{task_id}"))?;

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Admin(format!("failed to reach {url}: {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::TaskNotFound(task_id));
        }

        let info: TaskInfo = Self::decode(&url, response).await?;
        Ok(info.status)
    }

    async fn wait_for_completion(
        &self,
        node_id: NodeId,
        task_id: TaskId,
        timeout: Duration,
    ) -> Result<()> {
        let poll = async {
            loop {
                match self.task_status(node_id, task_id).await? {
                    TaskStatus::Succeeded => return Ok(()),
                    TaskStatus::Failed(message) => {
                        return Err(Error::TaskFailed { task_id, message });
                    }
                    TaskStatus::Running => tokio::time::sleep(self.poll_interval).await,
                }
            }
        };

        tokio::time::timeout(timeout, poll).await.map_err(|_| Error::Timeout { task_id, timeout })?
    }

    async fn fetch_cluster(&self, node_id: NodeId) -> Result<Versioned<Cluster>> {
        let url = self.url(node_id, "/admin/metadata/cluster")?;

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Admin(format!("failed to reach {url}: {e}")))?;

        Self::decode(&url, response).await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Opens [`HttpAdminClient`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpAdminClientFactory;

impl AdminClientFactory for HttpAdminClientFactory {
    fn open(&self, cluster: &Cluster, config: &AdminClientConfig) -> Result<Arc<dyn AdminClient>> {
        Ok(Arc::new(HttpAdminClient::new(cluster.clone(), config)?))
    }
}

//! Integration tests for the admin API served over a real listener.
//!
//! Requests go through `HttpAdminClient`, the same client a recovering
//! node uses against its donor.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tessera_api::{create_admin_router, AdminState};
use tessera_cluster::{
    AdminClient, AdminClientConfig, AsyncTaskRunner, HttpAdminClient, MetadataStore,
    MigrationExecutor, MigrationRequest, TaskStatus,
};
use tessera_core::config::RunnerConfig;
use tessera_core::{Cluster, Error, Node, RebalanceStealInfo, Result, ServerState, Service};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const DONOR: u64 = 1;

/// Fails migrations that include partition 13.
struct PickyExecutor;

#[async_trait]
impl MigrationExecutor for PickyExecutor {
    async fn migrate(&self, request: &MigrationRequest) -> Result<()> {
        if request.partitions.contains(&13) {
            return Err(Error::Database("partition 13 is corrupt".to_string()));
        }
        Ok(())
    }
}

/// A test admin server instance.
struct TestServer {
    addr: SocketAddr,
    metadata: Arc<MetadataStore>,
    _handle: JoinHandle<()>,
    _shutdown_tx: oneshot::Sender<()>,
}

impl TestServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get local addr");

        let metadata = Arc::new(MetadataStore::open_in_memory().unwrap());
        metadata.put_cluster(&cluster_at(addr)).unwrap();

        let runner = Arc::new(AsyncTaskRunner::new(&RunnerConfig::default()));
        runner.start().await.unwrap();

        let app = create_admin_router(
            AdminState {
                node_id: DONOR,
                metadata: metadata.clone(),
                runner,
                executor: Arc::new(PickyExecutor),
            },
            16,
            false,
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("Server error");
        });

        Self { addr, metadata, _handle: handle, _shutdown_tx: shutdown_tx }
    }

    fn client(&self) -> HttpAdminClient {
        let config = AdminClientConfig {
            connection_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(10),
        };
        HttpAdminClient::new(cluster_at(self.addr), &config).unwrap()
    }
}

fn cluster_at(addr: SocketAddr) -> Cluster {
    Cluster::new(
        "test",
        vec![Node {
            id: DONOR,
            host: addr.ip().to_string(),
            socket_port: 6666,
            admin_port: addr.port(),
            partitions: vec![1, 4, 7, 13],
        }],
    )
}

fn request(partitions: Vec<u32>) -> MigrationRequest {
    MigrationRequest { donor_id: DONOR, stealer_id: 2, partitions, store_names: vec![] }
}

#[tokio::test]
async fn test_migration_completes() {
    let server = TestServer::start().await;
    let client = server.client();

    let task_id = client.resume_migration(&request(vec![1, 4, 7])).await.unwrap();
    client.wait_for_completion(DONOR, task_id, Duration::from_secs(5)).await.unwrap();
    assert_eq!(client.task_status(DONOR, task_id).await.unwrap(), TaskStatus::Succeeded);
}

#[tokio::test]
async fn test_migration_failure_is_reported() {
    let server = TestServer::start().await;
    let client = server.client();

    let task_id = client.resume_migration(&request(vec![13])).await.unwrap();
    let err = client.wait_for_completion(DONOR, task_id, Duration::from_secs(5)).await.unwrap_err();
    match err {
        Error::TaskFailed { message, .. } => assert!(message.contains("partition 13")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_migration_to_wrong_donor_is_rejected() {
    let server = TestServer::start().await;

    // Node 9 resolves to the server of node 1, which is not the named donor.
    let cluster = Cluster::new(
        "test",
        vec![Node { id: 9, ..cluster_at(server.addr).nodes[0].clone() }],
    );
    let client_for_nine =
        HttpAdminClient::new(cluster, &AdminClientConfig::default()).unwrap();
    let mut wrong = request(vec![1]);
    wrong.donor_id = 9;

    let err = client_for_nine.resume_migration(&wrong).await.unwrap_err();
    assert!(matches!(err, Error::Admin(ref msg) if msg.contains("400")));
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let server = TestServer::start().await;
    let err = server.client().task_status(DONOR, 4242).await.unwrap_err();
    assert!(matches!(err, Error::TaskNotFound(4242)));
}

#[tokio::test]
async fn test_fetch_cluster_is_versioned() {
    let server = TestServer::start().await;
    server.metadata.put_cluster(&cluster_at(server.addr)).unwrap();

    let fetched = server.client().fetch_cluster(DONOR).await.unwrap();
    assert_eq!(fetched.version, 2);
    assert_eq!(fetched.value, cluster_at(server.addr));
}

#[tokio::test]
async fn test_state_and_task_list() {
    let server = TestServer::start().await;
    server
        .metadata
        .begin_rebalance_steal(&RebalanceStealInfo::new(3, vec![1], vec![]))
        .unwrap();

    let client = server.client();
    let task_id = client.resume_migration(&request(vec![4])).await.unwrap();
    client.wait_for_completion(DONOR, task_id, Duration::from_secs(5)).await.unwrap();

    let http = reqwest::Client::new();
    let state: serde_json::Value = http
        .get(format!("http://{}/admin/state", server.addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(state["node_id"], 1);
    assert_eq!(state["state"], serde_json::to_value(ServerState::RebalancingStealer).unwrap());
    assert_eq!(state["steal_info"]["donor_id"], 3);

    let tasks: serde_json::Value = http
        .get(format!("http://{}/admin/tasks", server.addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let tasks = tasks.as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["task_id"], task_id);
    assert_eq!(tasks[0]["status"], "succeeded");
}

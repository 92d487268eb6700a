//! Router configuration for the admin API.

use std::sync::Arc;

use axum::middleware as axum_middleware;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::Semaphore;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::handlers::admin::{self, AdminState};
use crate::middleware::concurrency_limit;

/// Create the admin API router.
///
/// # Arguments
///
/// * `admin_state` - Node state shared by the handlers
/// * `max_connections` - Requests served concurrently before answering 503
/// * `log_requests` - Whether to trace each request/response
pub fn create_admin_router(
    admin_state: AdminState,
    max_connections: usize,
    log_requests: bool,
) -> Router {
    let limit = Arc::new(Semaphore::new(max_connections.max(1)));

    let router = Router::new()
        .route("/admin/state", get(admin::get_state))
        .route("/admin/metadata/cluster", get(admin::get_cluster))
        .route("/admin/migrations", post(admin::submit_migration))
        .route("/admin/tasks", get(admin::list_tasks))
        .route("/admin/tasks/{task_id}", get(admin::get_task))
        .with_state(admin_state)
        .layer(axum_middleware::from_fn_with_state(limit, concurrency_limit));

    if log_requests {
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
            .on_response(DefaultOnResponse::new().level(Level::DEBUG));
        router.layer(trace_layer)
    } else {
        router
    }
}

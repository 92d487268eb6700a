//! HTTP middleware for the admin API.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::Semaphore;
use tracing::warn;

use crate::error::ApiError;

/// Rejects requests with 503 once `limit` requests are already in flight.
///
/// The semaphore is sized from `admin.max_connections`.
pub async fn concurrency_limit(
    State(limit): State<Arc<Semaphore>>,
    request: Request,
    next: Next,
) -> Response {
    let Ok(_permit) = limit.try_acquire() else {
        warn!(path = %request.uri().path(), "Admin request rejected, too many in flight");
        return ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "too many concurrent admin requests")
            .into_response();
    };
    next.run(request).await
}

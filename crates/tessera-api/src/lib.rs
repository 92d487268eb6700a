//! Administrative HTTP API for Tessera nodes.
//!
//! This crate provides the router served by the admin listener:
//! - Node state and versioned topology for peers and gossip
//! - Migration submission backed by the local task runner
//! - Task status for remote polling

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod router;

pub use error::ApiError;
pub use handlers::admin::AdminState;
pub use metrics::init_metrics;
pub use router::create_admin_router;

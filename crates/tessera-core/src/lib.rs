//! Core types and utilities for Tessera nodes.
//!
//! This crate provides the building blocks shared by every Tessera crate:
//! - Configuration management
//! - The error taxonomy for bootstrap, shutdown and recovery
//! - Cluster topology, node identity and rebalance state types
//! - The [`Service`] start/stop contract

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod service;
pub mod types;

pub use config::{Config, ConnectorKind, LogFormat};
pub use error::{Error, Result};
pub use service::{Service, ServiceStatus};
pub use types::{
    Cluster, Node, NodeId, NodeIdentity, PartitionId, RebalanceStealInfo, ServerState,
    ServiceType, TaskId, Versioned,
};

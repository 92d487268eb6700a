//! Tessera node process.
//!
//! This crate assembles a node from its subsystems:
//! - [`ServiceRegistry`]: ordered start, reverse-order stop
//! - [`NodeLifecycle`]: composition, startup, rebalance recovery, shutdown
//! - [`services`]: storage, scheduler, client socket, admin, gossip and
//!   metrics services

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod lifecycle;
pub mod registry;
pub mod services;

pub use lifecycle::{Collaborators, NodeLifecycle};
pub use registry::ServiceRegistry;

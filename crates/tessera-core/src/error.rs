// Copyright 2026 The Tessera Authors
// SPDX-License-Identifier: Apache-2.0

//! Error types for Tessera.

use std::time::Duration;

use thiserror::Error;

use crate::types::{ServiceType, TaskId};

/// A specialized `Result` type for Tessera operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while bootstrapping, running or recovering a node.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing configuration, or an identity that does not
    /// match the cluster topology.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata database error.
    #[error("database error: {0}")]
    Database(String),

    /// Encoding or decoding of a stored or transmitted value failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A subsystem failed to start.
    #[error("failed to start {service} service: {message}")]
    ServiceStart {
        /// The service that failed.
        service: ServiceType,
        /// What went wrong.
        message: String,
    },

    /// A subsystem failed to stop.
    #[error("failed to stop {service} service: {message}")]
    ServiceStop {
        /// The service that failed.
        service: ServiceType,
        /// What went wrong.
        message: String,
    },

    /// A second service with the same type tag was registered.
    #[error("{0} service is already registered")]
    DuplicateService(ServiceType),

    /// A service was requested that was never registered.
    #[error("{0} service has not been initialized")]
    ServiceNotFound(ServiceType),

    /// An operation was attempted on a component that is not running.
    #[error("{0} is not running")]
    NotStarted(String),

    /// An administrative request to a peer failed.
    #[error("admin request failed: {0}")]
    Admin(String),

    /// An asynchronous task finished with a failure.
    #[error("task {task_id} failed: {message}")]
    TaskFailed {
        /// The failed task.
        task_id: TaskId,
        /// The failure reported by the task.
        message: String,
    },

    /// Waiting for an asynchronous task exceeded its deadline.
    #[error("task {task_id} did not complete within {timeout:?}")]
    Timeout {
        /// The task being waited on.
        task_id: TaskId,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// The task id is unknown or its outcome has been evicted.
    #[error("task {0} not found")]
    TaskNotFound(TaskId),
}

impl Error {
    /// Creates a service start error.
    #[must_use]
    pub fn service_start(service: ServiceType, message: impl std::fmt::Display) -> Self {
        Self::ServiceStart { service, message: message.to_string() }
    }

    /// Creates a service stop error.
    #[must_use]
    pub fn service_stop(service: ServiceType, message: impl std::fmt::Display) -> Self {
        Self::ServiceStop { service, message: message.to_string() }
    }

    /// Creates a database error from anything displayable.
    #[must_use]
    pub fn database(e: impl std::fmt::Display) -> Self {
        Self::Database(e.to_string())
    }

    /// Creates a serialization error from anything displayable.
    #[must_use]
    pub fn serialization(e: impl std::fmt::Display) -> Self {
        Self::Serialization(e.to_string())
    }

    /// Returns true for failures of a single rebalance-resume attempt
    /// (admin call error, remote task failure, timeout). These are retried.
    #[must_use]
    pub const fn is_recovery_attempt(&self) -> bool {
        matches!(self, Self::Admin(_) | Self::TaskFailed { .. } | Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_attempt_classification() {
        assert!(Error::Admin("connection refused".to_string()).is_recovery_attempt());
        assert!(Error::TaskFailed { task_id: 1, message: "boom".to_string() }
            .is_recovery_attempt());
        assert!(Error::Timeout { task_id: 1, timeout: Duration::from_secs(1) }
            .is_recovery_attempt());
        assert!(!Error::TaskNotFound(1).is_recovery_attempt());
        assert!(!Error::Config("bad".to_string()).is_recovery_attempt());
        assert!(!Error::NotStarted("async runner".to_string()).is_recovery_attempt());
    }

    #[test]
    fn test_display() {
        let err = Error::service_stop(ServiceType::Socket, "listener gone");
        assert_eq!(err.to_string(), "failed to stop socket service: listener gone");

        let err = Error::TaskNotFound(42);
        assert_eq!(err.to_string(), "task 42 not found");
    }
}

//! The uniform start/stop contract shared by every subsystem.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::error::Result;
use crate::types::ServiceType;

/// A subsystem the node lifecycle starts and stops.
///
/// The lifecycle treats every implementation uniformly and never inspects
/// its internal state. Implementations should make `start` a no-op when
/// already started and `stop` a no-op when not started.
#[async_trait]
pub trait Service: Send + Sync {
    /// The type tag identifying this service.
    fn service_type(&self) -> ServiceType;

    /// Starts the service.
    async fn start(&self) -> Result<()>;

    /// Stops the service.
    async fn stop(&self) -> Result<()>;

    /// Returns true between a successful `start` and the next `stop`.
    fn is_started(&self) -> bool;
}

/// Started/stopped flag with atomic transitions.
#[derive(Debug, Default)]
pub struct ServiceStatus {
    started: AtomicBool,
}

impl ServiceStatus {
    /// Creates a status in the stopped state.
    #[must_use]
    pub const fn new() -> Self {
        Self { started: AtomicBool::new(false) }
    }

    /// Moves to started. Returns false if already started.
    pub fn begin_start(&self) -> bool {
        self.started.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }

    /// Moves to stopped. Returns false if already stopped.
    pub fn begin_stop(&self) -> bool {
        self.started.compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }

    /// Forces the stopped state, used to roll back a failed start.
    pub fn reset(&self) {
        self.started.store(false, Ordering::SeqCst);
    }

    /// Returns true if started.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        let status = ServiceStatus::new();
        assert!(!status.is_started());
        assert!(!status.begin_stop());

        assert!(status.begin_start());
        assert!(!status.begin_start());
        assert!(status.is_started());

        assert!(status.begin_stop());
        assert!(!status.is_started());

        assert!(status.begin_start());
        status.reset();
        assert!(!status.is_started());
    }
}

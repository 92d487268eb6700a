// Copyright 2026 The Tessera Authors
// SPDX-License-Identifier: Apache-2.0

//! Ordered registry of node services.
//!
//! Services start in registration order and stop in exactly the reverse
//! order. Later services (network listeners) generate work against earlier
//! ones (storage, scheduler), so they are torn down first.

use std::sync::Arc;

use metrics::gauge;
use tessera_core::{Error, Result, Service, ServiceType};
use tracing::{error, info, warn};

/// Services of a node, at most one per [`ServiceType`].
#[derive(Default)]
pub struct ServiceRegistry {
    services: Vec<Arc<dyn Service>>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateService`] if a service of the same type is
    /// already registered.
    pub fn register(&mut self, service: Arc<dyn Service>) -> Result<()> {
        let service_type = service.service_type();
        if self.contains(service_type) {
            return Err(Error::DuplicateService(service_type));
        }
        self.services.push(service);
        Ok(())
    }

    /// Returns the service of the given type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceNotFound`] if none is registered.
    pub fn get(&self, service_type: ServiceType) -> Result<Arc<dyn Service>> {
        self.services
            .iter()
            .find(|s| s.service_type() == service_type)
            .cloned()
            .ok_or(Error::ServiceNotFound(service_type))
    }

    /// Returns true if a service of the given type is registered.
    #[must_use]
    pub fn contains(&self, service_type: ServiceType) -> bool {
        self.services.iter().any(|s| s.service_type() == service_type)
    }

    /// Registered service types in start order.
    #[must_use]
    pub fn service_types(&self) -> Vec<ServiceType> {
        self.services.iter().map(|s| s.service_type()).collect()
    }

    /// Number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns true if no service is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Starts every service in order, stopping at the first failure.
    ///
    /// Services started before the failure are left running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceStart`] naming the service that failed.
    pub async fn start_all(&self) -> Result<()> {
        for service in &self.services {
            let service_type = service.service_type();
            info!(service = %service_type, "Starting service");

            service.start().await.map_err(|e| match e {
                Error::ServiceStart { .. } => e,
                other => Error::service_start(service_type, other),
            })?;
            gauge!("tessera_services_started").increment(1.0);
        }
        Ok(())
    }

    /// Stops every service in reverse order, whether or not earlier stops
    /// fail. Every failure is logged.
    ///
    /// # Errors
    ///
    /// Returns the first stop failure once all services have been stopped.
    pub async fn stop_all(&self) -> Result<()> {
        let mut failures = Vec::new();

        for service in self.services.iter().rev() {
            let service_type = service.service_type();
            let was_started = service.is_started();
            info!(service = %service_type, "Stopping service");

            match service.stop().await {
                Ok(()) => {
                    if was_started {
                        gauge!("tessera_services_started").decrement(1.0);
                    }
                }
                Err(e) => {
                    error!(service = %service_type, error = %e, "Failed to stop service");
                    failures.push(match e {
                        Error::ServiceStop { .. } => e,
                        other => Error::service_stop(service_type, other),
                    });
                }
            }
        }

        if failures.len() > 1 {
            warn!(count = failures.len(), "Multiple services failed to stop, reporting the first");
        }
        match failures.into_iter().next() {
            Some(first) => Err(first),
            None => Ok(()),
        }
    }
}

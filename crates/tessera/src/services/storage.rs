//! Storage service.
//!
//! Prepares the data directory and one directory per configured store, and
//! keeps the repository of open stores that later services look up.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tessera_core::{Error, Result, Service, ServiceStatus, ServiceType};
use tracing::{debug, info};

/// Open stores by name.
#[derive(Debug, Default)]
pub struct StoreRepository {
    stores: DashMap<String, PathBuf>,
}

impl StoreRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the directory of an open store.
    #[must_use]
    pub fn store_dir(&self, name: &str) -> Option<PathBuf> {
        self.stores.get(name).map(|dir| dir.clone())
    }

    /// Returns the names of all open stores, sorted.
    #[must_use]
    pub fn store_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.stores.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn insert(&self, name: String, dir: PathBuf) {
        self.stores.insert(name, dir);
    }

    fn clear(&self) {
        self.stores.clear();
    }
}

/// Opens the configured stores under the data directory.
pub struct StorageService {
    data_dir: PathBuf,
    store_names: Vec<String>,
    repository: Arc<StoreRepository>,
    status: ServiceStatus,
}

impl StorageService {
    /// Creates the service.
    pub fn new(data_dir: impl AsRef<Path>, store_names: Vec<String>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            store_names,
            repository: Arc::new(StoreRepository::new()),
            status: ServiceStatus::new(),
        }
    }

    /// The repository populated on start.
    #[must_use]
    pub fn repository(&self) -> Arc<StoreRepository> {
        self.repository.clone()
    }

    async fn open_stores(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        for name in &self.store_names {
            let dir = self.data_dir.join(name);
            tokio::fs::create_dir_all(&dir).await?;
            debug!(store = %name, dir = %dir.display(), "Opened store");
            self.repository.insert(name.clone(), dir);
        }
        Ok(())
    }
}

#[async_trait]
impl Service for StorageService {
    fn service_type(&self) -> ServiceType {
        ServiceType::Storage
    }

    async fn start(&self) -> Result<()> {
        if !self.status.begin_start() {
            return Ok(());
        }

        if let Err(e) = self.open_stores().await {
            self.status.reset();
            self.repository.clear();
            return Err(Error::service_start(ServiceType::Storage, e));
        }

        info!(
            data_dir = %self.data_dir.display(),
            stores = self.store_names.len(),
            "Storage service started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if !self.status.begin_stop() {
            return Ok(());
        }
        self.repository.clear();
        info!("Storage service stopped");
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.status.is_started()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_opens_store_directories() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let service =
            StorageService::new(&data_dir, vec!["users".to_string(), "carts".to_string()]);

        service.start().await.unwrap();
        assert!(service.is_started());
        assert!(data_dir.join("users").is_dir());
        assert!(data_dir.join("carts").is_dir());

        let repository = service.repository();
        assert_eq!(repository.store_names(), vec!["carts".to_string(), "users".to_string()]);
        assert_eq!(repository.store_dir("users"), Some(data_dir.join("users")));

        service.stop().await.unwrap();
        assert!(!service.is_started());
        assert!(repository.store_names().is_empty());
    }

    #[tokio::test]
    async fn test_start_fails_on_file_in_the_way() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        std::fs::write(&data_dir, b"not a directory").unwrap();

        let service = StorageService::new(&data_dir, vec![]);
        let err = service.start().await.unwrap_err();
        assert!(matches!(err, Error::ServiceStart { service: ServiceType::Storage, .. }));
        assert!(!service.is_started());
    }
}

// Copyright 2026 The Tessera Authors
// SPDX-License-Identifier: Apache-2.0

//! Redb-backed cluster metadata store.
//!
//! Stores, under a fixed set of well-known keys:
//! - The cluster topology
//! - This node's operating state
//! - The descriptor of an in-flight rebalance this node is stealing for
//!
//! Every key carries a version that increases with each write.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, Table, TableDefinition};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tessera_core::config::CLUSTER_CONFIG_FILE;
use tessera_core::{Cluster, Error, RebalanceStealInfo, Result, ServerState, Versioned};
use tracing::{debug, info};

/// Table for metadata entries.
/// Key: well-known metadata key, Value: bincode-serialized `StoredEntry`
const META_TABLE: TableDefinition<'static, &'static str, &'static [u8]> =
    TableDefinition::new("metadata");

/// Key of the cluster topology.
pub const CLUSTER_KEY: &str = "cluster";
/// Key of the node operating state.
pub const SERVER_STATE_KEY: &str = "server.state";
/// Key of the rebalance steal descriptor.
pub const REBALANCING_STEAL_INFO_KEY: &str = "rebalancing.steal.info";

/// File name of the metadata database inside the metadata directory.
pub const METADATA_DB_FILE: &str = "metadata.redb";

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    version: u64,
    payload: Vec<u8>,
}

type MetaTable<'txn> = Table<'txn, &'static str, &'static [u8]>;

fn read_entry(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> Result<Option<StoredEntry>> {
    match table.get(key).map_err(Error::database)? {
        Some(guard) => {
            let entry = bincode::deserialize(guard.value()).map_err(Error::serialization)?;
            Ok(Some(entry))
        }
        None => Ok(None),
    }
}

fn write_entry<T: Serialize>(
    table: &mut MetaTable<'_>,
    key: &str,
    version: u64,
    value: &T,
) -> Result<()> {
    let payload = bincode::serialize(value).map_err(Error::serialization)?;
    let bytes =
        bincode::serialize(&StoredEntry { version, payload }).map_err(Error::serialization)?;
    table.insert(key, bytes.as_slice()).map_err(Error::database)?;
    Ok(())
}

/// Writes `value` at one past the key's current version.
fn bump_entry<T: Serialize>(table: &mut MetaTable<'_>, key: &str, value: &T) -> Result<u64> {
    let version = read_entry(&*table, key)?.map_or(1, |e| e.version + 1);
    write_entry(table, key, version, value)?;
    Ok(version)
}

/// Durable, versioned store of cluster topology and node rebalance state.
pub struct MetadataStore {
    db: Arc<Database>,
}

impl MetadataStore {
    /// Opens or creates a metadata database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        debug!(path = ?path.as_ref(), "Opening metadata store");
        let db = Database::create(path).map_err(Error::database)?;
        Self::init(db)
    }

    /// Opens an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(Error::database)?;
        Self::init(db)
    }

    /// Opens the metadata database inside `dir`, seeding the topology from
    /// `dir/cluster.toml` when none has been stored yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no topology is stored and the file is
    /// missing or malformed.
    pub fn open_dir(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let store = Self::open(dir.join(METADATA_DB_FILE))?;

        if store.get::<Cluster>(CLUSTER_KEY)?.is_none() {
            let path = dir.join(CLUSTER_CONFIG_FILE);
            if !path.exists() {
                return Err(Error::Config(format!(
                    "no cluster topology stored and {} does not exist",
                    path.display()
                )));
            }
            let cluster = Cluster::from_file(&path)?;
            info!(cluster = %cluster.name, nodes = cluster.nodes.len(), "Seeding cluster topology");
            store.put_cluster(&cluster)?;
        }

        Ok(store)
    }

    fn init(db: Database) -> Result<Self> {
        let txn = db.begin_write().map_err(Error::database)?;
        {
            let _ = txn.open_table(META_TABLE).map_err(Error::database)?;
        }
        txn.commit().map_err(Error::database)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Runs `f` inside a single write transaction.
    fn write<R>(&self, f: impl FnOnce(&mut MetaTable<'_>) -> Result<R>) -> Result<R> {
        let txn = self.db.begin_write().map_err(Error::database)?;
        let result = {
            let mut table = txn.open_table(META_TABLE).map_err(Error::database)?;
            f(&mut table)?
        };
        txn.commit().map_err(Error::database)?;
        Ok(result)
    }

    /// Reads a versioned value.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the value cannot be decoded.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Versioned<T>>> {
        let txn = self.db.begin_read().map_err(Error::database)?;
        let table = txn.open_table(META_TABLE).map_err(Error::database)?;
        match read_entry(&table, key)? {
            Some(entry) => {
                let value = bincode::deserialize(&entry.payload).map_err(Error::serialization)?;
                Ok(Some(Versioned::new(entry.version, value)))
            }
            None => Ok(None),
        }
    }

    /// Writes a value, returning its new version.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<u64> {
        self.write(|table| bump_entry(table, key, value))
    }

    /// Returns the current version of a key, or 0 if it has never been written.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn version(&self, key: &str) -> Result<u64> {
        let txn = self.db.begin_read().map_err(Error::database)?;
        let table = txn.open_table(META_TABLE).map_err(Error::database)?;
        Ok(read_entry(&table, key)?.map_or(0, |e| e.version))
    }

    /// Returns the cluster topology.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no topology has been stored.
    pub fn cluster(&self) -> Result<Cluster> {
        Ok(self.cluster_versioned()?.value)
    }

    /// Returns the cluster topology with its version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no topology has been stored.
    pub fn cluster_versioned(&self) -> Result<Versioned<Cluster>> {
        self.get(CLUSTER_KEY)?
            .ok_or_else(|| Error::Config("cluster topology has not been stored".to_string()))
    }

    /// Stores the cluster topology.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn put_cluster(&self, cluster: &Cluster) -> Result<u64> {
        self.put(CLUSTER_KEY, cluster)
    }

    /// Adopts a topology learned from a peer if it is newer than ours.
    /// Returns true if it was stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the read or write fails.
    pub fn put_cluster_if_newer(&self, remote: &Versioned<Cluster>) -> Result<bool> {
        self.write(|table| {
            let local = read_entry(&*table, CLUSTER_KEY)?.map_or(0, |e| e.version);
            if remote.version <= local {
                return Ok(false);
            }
            write_entry(table, CLUSTER_KEY, remote.version, &remote.value)?;
            Ok(true)
        })
    }

    /// Returns the operating state, defaulting to [`ServerState::Normal`].
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn server_state(&self) -> Result<ServerState> {
        Ok(self.get::<ServerState>(SERVER_STATE_KEY)?.map(|v| v.value).unwrap_or_default())
    }

    /// Stores the operating state.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_server_state(&self, state: ServerState) -> Result<()> {
        self.put(SERVER_STATE_KEY, &state).map(|_| ())
    }

    /// Returns the in-flight rebalance descriptor, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn rebalance_steal_info(&self) -> Result<Option<RebalanceStealInfo>> {
        Ok(self.get(REBALANCING_STEAL_INFO_KEY)?.map(|v| v.value))
    }

    /// Stores the in-flight rebalance descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn put_rebalance_steal_info(&self, info: &RebalanceStealInfo) -> Result<()> {
        self.put(REBALANCING_STEAL_INFO_KEY, info).map(|_| ())
    }

    /// Records that this node is stealing partitions from a donor: sets the
    /// operating state and the descriptor in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn begin_rebalance_steal(&self, info: &RebalanceStealInfo) -> Result<()> {
        self.write(|table| {
            bump_entry(table, SERVER_STATE_KEY, &ServerState::RebalancingStealer)?;
            bump_entry(table, REBALANCING_STEAL_INFO_KEY, info)?;
            Ok(())
        })
    }

    /// Returns the node to normal state and discards any rebalance descriptor,
    /// in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn clean_all_rebalancing_state(&self) -> Result<()> {
        self.write(|table| {
            bump_entry(table, SERVER_STATE_KEY, &ServerState::Normal)?;
            table.remove(REBALANCING_STEAL_INFO_KEY).map_err(Error::database)?;
            Ok(())
        })?;
        debug!("Cleared rebalancing state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tessera_core::Node;

    use super::*;

    fn cluster() -> Cluster {
        Cluster::new(
            "test",
            vec![Node {
                id: 0,
                host: "127.0.0.1".to_string(),
                socket_port: 6666,
                admin_port: 6667,
                partitions: vec![0, 1],
            }],
        )
    }

    #[test]
    fn test_defaults_when_empty() {
        let store = MetadataStore::open_in_memory().unwrap();
        assert_eq!(store.server_state().unwrap(), ServerState::Normal);
        assert!(store.rebalance_steal_info().unwrap().is_none());
        assert!(matches!(store.cluster(), Err(Error::Config(_))));
        assert_eq!(store.version(CLUSTER_KEY).unwrap(), 0);
    }

    #[test]
    fn test_versions_increase() {
        let store = MetadataStore::open_in_memory().unwrap();
        assert_eq!(store.put_cluster(&cluster()).unwrap(), 1);
        assert_eq!(store.put_cluster(&cluster()).unwrap(), 2);
        assert_eq!(store.cluster_versioned().unwrap().version, 2);
    }

    #[test]
    fn test_put_cluster_if_newer() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.put_cluster(&cluster()).unwrap();
        store.put_cluster(&cluster()).unwrap();

        let mut renamed = cluster();
        renamed.name = "renamed".to_string();

        assert!(!store.put_cluster_if_newer(&Versioned::new(2, renamed.clone())).unwrap());
        assert_eq!(store.cluster().unwrap().name, "test");

        assert!(store.put_cluster_if_newer(&Versioned::new(5, renamed)).unwrap());
        let stored = store.cluster_versioned().unwrap();
        assert_eq!(stored.version, 5);
        assert_eq!(stored.value.name, "renamed");
    }

    #[test]
    fn test_rebalance_state_roundtrip() {
        let store = MetadataStore::open_in_memory().unwrap();
        let info = RebalanceStealInfo::new(3, vec![1, 4, 7], vec!["users".to_string()]);

        store.begin_rebalance_steal(&info).unwrap();
        assert_eq!(store.server_state().unwrap(), ServerState::RebalancingStealer);
        assert_eq!(store.rebalance_steal_info().unwrap(), Some(info.clone()));

        store.put_rebalance_steal_info(&info.next_attempt()).unwrap();
        assert_eq!(store.rebalance_steal_info().unwrap().unwrap().attempt, 1);

        store.clean_all_rebalancing_state().unwrap();
        assert_eq!(store.server_state().unwrap(), ServerState::Normal);
        assert!(store.rebalance_steal_info().unwrap().is_none());
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(METADATA_DB_FILE);
        let info = RebalanceStealInfo::new(2, vec![5], vec![]);

        {
            let store = MetadataStore::open(&path).unwrap();
            store.begin_rebalance_steal(&info).unwrap();
        }

        let store = MetadataStore::open(&path).unwrap();
        assert_eq!(store.server_state().unwrap(), ServerState::RebalancingStealer);
        assert_eq!(store.rebalance_steal_info().unwrap(), Some(info));
    }

    #[test]
    fn test_open_dir_seeds_cluster() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CLUSTER_CONFIG_FILE), cluster().to_toml().unwrap())
            .unwrap();

        let store = MetadataStore::open_dir(dir.path()).unwrap();
        assert_eq!(store.cluster().unwrap(), cluster());
        assert_eq!(store.version(CLUSTER_KEY).unwrap(), 1);
    }

    #[test]
    fn test_open_dir_without_topology() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(MetadataStore::open_dir(dir.path()), Err(Error::Config(_))));
    }
}

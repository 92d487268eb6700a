// Copyright 2026 The Tessera Authors
// SPDX-License-Identifier: Apache-2.0

//! Cluster topology, node state and identifier types.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifier of a node in the cluster topology.
pub type NodeId = u64;

/// Identifier of a partition.
pub type PartitionId = u32;

/// Identifier of an asynchronous task, unique for the lifetime of a process.
pub type TaskId = u64;

/// A node entry in the cluster topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Node ID.
    pub id: NodeId,
    /// Host name or IP address.
    pub host: String,
    /// Port of the client socket listener.
    pub socket_port: u16,
    /// Port of the administrative listener.
    pub admin_port: u16,
    /// Partitions owned by this node.
    #[serde(default)]
    pub partitions: Vec<PartitionId>,
}

impl Node {
    /// Returns the base URL of this node's administrative API.
    #[must_use]
    pub fn admin_url(&self) -> String {
        format!("http://{}:{}", self.host, self.admin_port)
    }
}

/// The cluster topology: every node and the partitions it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Cluster name.
    pub name: String,
    /// Member nodes.
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl Cluster {
    /// Creates a cluster from its nodes.
    #[must_use]
    pub fn new(name: impl Into<String>, nodes: Vec<Node>) -> Self {
        Self { name: name.into(), nodes }
    }

    /// Returns the node with the given ID, if present.
    #[must_use]
    pub fn node_by_id(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Returns the IDs of all nodes.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().map(|n| n.id)
    }

    /// Parses a topology from TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or contains duplicate node IDs.
    pub fn parse(content: &str) -> Result<Self> {
        let cluster: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        cluster.validate()?;
        Ok(cluster)
    }

    /// Loads a topology from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read cluster topology {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    /// Renders the topology as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(Error::serialization)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id) {
                return Err(Error::Config(format!(
                    "duplicate node id {} in cluster '{}'",
                    node.id, self.name
                )));
            }
        }
        Ok(())
    }
}

/// The immutable identity of the local node, resolved once from the topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    node: Node,
}

impl NodeIdentity {
    /// Resolves `node_id` against the cluster topology.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the topology has no such node.
    pub fn resolve(cluster: &Cluster, node_id: NodeId) -> Result<Self> {
        cluster.node_by_id(node_id).cloned().map(|node| Self { node }).ok_or_else(|| {
            Error::Config(format!(
                "node id {node_id} is not present in cluster '{}' (known ids: {:?})",
                cluster.name,
                cluster.node_ids().collect::<Vec<_>>()
            ))
        })
    }

    /// The node ID.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.node.id
    }

    /// The host name.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.node.host
    }

    /// The client socket port.
    #[must_use]
    pub fn socket_port(&self) -> u16 {
        self.node.socket_port
    }

    /// The administrative port.
    #[must_use]
    pub fn admin_port(&self) -> u16 {
        self.node.admin_port
    }

    /// The topology entry this identity was resolved from.
    #[must_use]
    pub fn node(&self) -> &Node {
        &self.node
    }
}

/// The coarse operating mode of a node, persisted for crash recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    /// Serving normally.
    #[default]
    Normal,
    /// Coordinating a rebalance for the cluster.
    RebalancingMaster,
    /// Receiving partitions from a donor.
    RebalancingStealer,
}

impl ServerState {
    /// Returns the canonical name of the state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::RebalancingMaster => "rebalancing_master",
            Self::RebalancingStealer => "rebalancing_stealer",
        }
    }

    /// Returns true for [`ServerState::Normal`].
    #[must_use]
    pub const fn is_normal(&self) -> bool {
        matches!(self, Self::Normal)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Describes an in-flight partition migration this node is stealing from a donor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceStealInfo {
    /// The node the partitions are being moved from.
    pub donor_id: NodeId,
    /// Partitions being moved, in migration order.
    pub partition_list: Vec<PartitionId>,
    /// Stores whose data is being moved.
    pub store_names: Vec<String>,
    /// Number of resume attempts made so far.
    pub attempt: u32,
}

impl RebalanceStealInfo {
    /// Creates steal info with no attempts recorded.
    #[must_use]
    pub fn new(
        donor_id: NodeId,
        partition_list: Vec<PartitionId>,
        store_names: Vec<String>,
    ) -> Self {
        Self { donor_id, partition_list, store_names, attempt: 0 }
    }

    /// Returns a copy with the attempt counter advanced by one.
    #[must_use]
    pub fn next_attempt(&self) -> Self {
        Self { attempt: self.attempt.saturating_add(1), ..self.clone() }
    }
}

/// A value paired with the version it was written at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// Monotonic write version, starting at 1.
    pub version: u64,
    /// The value.
    pub value: T,
}

impl<T> Versioned<T> {
    /// Wraps a value at the given version.
    pub fn new(version: u64, value: T) -> Self {
        Self { version, value }
    }
}

/// Type tag of a registered service. At most one instance per tag is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    /// Storage engine.
    Storage,
    /// Periodic job scheduler.
    Scheduler,
    /// Background task runner.
    AsyncRunner,
    /// Client socket listener.
    Socket,
    /// Administrative listener.
    Admin,
    /// Peer metadata gossip.
    Gossip,
    /// Management (metrics) exporter.
    Metrics,
}

impl ServiceType {
    /// Human-readable name used in logs and errors.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Scheduler => "scheduler",
            Self::AsyncRunner => "async-runner",
            Self::Socket => "socket",
            Self::Admin => "admin",
            Self::Gossip => "gossip",
            Self::Metrics => "metrics",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: NodeId) -> Node {
        Node {
            id,
            host: "127.0.0.1".to_string(),
            socket_port: 6666 + id as u16 * 10,
            admin_port: 6667 + id as u16 * 10,
            partitions: vec![id as PartitionId],
        }
    }

    #[test]
    fn test_resolve_identity() {
        let cluster = Cluster::new("test", vec![node(0), node(1)]);
        let identity = NodeIdentity::resolve(&cluster, 1).unwrap();
        assert_eq!(identity.id(), 1);
        assert_eq!(identity.socket_port(), 6676);
        assert_eq!(identity.admin_port(), 6677);
        assert_eq!(identity.node().admin_url(), "http://127.0.0.1:6677");
    }

    #[test]
    fn test_resolve_unknown_identity() {
        let cluster = Cluster::new("test", vec![node(0)]);
        let err = NodeIdentity::resolve(&cluster, 9).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("node id 9"));
    }

    #[test]
    fn test_parse_cluster() {
        let toml = r#"
name = "prod"

[[nodes]]
id = 0
host = "10.0.0.1"
socket_port = 6666
admin_port = 6667
partitions = [0, 2]

[[nodes]]
id = 1
host = "10.0.0.2"
socket_port = 6666
admin_port = 6667
partitions = [1, 3]
"#;
        let cluster = Cluster::parse(toml).unwrap();
        assert_eq!(cluster.name, "prod");
        assert_eq!(cluster.nodes.len(), 2);
        assert_eq!(cluster.node_by_id(1).unwrap().partitions, vec![1, 3]);

        let rendered = cluster.to_toml().unwrap();
        assert_eq!(Cluster::parse(&rendered).unwrap(), cluster);
    }

    #[test]
    fn test_parse_cluster_rejects_duplicate_ids() {
        let toml = r#"
name = "dup"

[[nodes]]
id = 0
host = "a"
socket_port = 1
admin_port = 2

[[nodes]]
id = 0
host = "b"
socket_port = 1
admin_port = 2
"#;
        assert!(matches!(Cluster::parse(toml), Err(Error::Config(_))));
    }

    #[test]
    fn test_server_state_display() {
        assert_eq!(ServerState::RebalancingStealer.to_string(), "rebalancing_stealer");
        assert!(ServerState::default().is_normal());
        assert!(!ServerState::RebalancingMaster.is_normal());
    }

    #[test]
    fn test_steal_info_next_attempt() {
        let info = RebalanceStealInfo::new(3, vec![1, 4, 7], vec!["users".to_string()]);
        assert_eq!(info.attempt, 0);

        let next = info.next_attempt().next_attempt();
        assert_eq!(next.attempt, 2);
        assert_eq!(next.donor_id, 3);
        assert_eq!(next.partition_list, vec![1, 4, 7]);
    }
}

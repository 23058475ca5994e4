//! Cluster members and their identities.
//!
//! Nodes are identified by a compact `NodeId` that is cheap to compare and
//! hash, but only valid for one process lifetime. Placement on the ring uses
//! a `NodeHash` instead, which a [`NodeHashResolver`](crate::resolver::NodeHashResolver)
//! can derive from something that survives restarts.

use crate::key::RoutingKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute naming a per-node override of the virtual replica count.
pub const REPLICAS_ATTRIBUTE: &str = "affinity.replicas";

/// Per-process node identity. A restarted node gets a new id.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u128);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl RoutingKey for NodeId {
    fn write_routing_bytes(&self, out: &mut Vec<u8>) {
        self.0.write_routing_bytes(out);
    }
}

/// Restart-stable ring identity of a node.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeHash(pub u128);

impl From<NodeId> for NodeHash {
    fn from(id: NodeId) -> Self {
        NodeHash(id.0)
    }
}

impl fmt::Display for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl RoutingKey for NodeHash {
    fn write_routing_bytes(&self, out: &mut Vec<u8>) {
        self.0.write_routing_bytes(out);
    }
}

/// Member descriptor carried by a topology snapshot.
///
/// Snapshots clone these freely, so only placement-relevant metadata lives here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub id: NodeId,
    /// Join order assigned by discovery; the primary sort key of a snapshot.
    pub order: u64,
    /// Consistent, human-readable name. Survives restarts when configured.
    pub name: String,
    /// Physical host, used to keep backups off the primary's machine.
    #[serde(default)]
    pub host: Option<String>,
    /// Free-form attributes published by the node.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ClusterNode {
    /// Node with no host and no attributes.
    pub fn new(id: NodeId, order: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            order,
            name: name.into(),
            host: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Virtual replica count requested through [`REPLICAS_ATTRIBUTE`], if any.
    pub fn replicas_override(&self) -> Option<usize> {
        self.attribute(REPLICAS_ATTRIBUTE)
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
    }

    /// True if both nodes run on the same known host.
    pub fn is_neighbor_of(&self, other: &ClusterNode) -> bool {
        matches!((&self.host, &other.host), (Some(a), Some(b)) if a == b)
    }
}

impl fmt::Display for ClusterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.order)
    }
}

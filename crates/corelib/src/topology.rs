//! Topology snapshots pushed in by membership/discovery.
//!
//! A snapshot is the agreed, ordered member list valid at one
//! [`TopologyVersion`]. The whole design depends on every node seeing the
//! same order for the same version, so the constructor sorts by join order
//! (then id) instead of trusting the caller's iteration order.

use crate::error::{Error, Result};
use crate::node::{ClusterNode, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Monotonically increasing topology version.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopologyVersion(pub u64);

impl TopologyVersion {
    /// The version that must follow this one.
    pub fn next(self) -> Self {
        TopologyVersion(self.0.saturating_add(1))
    }
}

impl fmt::Display for TopologyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TopologyVersion {
    fn from(v: u64) -> Self {
        TopologyVersion(v)
    }
}

/// Ordered member list, immutable once built.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    nodes: Vec<ClusterNode>,
}

impl TopologySnapshot {
    /// Builds a snapshot, sorting by `(order, id)`.
    ///
    /// Duplicate node ids are rejected: a member list with two entries for
    /// the same node is not something discovery can legitimately agree on.
    pub fn new(mut nodes: Vec<ClusterNode>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(nodes.len());
        for node in &nodes {
            if !seen.insert(node.id) {
                return Err(Error::invalid(format!("duplicate node {} in topology", node.id)));
            }
        }
        nodes.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        Ok(Self { nodes })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[ClusterNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&ClusterNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().map(|n| n.id)
    }

    /// Snapshot without `id`, keeping the order of the remaining members.
    pub fn without(&self, id: NodeId) -> Self {
        Self {
            nodes: self.nodes.iter().filter(|n| n.id != id).cloned().collect(),
        }
    }

    /// Snapshot with `node` added.
    pub fn with(&self, node: ClusterNode) -> Result<Self> {
        let mut nodes = self.nodes.clone();
        nodes.push(node);
        Self::new(nodes)
    }
}

/// What happened to membership.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryEventKind {
    Joined,
    Left,
    Failed,
}

/// Membership change that produced a topology version.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopologyEvent {
    pub kind: DiscoveryEventKind,
    pub node: NodeId,
}

impl TopologyEvent {
    pub fn joined(node: NodeId) -> Self {
        Self {
            kind: DiscoveryEventKind::Joined,
            node,
        }
    }

    pub fn left(node: NodeId) -> Self {
        Self {
            kind: DiscoveryEventKind::Left,
            node,
        }
    }

    pub fn failed(node: NodeId) -> Self {
        Self {
            kind: DiscoveryEventKind::Failed,
            node,
        }
    }
}

impl fmt::Display for TopologyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.kind, self.node)
    }
}

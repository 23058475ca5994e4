//! Materialized partition -> owners table for one topology version.

use corelib::{Error, NodeId, Result, TopologySnapshot, TopologyVersion};
use serde::Serialize;
use std::collections::HashSet;

/// Partition index in `[0, partitions)`.
pub type PartitionId = u32;

/// Owners of every partition at one topology version.
///
/// The first node of each list is the primary, the rest are backups in
/// preference order. Immutable once published; the next version supersedes
/// it instead of modifying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    version: TopologyVersion,
    partitions: Vec<Vec<NodeId>>,
}

/// Inverse lookup result for one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodePartitions {
    pub primary: Vec<PartitionId>,
    pub backup: Vec<PartitionId>,
    pub all: Vec<PartitionId>,
}

impl Assignment {
    pub fn new(version: TopologyVersion, partitions: Vec<Vec<NodeId>>) -> Self {
        Self { version, partitions }
    }

    /// Checks a freshly computed table before it is published: one list per
    /// partition, no node twice in a list, only members of `snapshot`.
    pub(crate) fn validate(&self, expected: u32, snapshot: &TopologySnapshot) -> Result<()> {
        if self.partitions.len() != expected as usize {
            return Err(Error::invalid(format!(
                "affinity function returned {} partitions, expected {expected}",
                self.partitions.len()
            )));
        }

        let members: HashSet<NodeId> = snapshot.ids().collect();
        let mut seen = HashSet::new();
        for (part, owners) in self.partitions.iter().enumerate() {
            seen.clear();
            for node in owners {
                if !seen.insert(*node) {
                    return Err(Error::invalid(format!(
                        "partition {part} lists node {node} twice"
                    )));
                }
                if !members.contains(node) {
                    return Err(Error::invalid(format!(
                        "partition {part} assigned to node {node} outside the topology"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn version(&self) -> TopologyVersion {
        self.version
    }

    pub fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    /// Raw table, indexed by partition.
    pub fn table(&self) -> &[Vec<NodeId>] {
        &self.partitions
    }

    pub fn iter(&self) -> impl Iterator<Item = (PartitionId, &[NodeId])> {
        self.partitions
            .iter()
            .enumerate()
            .map(|(p, owners)| (p as PartitionId, owners.as_slice()))
    }

    /// Primary followed by backups. Empty while no node owns the partition.
    pub fn nodes(&self, part: PartitionId) -> Result<&[NodeId]> {
        self.partitions
            .get(part as usize)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                Error::invalid(format!(
                    "partition {part} out of range [0, {})",
                    self.partitions.len()
                ))
            })
    }

    pub fn primary(&self, part: PartitionId) -> Result<Option<NodeId>> {
        Ok(self.nodes(part)?.first().copied())
    }

    pub fn backups(&self, part: PartitionId) -> Result<&[NodeId]> {
        let nodes = self.nodes(part)?;
        Ok(nodes.get(1..).unwrap_or(&[]))
    }

    /// True while at least one partition has no owner (cluster bootstrap).
    pub fn has_unowned(&self) -> bool {
        self.partitions.iter().any(Vec::is_empty)
    }

    /// Every partition `node` holds, split by role. Linear scan.
    pub fn partitions_for(&self, node: NodeId) -> NodePartitions {
        let mut result = NodePartitions::default();
        for (part, owners) in self.iter() {
            match owners.iter().position(|n| *n == node) {
                Some(0) => {
                    result.primary.push(part);
                    result.all.push(part);
                }
                Some(_) => {
                    result.backup.push(part);
                    result.all.push(part);
                }
                None => {}
            }
        }
        result
    }

    pub fn primary_partitions(&self, node: NodeId) -> Vec<PartitionId> {
        self.partitions_for(node).primary
    }

    pub fn backup_partitions(&self, node: NodeId) -> Vec<PartitionId> {
        self.partitions_for(node).backup
    }

    pub fn all_partitions(&self, node: NodeId) -> Vec<PartitionId> {
        self.partitions_for(node).all
    }

    /// Partitions whose primary differs between `self` and `other`.
    pub fn moved_primaries(&self, other: &Assignment) -> Vec<PartitionId> {
        self.partitions
            .iter()
            .zip(other.partitions.iter())
            .enumerate()
            .filter(|(_, (a, b))| a.first() != b.first())
            .map(|(p, _)| p as PartitionId)
            .collect()
    }

    /// Partitions whose owner list differs in any position.
    pub fn changed_partitions(&self, other: &Assignment) -> Vec<PartitionId> {
        self.partitions
            .iter()
            .zip(other.partitions.iter())
            .enumerate()
            .filter(|(_, (a, b))| a != b)
            .map(|(p, _)| p as PartitionId)
            .collect()
    }
}

//! Read-only view of cluster state handed to an affinity function.

use crate::assignment::{Assignment, PartitionId};
use corelib::{NodeId, TopologyEvent, TopologySnapshot, TopologyVersion};
use std::sync::Arc;

/// Everything an [`AffinityFunction`](crate::function::AffinityFunction)
/// may look at while computing a new assignment.
#[derive(Debug, Clone)]
pub struct AffinityContext {
    previous: Option<Arc<Assignment>>,
    partitions: u32,
    backups: usize,
    snapshot: Arc<TopologySnapshot>,
    version: TopologyVersion,
    event: Option<TopologyEvent>,
}

impl AffinityContext {
    pub fn new(
        previous: Option<Arc<Assignment>>,
        partitions: u32,
        backups: usize,
        snapshot: Arc<TopologySnapshot>,
        version: TopologyVersion,
        event: Option<TopologyEvent>,
    ) -> Self {
        Self {
            previous,
            partitions,
            backups,
            snapshot,
            version,
            event,
        }
    }

    /// Owners of `part` in the previously published assignment, if any.
    pub fn previous_assignment(&self, part: PartitionId) -> Option<&[NodeId]> {
        self.previous
            .as_ref()
            .and_then(|a| a.table().get(part as usize))
            .map(Vec::as_slice)
    }

    /// The whole previous assignment.
    pub fn previous(&self) -> Option<&Arc<Assignment>> {
        self.previous.as_ref()
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    pub fn backups(&self) -> usize {
        self.backups
    }

    pub fn current_topology_snapshot(&self) -> &TopologySnapshot {
        &self.snapshot
    }

    pub fn topology_version(&self) -> TopologyVersion {
        self.version
    }

    /// Membership change that triggered this computation.
    pub fn discovery_event(&self) -> Option<&TopologyEvent> {
        self.event.as_ref()
    }
}

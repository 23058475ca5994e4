//! Configuration types for the affinity engine.

use corelib::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default number of partitions.
pub const DEFAULT_PARTITIONS: u32 = 10_000;

/// Default number of versions kept for in-flight reads.
pub const DEFAULT_RETENTION: usize = 16;

/// Default bound on queued out-of-order topology events.
pub const DEFAULT_MAX_PENDING_EVENTS: usize = 64;

/// What to do with a topology event whose version is not `last + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutOfOrderPolicy {
    /// Fail with `OutOfOrderTopologyEvent`.
    #[default]
    Reject,
    /// Hold future versions until the gap is filled.
    Queue,
}

/// Per-cache affinity configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AffinityConfig {
    /// Fixed partition count. Never re-derived from topology.
    pub partitions: u32,

    /// Backup copies per partition. `usize::MAX` means every eligible node.
    pub backups: usize,

    /// Virtual points per node on the ring.
    pub replicas: usize,

    /// Number of assignment versions retained for version-pinned reads.
    pub retention: usize,

    /// Handling of topology events that skip versions.
    pub out_of_order: OutOfOrderPolicy,

    /// Bound on events held back by [`OutOfOrderPolicy::Queue`].
    pub max_pending_events: usize,

    /// Keep a partition's previous primary while it is still in the topology.
    ///
    /// A node that joins later is then only given backups; primaries move to
    /// it once their owner leaves. Turn this off to have joins take over the
    /// partitions the ring routes to them, at the cost of moving primaries.
    pub sticky_primaries: bool,

    /// Keep backups off hosts that already hold a copy of the partition.
    pub exclude_neighbors: bool,
}

impl Default for AffinityConfig {
    fn default() -> Self {
        Self {
            partitions: DEFAULT_PARTITIONS,
            backups: 0,
            replicas: corelib::ring::DEFAULT_REPLICAS,
            retention: DEFAULT_RETENTION,
            out_of_order: OutOfOrderPolicy::default(),
            max_pending_events: DEFAULT_MAX_PENDING_EVENTS,
            sticky_primaries: true,
            exclude_neighbors: false,
        }
    }
}

impl AffinityConfig {
    pub fn new(partitions: u32, backups: usize) -> Self {
        Self {
            partitions,
            backups,
            ..Default::default()
        }
    }

    pub fn with_partitions(mut self, partitions: u32) -> Self {
        self.partitions = partitions;
        self
    }

    pub fn with_backups(mut self, backups: usize) -> Self {
        self.backups = backups;
        self
    }

    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_out_of_order(mut self, policy: OutOfOrderPolicy) -> Self {
        self.out_of_order = policy;
        self
    }

    pub fn with_max_pending_events(mut self, max: usize) -> Self {
        self.max_pending_events = max;
        self
    }

    pub fn with_sticky_primaries(mut self, sticky: bool) -> Self {
        self.sticky_primaries = sticky;
        self
    }

    pub fn with_exclude_neighbors(mut self, exclude: bool) -> Self {
        self.exclude_neighbors = exclude;
        self
    }

    /// Owners per partition (primary + backups), saturating.
    pub fn copies(&self) -> usize {
        self.backups.saturating_add(1)
    }

    /// Rejects values that would make the engine misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.partitions == 0 {
            return Err(Error::invalid("partitions must be at least 1"));
        }
        if self.replicas == 0 {
            return Err(Error::invalid("replicas must be at least 1"));
        }
        if self.retention == 0 {
            return Err(Error::invalid("retention must keep at least 1 version"));
        }
        if self.out_of_order == OutOfOrderPolicy::Queue && self.max_pending_events == 0 {
            return Err(Error::invalid("queue policy needs max_pending_events >= 1"));
        }
        Ok(())
    }
}

//! Partition affinity engine.
//!
//! Maps cache keys to partitions and partitions to owning nodes:
//! - `partition(key) = hash(affinity_key(key)) mod partitions`, independent
//!   of topology
//! - On every membership change an [`AffinityFunction`] computes a fresh
//!   partition table, which the [`AffinityAssignmentCache`] publishes
//!   atomically and retains for version-pinned reads
//! - [`AffinityFacade`] is the lookup surface, guarded by a [`LivenessGate`]
//! - [`AffinityProcessor`] fans membership events out to every cache
//!
//! # Example
//!
//! ```
//! use affinity::{AffinityConfig, AffinityProcessor, DefaultAffinityKeyMapper};
//! use corelib::{ClusterNode, NodeId, TopologySnapshot, TopologyVersion};
//! use std::sync::Arc;
//!
//! let processor = AffinityProcessor::new();
//! processor.register("orders", &AffinityConfig::new(64, 1)).unwrap();
//!
//! let nodes = vec![
//!     ClusterNode::new(NodeId(1), 1, "a"),
//!     ClusterNode::new(NodeId(2), 2, "b"),
//! ];
//! processor
//!     .on_topology_change(TopologyVersion(1), TopologySnapshot::new(nodes).unwrap(), None)
//!     .unwrap();
//!
//! let orders = processor
//!     .facade::<String>("orders", Arc::new(DefaultAffinityKeyMapper))
//!     .unwrap();
//! let owners = orders.all_nodes(&"order-42".to_string()).unwrap();
//! assert_eq!(owners.len(), 2);
//! ```

pub mod assignment;
pub mod cache;
pub mod config;
pub mod context;
pub mod facade;
pub mod function;
pub mod gate;
pub mod mapper;
pub mod processor;

pub use assignment::{Assignment, NodePartitions, PartitionId};
pub use cache::{AffinityAssignmentCache, TopologyUpdate, VersionedAssignment};
pub use config::{AffinityConfig, OutOfOrderPolicy};
pub use context::AffinityContext;
pub use facade::{AffinityFacade, PinnedAffinity};
pub use function::{
    AffinityFunction, BackupFilter, NodeFilter, RendezvousAffinityFunction, RingAffinityFunction,
};
pub use gate::{GateGuard, LivenessGate, SharedGate};
pub use mapper::{AffinityKey, AffinityKeyMapper, DefaultAffinityKeyMapper, FnAffinityKeyMapper, HasAffinityKey};
pub use processor::AffinityProcessor;

pub use corelib::{Error, Result};

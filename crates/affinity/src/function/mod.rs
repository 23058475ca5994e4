//! Affinity function abstractions.
//!
//! An affinity function turns an [`AffinityContext`] into a complete
//! partition table. Two implementations ship with the crate:
//!
//! - **RingAffinityFunction**: walks the consistent hash ring from a
//!   per-partition start point, with a stability pass that keeps primaries
//!   in place across topology changes (the default)
//! - **RendezvousAffinityFunction**: highest-random-weight ranking of every
//!   node for every partition, no ring

pub mod filter;
pub mod rendezvous;
pub mod ring;

pub use filter::{BackupFilter, NodeFilter};
pub use rendezvous::RendezvousAffinityFunction;
pub use ring::RingAffinityFunction;

use crate::context::AffinityContext;
use corelib::{NodeId, Result};
use std::fmt::Debug;

/// Trait for partition assignment strategies.
///
/// # Determinism
///
/// Every node of the cluster computes its own table. Given an identical
/// context, two invocations (in the same process or on different machines)
/// must return identical tables: no randomness, no wall-clock time, no
/// iteration over unordered containers.
///
/// # Thread Safety
///
/// Implementations must be thread-safe (Send + Sync) as they may be
/// shared across caches.
pub trait AffinityFunction: Send + Sync + Debug {
    /// Owners of every partition, primary first.
    ///
    /// The result has exactly `ctx.partitions()` entries. A list holds at most
    /// `1 + ctx.backups()` distinct nodes and is shorter when fewer eligible
    /// nodes exist; it is empty when the topology has none.
    fn assign_partitions(&self, ctx: &AffinityContext) -> Result<Vec<Vec<NodeId>>>;

    /// Get the function name (for logging/debugging).
    fn name(&self) -> &'static str;
}

//! Event router over a lazily maintained hash ring.

use crate::event::RoutableEvent;
use arc_swap::ArcSwap;
use corelib::ring::DEFAULT_REPLICAS;
use corelib::{ConsistentHashRing, Error, Result, RingMember, RoutingKey};
use metrics::counter;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Routes events to one member of the current live set.
///
/// Readers load the published ring without locking. When a call observes a
/// live set that differs from the ring's membership, the ring is cloned,
/// updated and swapped in under the writer lock; concurrent readers keep
/// using the ring they loaded.
pub struct EventRouter<M: RingMember> {
    ring: ArcSwap<ConsistentHashRing<M>>,
    replicas: usize,
    writer: Mutex<()>,
}

impl<M: RingMember> EventRouter<M> {
    pub fn new() -> Self {
        Self::with_replicas(DEFAULT_REPLICAS)
    }

    /// Router placing `replicas` points per member.
    pub fn with_replicas(replicas: usize) -> Self {
        Self {
            ring: ArcSwap::from_pointee(ConsistentHashRing::new()),
            replicas: replicas.max(1),
            writer: Mutex::new(()),
        }
    }

    /// Routes `event` by its routing key.
    pub fn route<E>(&self, event: &E, live: &[M]) -> Result<M>
    where
        E: RoutableEvent + ?Sized,
    {
        self.route_key(event.routing_key(), live)
    }

    /// Routes `key` to a member of `live`.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyTopology`] if `live` is empty.
    pub fn route_key<K>(&self, key: &K, live: &[M]) -> Result<M>
    where
        K: RoutingKey + ?Sized,
    {
        if live.is_empty() {
            return Err(Error::EmptyTopology);
        }

        let live: BTreeSet<&M> = live.iter().collect();
        let mut ring = self.ring.load_full();
        if !Self::matches(&ring, &live) {
            ring = self.rebuild(&live);
        }
        ring.route(key, |m| live.contains(m)).cloned()
    }

    /// Brings the ring in line with `live`. Returns true if it changed.
    pub fn sync(&self, live: &[M]) -> bool {
        let live: BTreeSet<&M> = live.iter().collect();
        if Self::matches(&self.ring.load(), &live) {
            return false;
        }
        self.rebuild(&live);
        true
    }

    /// Members currently on the ring.
    pub fn members(&self) -> Vec<M> {
        self.ring.load().members().cloned().collect()
    }

    /// The published ring.
    pub fn ring(&self) -> Arc<ConsistentHashRing<M>> {
        self.ring.load_full()
    }

    fn matches(ring: &ConsistentHashRing<M>, live: &BTreeSet<&M>) -> bool {
        ring.member_count() == live.len() && live.iter().all(|m| ring.contains(m))
    }

    fn rebuild(&self, live: &BTreeSet<&M>) -> Arc<ConsistentHashRing<M>> {
        let _writer = self.writer.lock();

        // Another caller may have rebuilt for the same set meanwhile.
        let current = self.ring.load_full();
        if Self::matches(&current, live) {
            return current;
        }

        let mut next: ConsistentHashRing<M> = (*current).clone();
        let stale: Vec<M> = next.members().filter(|m| !live.contains(m)).cloned().collect();
        let pruned = next.remove(stale.iter());
        let mut added = 0usize;
        for member in live {
            if next.add((*member).clone(), self.replicas) {
                added += 1;
            }
        }

        let next = Arc::new(next);
        self.ring.store(Arc::clone(&next));
        counter!("event_router_ring_rebuilds_total").increment(1);
        debug!(
            added,
            pruned,
            members = next.member_count(),
            points = next.point_count(),
            "rebuilt event router ring"
        );
        next
    }
}

impl<M: RingMember> Default for EventRouter<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RingMember> std::fmt::Debug for EventRouter<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("replicas", &self.replicas)
            .field("members", &self.members())
            .finish()
    }
}

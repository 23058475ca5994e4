//! Hash ring data structure.
//!
//! The ring is a sorted vector of virtual points. Adding or removing members
//! rebuilds that vector; published rings are shared behind an `Arc` and never
//! touched again, so a membership change means "clone, modify, swap".

use crate::error::{Error, Result};
use crate::key::RoutingKey;
use crate::partitioner::{Partitioner, Xxh3Partitioner};
use crate::token::{HashToken, Token};
use crate::vnode::RingEntry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

/// Default number of virtual points per member.
pub const DEFAULT_REPLICAS: usize = 128;

/// Anything that can own points on the ring.
pub trait RingMember: RoutingKey + Ord + Clone + Debug + Send + Sync + 'static {}

impl<T> RingMember for T where T: RoutingKey + Ord + Clone + Debug + Send + Sync + 'static {}

/// Consistent hash ring with virtual points.
#[derive(Clone, Debug)]
pub struct ConsistentHashRing<M, P = Xxh3Partitioner> {
    partitioner: P,
    /// Sorted by `(token, member, replica)`.
    entries: Vec<RingEntry<M>>,
    /// Member -> number of points it owns.
    members: BTreeMap<M, usize>,
}

impl<M: RingMember> ConsistentHashRing<M> {
    /// Empty ring hashing with [`Xxh3Partitioner`].
    pub fn new() -> Self {
        Self::with_partitioner(Xxh3Partitioner)
    }
}

impl<M: RingMember> Default for ConsistentHashRing<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RingMember, P: Partitioner> ConsistentHashRing<M, P> {
    pub fn with_partitioner(partitioner: P) -> Self {
        Self {
            partitioner,
            entries: Vec::new(),
            members: BTreeMap::new(),
        }
    }

    /// Adds `replicas` points for `member`.
    ///
    /// No-op (returns false) if the member is already present. A replica
    /// count of zero is raised to one: a member on the ring owns at least
    /// one point.
    pub fn add(&mut self, member: M, replicas: usize) -> bool {
        if self.members.contains_key(&member) {
            return false;
        }

        let replicas = replicas.max(1);
        self.entries.reserve(replicas);
        for i in 0..replicas {
            self.entries
                .push(RingEntry::from_index(&self.partitioner, member.clone(), i as u32));
        }
        self.entries.sort_unstable();
        self.members.insert(member, replicas);
        true
    }

    /// Removes every point owned by the given members.
    ///
    /// Returns how many of them were actually present.
    pub fn remove<'a, I>(&mut self, members: I) -> usize
    where
        I: IntoIterator<Item = &'a M>,
        M: 'a,
    {
        let gone: BTreeSet<&M> = members
            .into_iter()
            .filter(|m| self.members.contains_key(*m))
            .collect();
        if gone.is_empty() {
            return 0;
        }

        self.entries.retain(|e| !gone.contains(&e.member));
        for member in &gone {
            self.members.remove(*member);
        }
        gone.len()
    }

    /// Routes `key` to the first point at or after its token whose member is
    /// accepted, wrapping around the ring.
    ///
    /// `accept` lets callers restrict routing to a subset of members (a
    /// projection, an exclusion set) without touching the ring.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyTopology`] if no member is accepted.
    pub fn route<K, F>(&self, key: &K, accept: F) -> Result<&M>
    where
        K: RoutingKey + ?Sized,
        F: FnMut(&M) -> bool,
    {
        self.route_token(self.partitioner.token_of(key), accept)
    }

    /// Same as [`route`](Self::route) for an already computed token.
    pub fn route_token<F>(&self, token: HashToken, mut accept: F) -> Result<&M>
    where
        F: FnMut(&M) -> bool,
    {
        let start = self.entries.partition_point(|e| e.token < token);
        let (tail, head) = self.entries.split_at(start);
        head.iter()
            .chain(tail.iter())
            .map(|e| &e.member)
            .find(|m| accept(m))
            .ok_or(Error::EmptyTopology)
    }

    /// Routes `key` among `candidates` only.
    pub fn route_in<K>(&self, key: &K, candidates: &BTreeSet<M>) -> Result<&M>
    where
        K: RoutingKey + ?Sized,
    {
        if candidates.is_empty() {
            return Err(Error::EmptyTopology);
        }
        self.route(key, |m| candidates.contains(m))
    }

    /// Routes `key` to any member.
    pub fn route_any<K: RoutingKey + ?Sized>(&self, key: &K) -> Result<&M> {
        self.route(key, |_| true)
    }

    pub fn contains(&self, member: &M) -> bool {
        self.members.contains_key(member)
    }

    /// Number of points owned by `member`.
    pub fn replicas_of(&self, member: &M) -> Option<usize> {
        self.members.get(member).copied()
    }

    pub fn members(&self) -> impl Iterator<Item = &M> {
        self.members.keys()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn point_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All points in ring order (for debugging and diagnostics).
    pub fn entries(&self) -> &[RingEntry<M>] {
        &self.entries
    }

    pub fn partitioner(&self) -> &P {
        &self.partitioner
    }

    pub fn partitioner_name(&self) -> &'static str {
        self.partitioner.name()
    }

    /// Fraction of the hash space routed to each member.
    ///
    /// A point owns the arc between its predecessor (exclusive) and itself
    /// (inclusive). Fractions sum to 1.0 for a non-empty ring.
    pub fn ownership(&self) -> BTreeMap<M, f64> {
        let mut shares = BTreeMap::new();
        match self.entries.len() {
            0 => return shares,
            1 => {
                shares.insert(self.entries[0].member.clone(), 1.0);
                return shares;
            }
            _ => {}
        }

        let mut prev = &self.entries[self.entries.len() - 1];
        for entry in &self.entries {
            let arc = prev.token.distance_to(&entry.token).fraction_of_ring();
            *shares.entry(entry.member.clone()).or_insert(0.0) += arc;
            prev = entry;
        }
        shares
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;
    use crate::partitioner::SipPartitioner;

    #[test]
    fn test_empty_ring_routes_nowhere() {
        let ring: ConsistentHashRing<NodeId> = ConsistentHashRing::new();
        assert_eq!(ring.route_any("key"), Err(Error::EmptyTopology));
        assert!(ring.ownership().is_empty());
    }

    #[test]
    fn test_zero_replicas_raised_to_one() {
        let mut ring = ConsistentHashRing::new();
        assert!(ring.add(NodeId(1), 0));
        assert_eq!(ring.point_count(), 1);
        assert_eq!(ring.ownership().get(&NodeId(1)), Some(&1.0));
    }

    #[test]
    fn test_route_wraps_around() {
        let mut ring = ConsistentHashRing::new();
        ring.add(NodeId(1), 1);
        ring.add(NodeId(2), 1);

        // A token past the last point wraps to the first one.
        let first = ring.entries()[0].member;
        assert_eq!(ring.route_token(HashToken(u64::MAX), |_| true), Ok(&first));
        assert_eq!(ring.route_token(HashToken::zero(), |_| true), Ok(&first));
    }

    #[test]
    fn test_route_skips_rejected_members() {
        let mut ring = ConsistentHashRing::new();
        for i in 1..=4u128 {
            ring.add(NodeId(i), 16);
        }

        for key in 0u32..200 {
            let owner = *ring.route(&key, |m| *m != NodeId(3)).unwrap();
            assert_ne!(owner, NodeId(3));
        }
        assert_eq!(ring.route(&1u32, |_| false), Err(Error::EmptyTopology));
    }

    #[test]
    fn test_ownership_sums_to_one() {
        let mut ring = ConsistentHashRing::with_partitioner(SipPartitioner);
        for i in 1..=5u128 {
            ring.add(NodeId(i), 64);
        }
        let total: f64 = ring.ownership().values().sum();
        assert!((total - 1.0).abs() < 1e-9, "total = {total}");
    }

    #[test]
    fn test_remove_reports_present_members_only() {
        let mut ring = ConsistentHashRing::new();
        ring.add(NodeId(1), 8);
        ring.add(NodeId(2), 8);

        assert_eq!(ring.remove([NodeId(2), NodeId(99)].iter()), 1);
        assert_eq!(ring.point_count(), 8);
        assert_eq!(ring.remove([NodeId(99)].iter()), 0);
    }
}

//! Builder for rings with a known initial membership.

use crate::partitioner::{Partitioner, Xxh3Partitioner};
use crate::ring::ring::{ConsistentHashRing, RingMember, DEFAULT_REPLICAS};

/// Collects members (with optional per-member replica counts) and builds the
/// ring in one go.
#[derive(Debug)]
pub struct RingBuilder<M, P = Xxh3Partitioner> {
    partitioner: P,
    replicas: usize,
    members: Vec<(M, Option<usize>)>,
}

impl<M: RingMember> RingBuilder<M> {
    pub fn new() -> Self {
        Self::with_partitioner(Xxh3Partitioner)
    }
}

impl<M: RingMember> Default for RingBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RingMember, P: Partitioner> RingBuilder<M, P> {
    pub fn with_partitioner(partitioner: P) -> Self {
        Self {
            partitioner,
            replicas: DEFAULT_REPLICAS,
            members: Vec::new(),
        }
    }

    /// Points per member for members added without an explicit count.
    pub fn with_vnodes(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn add_member(mut self, member: M) -> Self {
        self.members.push((member, None));
        self
    }

    pub fn add_member_with_vnodes(mut self, member: M, replicas: usize) -> Self {
        self.members.push((member, Some(replicas)));
        self
    }

    pub fn build(self) -> ConsistentHashRing<M, P> {
        let mut ring = ConsistentHashRing::with_partitioner(self.partitioner);
        for (member, replicas) in self.members {
            ring.add(member, replicas.unwrap_or(self.replicas));
        }
        ring
    }
}

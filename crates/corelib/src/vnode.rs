//! Ring entries: the virtual points a member places on the ring.
//!
//! A member contributes `replicas` entries whose tokens are the hash of
//! `(member, replica index)`. Many small arcs per member keep ownership
//! close to even, and a join or leave only moves the keys on that member's
//! arcs. Lookup is a binary search over all entries.

use crate::key::RoutingKey;
use crate::partitioner::Partitioner;
use crate::token::HashToken;

/// A virtual point on the hash ring.
///
/// Entries order by `(token, member, replica)`, so two members landing on
/// the same token are ordered by the member itself.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RingEntry<M> {
    /// Where the point sits.
    pub token: HashToken,

    /// The member that owns this point.
    pub member: M,

    /// Index of this point among the member's points (0, 1, 2, ...).
    pub replica: u32,
}

impl<M: RoutingKey> RingEntry<M> {
    /// Create the point `replica` of `member`.
    ///
    /// The token is the hash of `(member, replica)` under the stable routing
    /// encoding, so it is the same on every process.
    pub fn from_index<P: Partitioner>(partitioner: &P, member: M, replica: u32) -> Self {
        let token = partitioner.token_of(&(&member, replica));
        Self {
            token,
            member,
            replica,
        }
    }
}

impl<M: std::fmt::Display> std::fmt::Display for RingEntry<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Point(token={}, member={}, replica={})", self.token, self.member, self.replica)
    }
}

//! Ring identities for cluster members.
//!
//! Node ids change every time a node restarts, which would move the node to a
//! different spot on the ring and reshuffle its partitions. A resolver that
//! derives the hash from something configured (a name, an attribute) puts a
//! bounced node back where it was.

use crate::node::{ClusterNode, NodeHash};
use std::fmt::Debug;
use xxhash_rust::xxh3::xxh3_128;

/// Produces the ring identity of a member.
///
/// Must be a pure function: every node of the cluster resolves the same
/// member to the same hash.
pub trait NodeHashResolver: Send + Sync + Debug {
    fn resolve(&self, node: &ClusterNode) -> NodeHash;
}

/// Uses the (restart-volatile) node id. The default.
#[derive(Clone, Copy, Debug, Default)]
pub struct NodeIdHashResolver;

impl NodeHashResolver for NodeIdHashResolver {
    fn resolve(&self, node: &ClusterNode) -> NodeHash {
        NodeHash::from(node.id)
    }
}

/// Hashes the consistent node name.
#[derive(Clone, Copy, Debug, Default)]
pub struct NameHashResolver;

impl NodeHashResolver for NameHashResolver {
    fn resolve(&self, node: &ClusterNode) -> NodeHash {
        NodeHash(xxh3_128(node.name.as_bytes()))
    }
}

/// Hashes the value of a node attribute, falling back to the node id when the
/// attribute is absent.
#[derive(Clone, Debug)]
pub struct AttributeHashResolver {
    attribute: String,
}

impl AttributeHashResolver {
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
        }
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }
}

impl NodeHashResolver for AttributeHashResolver {
    fn resolve(&self, node: &ClusterNode) -> NodeHash {
        match node.attribute(&self.attribute) {
            Some(value) => NodeHash(xxh3_128(value.as_bytes())),
            None => NodeHash::from(node.id),
        }
    }
}

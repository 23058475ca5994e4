//! Core library for consistent hashing.
//!
//! This crate provides the fundamental abstractions shared by the affinity
//! engine and the event router:
//! - Node identities and restart-stable ring identities
//! - Stable routing-key encoding and fixed hash functions (partitioners)
//! - The virtual-point consistent hash ring
//! - Topology snapshots, versions and membership events
//! - The error type used across the workspace

pub mod error;
pub mod key;
pub mod node;
pub mod partitioner;
pub mod resolver;
pub mod ring;
pub mod token;
pub mod topology;
pub mod vnode;

pub use error::{Error, Result};
pub use key::RoutingKey;
pub use node::{ClusterNode, NodeHash, NodeId};
pub use partitioner::{Partitioner, SipPartitioner, Xxh3Partitioner};
pub use resolver::{AttributeHashResolver, NameHashResolver, NodeHashResolver, NodeIdHashResolver};
pub use ring::{ConsistentHashRing, RingBuilder, RingMember};
pub use token::{HashToken, Token};
pub use topology::{DiscoveryEventKind, TopologyEvent, TopologySnapshot, TopologyVersion};
pub use vnode::RingEntry;

//! Consistent hash ring implementation.
//!
//! The ring manages virtual points and provides efficient lookup
//! operations for finding the member responsible for a routing object.

pub mod builder;
pub mod ring;

pub use builder::RingBuilder;
pub use ring::{ConsistentHashRing, RingMember, DEFAULT_REPLICAS};

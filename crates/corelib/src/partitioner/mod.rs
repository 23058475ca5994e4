//! Partitioner abstraction for consistent hashing.
//!
//! Partitioners are responsible for converting routing bytes into tokens
//! that can be placed on the hash ring. Both implementations are fixed,
//! seedless hash functions: every process computes the same token for the
//! same bytes.

pub mod sip;
pub mod traits;
pub mod xxh3;

pub use sip::SipPartitioner;
pub use traits::Partitioner;
pub use xxh3::Xxh3Partitioner;

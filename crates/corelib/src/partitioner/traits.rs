//! Core partitioner trait definitions.

use crate::key::RoutingKey;
use crate::token::HashToken;

/// A partitioner converts keys into tokens for placement on the hash ring.
///
/// Partitioners are stateless and thread-safe, allowing concurrent
/// token generation without synchronization overhead.
pub trait Partitioner: Send + Sync + 'static {
    /// Converts raw routing bytes into a token.
    fn partition(&self, key: &[u8]) -> HashToken;

    /// Returns the name of this partitioner.
    fn name(&self) -> &'static str;

    /// Token of an arbitrary routing object.
    fn token_of<K: RoutingKey + ?Sized>(&self, key: &K) -> HashToken
    where
        Self: Sized,
    {
        self.partition(&key.routing_bytes())
    }

    /// Maps routing bytes onto `[0, count)` as `hash mod count`.
    ///
    /// `count` must be non-zero; callers validate it once at configuration time.
    fn partition_index(&self, key: &[u8], count: u32) -> u32 {
        debug_assert!(count > 0, "partition count must be positive");
        (self.partition(key).0 % u64::from(count.max(1))) as u32
    }
}

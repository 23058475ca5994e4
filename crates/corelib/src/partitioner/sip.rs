//! SipHash partitioner implementation.

use crate::partitioner::traits::Partitioner;
use crate::token::HashToken;
use siphasher::sip::SipHasher13;
use std::hash::Hasher;

/// SipHash-1-3 with zero keys.
///
/// Bytes are fed through `Hasher::write` directly; going through
/// `Hash for [u8]` would mix in a platform-sized length prefix.
#[derive(Clone, Copy, Debug, Default)]
pub struct SipPartitioner;

impl Partitioner for SipPartitioner {
    fn partition(&self, key: &[u8]) -> HashToken {
        let mut hasher = SipHasher13::new_with_keys(0, 0);
        hasher.write(key);
        HashToken(hasher.finish())
    }

    fn name(&self) -> &'static str {
        "SipPartitioner"
    }
}

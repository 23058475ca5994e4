//! Affinity key extraction.
//!
//! A cache key is not always what gets hashed: an order line keyed by
//! `(order_id, line_no)` should live next to its order, so it routes by
//! `order_id` alone. Keys that want this implement [`HasAffinityKey`]; the
//! [`DefaultAffinityKeyMapper`] simply asks them.

use corelib::{NodeHash, NodeId, RoutingKey};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// Exposes the value a key is routed by.
pub trait HasAffinityKey {
    fn affinity_key(&self) -> &dyn RoutingKey;
}

macro_rules! impl_identity_affinity_key {
    ($($t:ty),* $(,)?) => {
        $(
            impl HasAffinityKey for $t {
                #[inline]
                fn affinity_key(&self) -> &dyn RoutingKey {
                    self
                }
            }
        )*
    };
}

impl_identity_affinity_key!(
    u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, bool, char, String, Vec<u8>,
    NodeId, NodeHash,
);

impl<const N: usize> HasAffinityKey for [u8; N] {
    fn affinity_key(&self) -> &dyn RoutingKey {
        self
    }
}

impl<T: HasAffinityKey + ?Sized> HasAffinityKey for &T {
    fn affinity_key(&self) -> &dyn RoutingKey {
        (**self).affinity_key()
    }
}

impl<T: HasAffinityKey + ?Sized> HasAffinityKey for Box<T> {
    fn affinity_key(&self) -> &dyn RoutingKey {
        (**self).affinity_key()
    }
}

/// A cache key paired with an optional co-location key.
///
/// Without an affinity key the wrapper routes by `key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AffinityKey<K, A = K> {
    key: K,
    affinity: Option<A>,
}

impl<K, A> AffinityKey<K, A> {
    pub fn new(key: K) -> Self {
        Self { key, affinity: None }
    }

    pub fn with_affinity(key: K, affinity: A) -> Self {
        Self {
            key,
            affinity: Some(affinity),
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn affinity(&self) -> Option<&A> {
        self.affinity.as_ref()
    }

    pub fn into_inner(self) -> K {
        self.key
    }
}

impl<K: RoutingKey, A: RoutingKey> HasAffinityKey for AffinityKey<K, A> {
    fn affinity_key(&self) -> &dyn RoutingKey {
        match &self.affinity {
            Some(a) => a,
            None => &self.key,
        }
    }
}

/// Extracts the stable encoding of a key's affinity key.
pub trait AffinityKeyMapper<K: ?Sized>: Send + Sync {
    /// Bytes hashed to pick the partition of `key`.
    fn affinity_key_bytes(&self, key: &K) -> Vec<u8>;

    /// Drops any state derived from the key types seen so far.
    fn reset(&self) {}
}

/// Routes every key by its [`HasAffinityKey`] value.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAffinityKeyMapper;

impl<K: HasAffinityKey + ?Sized> AffinityKeyMapper<K> for DefaultAffinityKeyMapper {
    fn affinity_key_bytes(&self, key: &K) -> Vec<u8> {
        key.affinity_key().routing_bytes()
    }
}

/// Mapper built from a closure returning the affinity key.
pub struct FnAffinityKeyMapper<K: ?Sized, R, F> {
    f: F,
    _key: PhantomData<fn(&K) -> R>,
}

impl<K: ?Sized, R, F> FnAffinityKeyMapper<K, R, F>
where
    F: Fn(&K) -> R + Send + Sync,
    R: RoutingKey,
{
    pub fn new(f: F) -> Self {
        Self { f, _key: PhantomData }
    }
}

impl<K: ?Sized, R, F> AffinityKeyMapper<K> for FnAffinityKeyMapper<K, R, F>
where
    F: Fn(&K) -> R + Send + Sync,
    R: RoutingKey,
{
    fn affinity_key_bytes(&self, key: &K) -> Vec<u8> {
        (self.f)(key).routing_bytes()
    }
}

impl<K: ?Sized, R, F> std::fmt::Debug for FnAffinityKeyMapper<K, R, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FnAffinityKeyMapper")
    }
}

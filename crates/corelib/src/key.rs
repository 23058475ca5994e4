//! Stable byte encoding of routing objects.
//!
//! Every node of the cluster must hash the same object to the same token, so
//! the bytes fed to the partitioner cannot depend on the platform, the
//! compiler version or a process-local seed. `std::hash::Hash` gives none of
//! those guarantees (slice lengths are written as `usize`, for one), so
//! routing objects describe themselves through [`RoutingKey`] instead.
//!
//! # Encoding
//!
//! - Integers: little-endian, fixed width (`usize`/`isize` widened to 64 bits)
//! - `bool`: one byte
//! - `char`: its `u32` scalar value
//! - Strings and byte slices: raw bytes, no length prefix
//! - Tuples: every element prefixed with its encoded length as `u32`

/// An object that can be hashed onto the ring.
///
/// Implementations must write the same bytes for equal values on every
/// process, forever. Changing an encoding reshuffles the whole cluster.
pub trait RoutingKey {
    /// Appends the stable encoding of `self` to `out`.
    fn write_routing_bytes(&self, out: &mut Vec<u8>);

    /// Returns the stable encoding of `self`.
    fn routing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_routing_bytes(&mut out);
        out
    }
}

macro_rules! impl_routing_key_int {
    ($($t:ty),* $(,)?) => {
        $(
            impl RoutingKey for $t {
                #[inline]
                fn write_routing_bytes(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_routing_key_int!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128);

impl RoutingKey for usize {
    fn write_routing_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(*self as u64).to_le_bytes());
    }
}

impl RoutingKey for isize {
    fn write_routing_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(*self as i64).to_le_bytes());
    }
}

impl RoutingKey for bool {
    fn write_routing_bytes(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }
}

impl RoutingKey for char {
    fn write_routing_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&u32::from(*self).to_le_bytes());
    }
}

impl RoutingKey for str {
    fn write_routing_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }
}

impl RoutingKey for String {
    fn write_routing_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }
}

impl RoutingKey for [u8] {
    fn write_routing_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl RoutingKey for Vec<u8> {
    fn write_routing_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl<const N: usize> RoutingKey for [u8; N] {
    fn write_routing_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl<T: RoutingKey + ?Sized> RoutingKey for &T {
    fn write_routing_bytes(&self, out: &mut Vec<u8>) {
        (**self).write_routing_bytes(out);
    }
}

impl<T: RoutingKey + ?Sized> RoutingKey for Box<T> {
    fn write_routing_bytes(&self, out: &mut Vec<u8>) {
        (**self).write_routing_bytes(out);
    }
}

/// Writes `value` preceded by the length of its encoding.
fn write_prefixed<T: RoutingKey + ?Sized>(value: &T, out: &mut Vec<u8>) {
    let len_at = out.len();
    out.extend_from_slice(&[0; 4]);
    value.write_routing_bytes(out);
    let len = (out.len() - len_at - 4) as u32;
    out[len_at..len_at + 4].copy_from_slice(&len.to_le_bytes());
}

impl<A: RoutingKey, B: RoutingKey> RoutingKey for (A, B) {
    fn write_routing_bytes(&self, out: &mut Vec<u8>) {
        write_prefixed(&self.0, out);
        write_prefixed(&self.1, out);
    }
}

impl<A: RoutingKey, B: RoutingKey, C: RoutingKey> RoutingKey for (A, B, C) {
    fn write_routing_bytes(&self, out: &mut Vec<u8>) {
        write_prefixed(&self.0, out);
        write_prefixed(&self.1, out);
        write_prefixed(&self.2, out);
    }
}

//! Ring position trait.

use std::fmt::Debug;
use std::hash::Hash;

/// A position on the hash ring.
///
/// The ring wraps around: distances are measured clockwise and the position
/// after [`max`](Token::max) is [`zero`](Token::zero).
pub trait Token: Copy + Ord + Hash + Send + Sync + Debug + 'static {
    fn zero() -> Self;
    fn max() -> Self;
    /// Clockwise distance from `self` to `other`.
    fn distance_to(&self, other: &Self) -> Self;
    /// This value as a share of the full ring, in `[0, 1)`.
    fn fraction_of_ring(&self) -> f64;
}

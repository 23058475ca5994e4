//! 64-bit hash token produced by the fixed partitioners.

use crate::token::traits::Token;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position on a ring of `u64` hash values.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashToken(pub u64);

impl Token for HashToken {
    fn zero() -> Self {
        HashToken(0)
    }

    fn max() -> Self {
        HashToken(u64::MAX)
    }

    fn distance_to(&self, other: &Self) -> Self {
        HashToken(other.0.wrapping_sub(self.0))
    }

    fn fraction_of_ring(&self) -> f64 {
        self.0 as f64 / (u64::MAX as f64 + 1.0)
    }
}

impl fmt::Display for HashToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_wraps_around() {
        assert_eq!(HashToken(100).distance_to(&HashToken(200)), HashToken(100));
        assert_eq!(HashToken(u64::MAX).distance_to(&HashToken(0)), HashToken(1));
        assert_eq!(HashToken(5).distance_to(&HashToken(5)), HashToken(0));
    }

    #[test]
    fn test_fraction_of_ring() {
        assert_eq!(HashToken::zero().fraction_of_ring(), 0.0);
        let half = HashToken(1 << 63).fraction_of_ring();
        assert!((half - 0.5).abs() < 1e-12);
    }
}

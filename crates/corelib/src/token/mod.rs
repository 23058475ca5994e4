//! Ring positions.
//!
//! Partitioners map routing bytes to a [`HashToken`]; ring entries are
//! ordered by it.

pub mod hashed;
pub mod traits;

pub use hashed::HashToken;
pub use traits::Token;

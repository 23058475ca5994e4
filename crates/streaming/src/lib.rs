//! Single-owner routing of application events.
//!
//! This crate routes arbitrary events (not cache keys) to exactly one member
//! of a live set, so repeated events with the same routing key (the same word
//! in a word count, the same session id) always land on the same processor:
//! - No partition table and no backups
//! - The ring follows the live set lazily: members join the first time they
//!   are seen and are pruned once they drop out
//! - Membership changes rebuild the ring and swap it in atomically

pub mod event;
pub mod router;

pub use event::RoutableEvent;
pub use router::EventRouter;

pub use corelib::{Error, Result};

//! Error types for the core library.
//!
//! A single error enum is shared by every crate in the workspace so that a
//! failure raised deep inside the ring surfaces unchanged at the facade.

use crate::topology::TopologyVersion;
use thiserror::Error;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while routing or assigning partitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Routing or assignment attempted with zero eligible candidates.
    #[error("empty topology: no eligible node to route to")]
    EmptyTopology,

    /// Rejected input: out-of-range partition, bad configuration, malformed snapshot.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The owning grid/cache context is stopped or not yet started.
    #[error("affinity context is not active")]
    NotActive,

    /// A historical version fell outside the retention window.
    #[error("topology version {requested} is no longer retained, served {served} instead")]
    StaleVersionCoerced {
        requested: TopologyVersion,
        served: TopologyVersion,
    },

    /// A topology change arrived with a version other than `last + 1`.
    #[error("out of order topology event: expected version {expected}, received {received}")]
    OutOfOrderTopologyEvent {
        expected: TopologyVersion,
        received: TopologyVersion,
    },

    /// The requested version has not been computed yet.
    #[error("topology version {requested} is not ready (latest: {latest:?})")]
    VersionNotReady {
        requested: TopologyVersion,
        latest: Option<TopologyVersion>,
    },

    /// Too many out-of-order events are waiting for a missing version.
    #[error("pending topology event queue is full ({capacity} events)")]
    PendingQueueFull { capacity: usize },
}

impl Error {
    /// Shorthand for [`Error::InvalidArgument`].
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// True for liveness and ordering failures that the caller may retry once
    /// external state (membership, lifecycle) has settled.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NotActive
                | Error::OutOfOrderTopologyEvent { .. }
                | Error::VersionNotReady { .. }
                | Error::PendingQueueFull { .. }
        )
    }
}

//! Versioned assignment store.
//!
//! # Concurrency
//!
//! - Recomputation is serialized by the writer mutex; one topology event is
//!   fully processed before the next one is looked at
//! - The newest assignment is published with a single pointer swap
//!   (`ArcSwapOption`), so readers never block and never see a partial table
//! - Retained versions live in a `BTreeMap` behind a read-write lock that is
//!   only write-locked for the insert/evict of a finished assignment
//!
//! # Ordering
//!
//! The first event accepted may carry any version. After that every event
//! must be exactly `latest + 1`. A version that is already retained is a
//! re-delivery and returns the cached assignment. Anything else is rejected,
//! or held back under [`OutOfOrderPolicy::Queue`] if it lies in the future.

use crate::assignment::Assignment;
use crate::config::{AffinityConfig, OutOfOrderPolicy};
use crate::context::AffinityContext;
use crate::function::{AffinityFunction, RingAffinityFunction};
use arc_swap::ArcSwapOption;
use corelib::{Error, Result, TopologyEvent, TopologySnapshot, TopologyVersion};
use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcome of [`AffinityAssignmentCache::on_topology_change`].
#[derive(Debug, Clone)]
pub enum TopologyUpdate {
    /// A new assignment was computed and published.
    Applied(Arc<Assignment>),
    /// The version was already retained; nothing was recomputed.
    Unchanged(Arc<Assignment>),
    /// Held back until `expected` arrives.
    Queued {
        version: TopologyVersion,
        expected: TopologyVersion,
    },
}

impl TopologyUpdate {
    pub fn assignment(&self) -> Option<&Arc<Assignment>> {
        match self {
            TopologyUpdate::Applied(a) | TopologyUpdate::Unchanged(a) => Some(a),
            TopologyUpdate::Queued { .. } => None,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, TopologyUpdate::Applied(_))
    }
}

/// Result of a version-pinned read.
///
/// A version older than the retention window is served from the oldest
/// retained version instead; `coerced_from` then records what was asked for.
#[derive(Debug, Clone)]
pub struct VersionedAssignment {
    assignment: Arc<Assignment>,
    coerced_from: Option<TopologyVersion>,
}

impl VersionedAssignment {
    pub fn assignment(&self) -> &Arc<Assignment> {
        &self.assignment
    }

    pub fn version(&self) -> TopologyVersion {
        self.assignment.version()
    }

    pub fn is_coerced(&self) -> bool {
        self.coerced_from.is_some()
    }

    /// The version originally requested, when it was not the one served.
    pub fn coerced_from(&self) -> Option<TopologyVersion> {
        self.coerced_from
    }

    pub fn into_inner(self) -> Arc<Assignment> {
        self.assignment
    }

    /// Turns a coerced read into [`Error::StaleVersionCoerced`].
    pub fn into_strict(self) -> Result<Arc<Assignment>> {
        match self.coerced_from {
            Some(requested) => Err(Error::StaleVersionCoerced {
                requested,
                served: self.assignment.version(),
            }),
            None => Ok(self.assignment),
        }
    }
}

struct PendingEvent {
    snapshot: Arc<TopologySnapshot>,
    event: Option<TopologyEvent>,
}

#[derive(Default)]
struct WriterState {
    pending: BTreeMap<TopologyVersion, PendingEvent>,
}

/// Computes, publishes and retains the assignments of one cache.
pub struct AffinityAssignmentCache {
    name: String,
    partitions: u32,
    backups: usize,
    retention: usize,
    policy: OutOfOrderPolicy,
    max_pending: usize,
    function: Arc<dyn AffinityFunction>,
    head: ArcSwapOption<Assignment>,
    history: RwLock<BTreeMap<TopologyVersion, Arc<Assignment>>>,
    writer: Mutex<WriterState>,
}

impl AffinityAssignmentCache {
    /// Cache using the ring function configured from `config`.
    pub fn new(name: impl Into<String>, config: &AffinityConfig) -> Result<Self> {
        Self::with_function(name, config, Arc::new(RingAffinityFunction::from_config(config)))
    }

    /// Cache using a caller-supplied function.
    pub fn with_function(
        name: impl Into<String>,
        config: &AffinityConfig,
        function: Arc<dyn AffinityFunction>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            partitions: config.partitions,
            backups: config.backups,
            retention: config.retention,
            policy: config.out_of_order,
            max_pending: config.max_pending_events,
            function,
            head: ArcSwapOption::empty(),
            history: RwLock::new(BTreeMap::new()),
            writer: Mutex::new(WriterState::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    pub fn backups(&self) -> usize {
        self.backups
    }

    pub fn function(&self) -> &Arc<dyn AffinityFunction> {
        &self.function
    }

    /// Reacts to a membership change.
    ///
    /// # Errors
    ///
    /// - [`Error::OutOfOrderTopologyEvent`] for a version that is neither
    ///   retained nor `latest + 1` (unless queued)
    /// - [`Error::PendingQueueFull`] when the queue policy's bound is reached
    /// - whatever the affinity function or output validation reports for
    ///   `version` itself; queued events applied afterwards never fail the call
    pub fn on_topology_change(
        &self,
        version: TopologyVersion,
        snapshot: impl Into<Arc<TopologySnapshot>>,
        event: Option<TopologyEvent>,
    ) -> Result<TopologyUpdate> {
        let mut writer = self.writer.lock();

        let latest = match self.latest_version() {
            None => {
                let applied = self.apply(version, snapshot.into(), event)?;
                self.drain_pending(&mut writer);
                return Ok(TopologyUpdate::Applied(applied));
            }
            Some(latest) => latest,
        };

        if let Some(cached) = self.history.read().get(&version) {
            debug!(cache = %self.name, %version, "topology version already applied");
            return Ok(TopologyUpdate::Unchanged(Arc::clone(cached)));
        }

        let expected = latest.next();
        if version == expected {
            let applied = self.apply(version, snapshot.into(), event)?;
            writer.pending.remove(&version);
            self.drain_pending(&mut writer);
            return Ok(TopologyUpdate::Applied(applied));
        }

        if version < expected || self.policy == OutOfOrderPolicy::Reject {
            counter!("affinity_topology_events_rejected_total", "cache" => self.name.clone()).increment(1);
            warn!(cache = %self.name, %expected, received = %version, "rejecting out of order topology event");
            return Err(Error::OutOfOrderTopologyEvent {
                expected,
                received: version,
            });
        }

        if !writer.pending.contains_key(&version) && writer.pending.len() >= self.max_pending {
            counter!("affinity_topology_events_rejected_total", "cache" => self.name.clone()).increment(1);
            warn!(cache = %self.name, received = %version, capacity = self.max_pending, "pending topology queue is full");
            return Err(Error::PendingQueueFull {
                capacity: self.max_pending,
            });
        }

        writer.pending.insert(
            version,
            PendingEvent {
                snapshot: snapshot.into(),
                event,
            },
        );
        counter!("affinity_topology_events_queued_total", "cache" => self.name.clone()).increment(1);
        debug!(
            cache = %self.name,
            %version,
            %expected,
            pending = writer.pending.len(),
            "queued topology event until the gap is filled"
        );
        Ok(TopologyUpdate::Queued { version, expected })
    }

    /// Applies queued events that have become contiguous.
    ///
    /// Stops at the first event that fails to apply and leaves it queued; a
    /// later delivery of that version replaces it. The failure belongs to the
    /// queued event, not to the caller whose version was already published.
    fn drain_pending(&self, writer: &mut WriterState) {
        while let Some(latest) = self.latest_version() {
            let version = latest.next();
            let Some(next) = writer.pending.remove(&version) else {
                break;
            };
            if let Err(err) = self.apply(version, Arc::clone(&next.snapshot), next.event) {
                error!(
                    cache = %self.name,
                    %version,
                    error = %err,
                    "queued topology event failed to apply, keeping it pending"
                );
                writer.pending.insert(version, next);
                break;
            }
        }
    }

    /// Computes, validates and publishes one version. Caller holds the writer lock.
    fn apply(
        &self,
        version: TopologyVersion,
        snapshot: Arc<TopologySnapshot>,
        event: Option<TopologyEvent>,
    ) -> Result<Arc<Assignment>> {
        let previous = self.head.load_full();
        let ctx = AffinityContext::new(
            previous.clone(),
            self.partitions,
            self.backups,
            Arc::clone(&snapshot),
            version,
            event,
        );

        let assignment = Assignment::new(version, self.function.assign_partitions(&ctx)?);
        assignment.validate(self.partitions, &snapshot)?;
        let assignment = Arc::new(assignment);

        let evicted = {
            let mut history = self.history.write();
            history.insert(version, Arc::clone(&assignment));
            let mut evicted = 0usize;
            while history.len() > self.retention {
                history.pop_first();
                evicted += 1;
            }
            evicted
        };
        self.head.store(Some(Arc::clone(&assignment)));

        counter!("affinity_assignments_computed_total", "cache" => self.name.clone()).increment(1);
        gauge!("affinity_topology_version", "cache" => self.name.clone()).set(version.0 as f64);

        let moved = previous
            .as_ref()
            .map(|p| p.moved_primaries(&assignment).len())
            .unwrap_or(0);
        info!(
            cache = %self.name,
            %version,
            nodes = snapshot.len(),
            event = ?event,
            moved_primaries = moved,
            evicted,
            "published affinity assignment"
        );
        Ok(assignment)
    }

    /// Version-pinned read.
    ///
    /// # Errors
    ///
    /// [`Error::VersionNotReady`] for a version newer than the latest one, or
    /// while nothing has been published.
    pub fn assignment(&self, version: TopologyVersion) -> Result<VersionedAssignment> {
        let history = self.history.read();
        if let Some(found) = history.get(&version) {
            return Ok(VersionedAssignment {
                assignment: Arc::clone(found),
                coerced_from: None,
            });
        }

        let latest = history.keys().next_back().copied();
        if latest.map_or(true, |l| version > l) {
            return Err(Error::VersionNotReady {
                requested: version,
                latest,
            });
        }

        // Evicted: serve the nearest retained version.
        let (served, assignment) = history
            .range(version..)
            .next()
            .ok_or(Error::VersionNotReady { requested: version, latest })?;
        counter!("affinity_stale_version_coerced_total", "cache" => self.name.clone()).increment(1);
        debug!(cache = %self.name, requested = %version, %served, "serving retained version for evicted one");
        Ok(VersionedAssignment {
            assignment: Arc::clone(assignment),
            coerced_from: Some(version),
        })
    }

    pub fn latest_version(&self) -> Option<TopologyVersion> {
        self.head.load_full().map(|a| a.version())
    }

    /// Newest published assignment.
    pub fn latest(&self) -> Option<Arc<Assignment>> {
        self.head.load_full()
    }

    /// True once `version` (or a newer one) has been published.
    pub fn is_ready(&self, version: TopologyVersion) -> bool {
        self.latest_version().is_some_and(|l| l >= version)
    }

    /// Versions currently retained, oldest first.
    pub fn retained_versions(&self) -> Vec<TopologyVersion> {
        self.history.read().keys().copied().collect()
    }

    /// Number of events waiting for a missing version.
    pub fn pending_events(&self) -> usize {
        self.writer.lock().pending.len()
    }

    /// Drops retained versions older than `before`. The latest version is
    /// always kept. Returns how many were dropped.
    pub fn clean_up(&self, before: TopologyVersion) -> usize {
        let _writer = self.writer.lock();
        let latest = self.latest_version();
        let mut history = self.history.write();
        let before = latest.map_or(before, |l| before.min(l));
        let keep = history.split_off(&before);
        let dropped = history.len();
        *history = keep;
        if dropped > 0 {
            debug!(cache = %self.name, %before, dropped, "cleaned up retained versions");
        }
        dropped
    }
}

impl std::fmt::Debug for AffinityAssignmentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AffinityAssignmentCache")
            .field("name", &self.name)
            .field("partitions", &self.partitions)
            .field("backups", &self.backups)
            .field("function", &self.function)
            .field("latest", &self.latest_version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::{ClusterNode, NodeId};

    fn snapshot(ids: &[u128]) -> TopologySnapshot {
        TopologySnapshot::new(
            ids.iter()
                .map(|&i| ClusterNode::new(NodeId(i), i as u64, format!("n{i}")))
                .collect(),
        )
        .unwrap()
    }

    fn cache(config: AffinityConfig) -> AffinityAssignmentCache {
        AffinityAssignmentCache::new("test", &config).unwrap()
    }

    #[test]
    fn test_nothing_published() {
        let c = cache(AffinityConfig::new(8, 0));
        assert_eq!(c.latest_version(), None);
        assert!(c.latest().is_none());
        assert_eq!(
            c.assignment(TopologyVersion(1)).unwrap_err(),
            Error::VersionNotReady {
                requested: TopologyVersion(1),
                latest: None
            }
        );
    }

    #[test]
    fn test_idempotent_redelivery() {
        let c = cache(AffinityConfig::new(8, 0));
        let first = c
            .on_topology_change(TopologyVersion(1), snapshot(&[1, 2]), None)
            .unwrap();
        assert!(first.is_applied());

        let again = c
            .on_topology_change(TopologyVersion(1), snapshot(&[1, 2, 3]), None)
            .unwrap();
        assert!(matches!(again, TopologyUpdate::Unchanged(_)));
        assert!(Arc::ptr_eq(first.assignment().unwrap(), again.assignment().unwrap()));
    }

    #[test]
    fn test_reject_gap() {
        let c = cache(AffinityConfig::new(8, 0));
        c.on_topology_change(TopologyVersion(1), snapshot(&[1]), None).unwrap();
        let err = c
            .on_topology_change(TopologyVersion(3), snapshot(&[1, 2, 3]), None)
            .unwrap_err();
        assert_eq!(
            err,
            Error::OutOfOrderTopologyEvent {
                expected: TopologyVersion(2),
                received: TopologyVersion(3)
            }
        );
        assert!(err.is_retryable());
        assert_eq!(c.latest_version(), Some(TopologyVersion(1)));
    }

    #[test]
    fn test_queue_fills_gap() {
        let config = AffinityConfig::new(8, 0).with_out_of_order(OutOfOrderPolicy::Queue);
        let c = cache(config);
        c.on_topology_change(TopologyVersion(1), snapshot(&[1]), None).unwrap();

        let queued = c
            .on_topology_change(TopologyVersion(3), snapshot(&[1, 2, 3]), None)
            .unwrap();
        assert!(matches!(
            queued,
            TopologyUpdate::Queued {
                expected: TopologyVersion(2),
                ..
            }
        ));
        assert_eq!(c.pending_events(), 1);
        assert_eq!(c.latest_version(), Some(TopologyVersion(1)));

        c.on_topology_change(TopologyVersion(2), snapshot(&[1, 2]), None).unwrap();
        assert_eq!(c.latest_version(), Some(TopologyVersion(3)));
        assert_eq!(c.pending_events(), 0);
    }

    /// Fails the first attempt at one version, then behaves like the ring.
    #[derive(Debug)]
    struct FailsOnceAt {
        version: TopologyVersion,
        failed: std::sync::atomic::AtomicBool,
    }

    impl AffinityFunction for FailsOnceAt {
        fn assign_partitions(&self, ctx: &AffinityContext) -> Result<Vec<Vec<NodeId>>> {
            use std::sync::atomic::Ordering;
            if ctx.topology_version() == self.version && !self.failed.swap(true, Ordering::SeqCst) {
                return Err(Error::InvalidArgument("cannot assign".into()));
            }
            RingAffinityFunction::new().assign_partitions(ctx)
        }
        fn name(&self) -> &'static str {
            "FailsOnceAt"
        }
    }

    #[test]
    fn test_failed_queued_event_stays_pending() {
        let config = AffinityConfig::new(8, 0).with_out_of_order(OutOfOrderPolicy::Queue);
        let function = Arc::new(FailsOnceAt {
            version: TopologyVersion(3),
            failed: Default::default(),
        });
        let c = AffinityAssignmentCache::with_function("drain", &config, function).unwrap();
        c.on_topology_change(TopologyVersion(1), snapshot(&[1]), None).unwrap();
        c.on_topology_change(TopologyVersion(3), snapshot(&[1, 2, 3]), None).unwrap();

        // The gap filler is published and reported as such.
        let filled = c
            .on_topology_change(TopologyVersion(2), snapshot(&[1, 2]), None)
            .unwrap();
        assert!(filled.is_applied());
        assert_eq!(filled.assignment().unwrap().version(), TopologyVersion(2));
        assert_eq!(c.latest_version(), Some(TopologyVersion(2)));
        assert_eq!(c.pending_events(), 1);

        // Redelivering the queued version applies it and clears the queue.
        let retried = c
            .on_topology_change(TopologyVersion(3), snapshot(&[1, 2, 3]), None)
            .unwrap();
        assert!(retried.is_applied());
        assert_eq!(c.latest_version(), Some(TopologyVersion(3)));
        assert_eq!(c.pending_events(), 0);
    }

    #[test]
    fn test_queue_bound() {
        let config = AffinityConfig::new(8, 0)
            .with_out_of_order(OutOfOrderPolicy::Queue)
            .with_max_pending_events(1);
        let c = cache(config);
        c.on_topology_change(TopologyVersion(1), snapshot(&[1]), None).unwrap();
        c.on_topology_change(TopologyVersion(3), snapshot(&[1]), None).unwrap();
        assert_eq!(
            c.on_topology_change(TopologyVersion(4), snapshot(&[1]), None).unwrap_err(),
            Error::PendingQueueFull { capacity: 1 }
        );
    }

    #[test]
    fn test_retention_and_coercion() {
        let c = cache(AffinityConfig::new(8, 0).with_retention(3));
        for v in 1..=5u64 {
            c.on_topology_change(TopologyVersion(v), snapshot(&[1, 2]), None).unwrap();
        }
        assert_eq!(
            c.retained_versions(),
            vec![TopologyVersion(3), TopologyVersion(4), TopologyVersion(5)]
        );

        let read = c.assignment(TopologyVersion(1)).unwrap();
        assert!(read.is_coerced());
        assert_eq!(read.version(), TopologyVersion(3));
        assert_eq!(
            read.into_strict().unwrap_err(),
            Error::StaleVersionCoerced {
                requested: TopologyVersion(1),
                served: TopologyVersion(3)
            }
        );

        // A stale re-delivery is not retained anymore and is refused.
        assert!(c
            .on_topology_change(TopologyVersion(2), snapshot(&[1]), None)
            .is_err());
        assert!(c.assignment(TopologyVersion(6)).is_err());
        assert!(c.is_ready(TopologyVersion(5)));
        assert!(!c.is_ready(TopologyVersion(6)));
    }

    #[test]
    fn test_clean_up_keeps_latest() {
        let c = cache(AffinityConfig::new(8, 0));
        for v in 1..=4u64 {
            c.on_topology_change(TopologyVersion(v), snapshot(&[1]), None).unwrap();
        }
        assert_eq!(c.clean_up(TopologyVersion(3)), 2);
        assert_eq!(c.clean_up(TopologyVersion(100)), 1);
        assert_eq!(c.retained_versions(), vec![TopologyVersion(4)]);
    }

    #[test]
    fn test_invalid_function_output_is_not_published() {
        #[derive(Debug)]
        struct Broken;
        impl AffinityFunction for Broken {
            fn assign_partitions(&self, ctx: &AffinityContext) -> Result<Vec<Vec<NodeId>>> {
                Ok(vec![vec![NodeId(42)]; ctx.partitions() as usize])
            }
            fn name(&self) -> &'static str {
                "Broken"
            }
        }

        let c = AffinityAssignmentCache::with_function("broken", &AffinityConfig::new(2, 0), Arc::new(Broken))
            .unwrap();
        let err = c
            .on_topology_change(TopologyVersion(1), snapshot(&[1]), None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(c.latest_version(), None);
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(AffinityAssignmentCache::new("bad", &AffinityConfig::new(0, 0)).is_err());
    }
}

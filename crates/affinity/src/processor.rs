//! Registry of assignment caches fed by the membership subsystem.
//!
//! The discovery layer registers one callback: [`AffinityProcessor::on_topology_change`].
//! Every registered cache receives the event; each computes its own
//! assignment under its own configuration.

use crate::cache::{AffinityAssignmentCache, TopologyUpdate};
use crate::config::AffinityConfig;
use crate::facade::AffinityFacade;
use crate::function::AffinityFunction;
use crate::gate::{LivenessGate, SharedGate};
use crate::mapper::AffinityKeyMapper;
use corelib::{Error, Result, TopologyEvent, TopologySnapshot, TopologyVersion};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Debug)]
pub struct AffinityProcessor {
    caches: DashMap<String, Arc<AffinityAssignmentCache>>,
    gate: SharedGate,
}

impl AffinityProcessor {
    /// A processor that is active immediately.
    pub fn new() -> Self {
        Self::with_gate(Arc::new(LivenessGate::new()))
    }

    pub fn with_gate(gate: SharedGate) -> Self {
        Self {
            caches: DashMap::new(),
            gate,
        }
    }

    pub fn gate(&self) -> &SharedGate {
        &self.gate
    }

    /// Registers a cache using the ring function configured from `config`.
    pub fn register(&self, name: &str, config: &AffinityConfig) -> Result<Arc<AffinityAssignmentCache>> {
        self.insert(AffinityAssignmentCache::new(name, config)?)
    }

    /// Registers a cache using a custom affinity function.
    pub fn register_with_function(
        &self,
        name: &str,
        config: &AffinityConfig,
        function: Arc<dyn AffinityFunction>,
    ) -> Result<Arc<AffinityAssignmentCache>> {
        self.insert(AffinityAssignmentCache::with_function(name, config, function)?)
    }

    fn insert(&self, cache: AffinityAssignmentCache) -> Result<Arc<AffinityAssignmentCache>> {
        let _guard = self.gate.enter()?;
        match self.caches.entry(cache.name().to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::invalid(format!(
                "cache {} is already registered",
                cache.name()
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let cache = Arc::new(cache);
                info!(
                    cache = %cache.name(),
                    partitions = cache.partitions(),
                    backups = cache.backups(),
                    function = cache.function().name(),
                    "registered affinity cache"
                );
                slot.insert(Arc::clone(&cache));
                Ok(cache)
            }
        }
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<AffinityAssignmentCache>> {
        let removed = self.caches.remove(name).map(|(_, cache)| cache);
        if removed.is_some() {
            debug!(cache = name, "unregistered affinity cache");
        }
        removed
    }

    pub fn cache(&self, name: &str) -> Result<Arc<AffinityAssignmentCache>> {
        let _guard = self.gate.enter()?;
        self.caches
            .get(name)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| Error::invalid(format!("unknown cache {name}")))
    }

    /// Registered cache names, sorted.
    pub fn cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Typed facade over a registered cache, sharing this processor's gate.
    pub fn facade<K>(&self, name: &str, mapper: Arc<dyn AffinityKeyMapper<K>>) -> Result<AffinityFacade<K>> {
        let cache = self.cache(name)?;
        Ok(AffinityFacade::new(cache, mapper, Arc::clone(&self.gate)))
    }

    /// Delivers a topology change to every registered cache.
    ///
    /// All caches see the event even if one fails; the first failure is
    /// returned after the fan-out.
    pub fn on_topology_change(
        &self,
        version: TopologyVersion,
        snapshot: TopologySnapshot,
        event: Option<TopologyEvent>,
    ) -> Result<Vec<(String, TopologyUpdate)>> {
        let _guard = self.gate.enter()?;
        let snapshot = Arc::new(snapshot);

        // Snapshot the registry so no shard lock is held during recomputation.
        let mut caches: Vec<Arc<AffinityAssignmentCache>> =
            self.caches.iter().map(|e| Arc::clone(e.value())).collect();
        caches.sort_by(|a, b| a.name().cmp(b.name()));

        let mut updates = Vec::with_capacity(caches.len());
        let mut first_error = None;
        for cache in caches {
            match cache.on_topology_change(version, Arc::clone(&snapshot), event) {
                Ok(update) => updates.push((cache.name().to_string(), update)),
                Err(e) => {
                    error!(cache = %cache.name(), %version, error = %e, "topology change failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(updates),
        }
    }

    pub fn start(&self) {
        self.gate.start();
    }

    /// Rejects new calls and waits for in-flight ones.
    pub fn stop(&self) {
        self.gate.stop();
    }
}

impl Default for AffinityProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::DefaultAffinityKeyMapper;
    use corelib::{ClusterNode, NodeId};

    fn snapshot(ids: &[u128]) -> TopologySnapshot {
        TopologySnapshot::new(
            ids.iter()
                .map(|&i| ClusterNode::new(NodeId(i), i as u64, format!("n{i}")))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_fan_out() {
        let p = AffinityProcessor::new();
        p.register("orders", &AffinityConfig::new(16, 1)).unwrap();
        p.register("users", &AffinityConfig::new(32, 0)).unwrap();
        assert!(p.register("users", &AffinityConfig::new(8, 0)).is_err());

        let updates = p
            .on_topology_change(TopologyVersion(1), snapshot(&[1, 2]), Some(TopologyEvent::joined(NodeId(2))))
            .unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].0, "orders");
        assert_eq!(p.cache("users").unwrap().latest_version(), Some(TopologyVersion(1)));
        assert_eq!(p.cache_names(), vec!["orders".to_string(), "users".to_string()]);
    }

    #[test]
    fn test_failure_does_not_starve_other_caches() {
        let p = AffinityProcessor::new();
        p.register("a", &AffinityConfig::new(4, 0)).unwrap();
        let b = p.register("b", &AffinityConfig::new(4, 0)).unwrap();

        p.on_topology_change(TopologyVersion(1), snapshot(&[1]), None).unwrap();
        // "b" already saw version 2 on its own; "a" has not.
        b.on_topology_change(TopologyVersion(2), snapshot(&[1]), None).unwrap();
        b.on_topology_change(TopologyVersion(3), snapshot(&[1]), None).unwrap();

        let err = p
            .on_topology_change(TopologyVersion(3), snapshot(&[1]), None)
            .unwrap_err();
        assert!(matches!(err, Error::OutOfOrderTopologyEvent { .. }));
        assert_eq!(p.cache("b").unwrap().latest_version(), Some(TopologyVersion(3)));
    }

    #[test]
    fn test_stop_gates_facades() {
        let p = AffinityProcessor::new();
        p.register("c", &AffinityConfig::new(8, 0)).unwrap();
        let facade = p.facade::<u64>("c", Arc::new(DefaultAffinityKeyMapper)).unwrap();
        assert!(facade.partition(&1).is_ok());

        p.stop();
        assert_eq!(facade.partition(&1).unwrap_err(), Error::NotActive);
        assert_eq!(p.cache("c").unwrap_err(), Error::NotActive);

        p.start();
        assert!(facade.primary_node(&1).is_ok());
    }

    #[test]
    fn test_unknown_cache() {
        let p = AffinityProcessor::new();
        assert!(matches!(p.cache("missing"), Err(Error::InvalidArgument(_))));
        assert!(p.unregister("missing").is_none());
    }
}

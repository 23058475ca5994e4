//! End-to-end behaviour of the affinity engine.
//!
//! # Test Strategy
//!
//! 1. **Assignment shape**: coverage, owner counts
//! 2. **Membership changes**: leave and join only move affected partitions
//! 3. **Co-location**: keys sharing an affinity key share owners
//! 4. **Bootstrap**: empty topology means "no owner"
//! 5. **Retention**: evicted versions are served from the oldest retained one

use affinity::{
    AffinityAssignmentCache, AffinityConfig, AffinityFacade, AffinityKey, AffinityProcessor,
    DefaultAffinityKeyMapper, LivenessGate,
};
use corelib::{ClusterNode, Error, NodeId, TopologyEvent, TopologySnapshot, TopologyVersion};
use std::collections::HashSet;
use std::sync::Arc;

const A: NodeId = NodeId(0xA);
const B: NodeId = NodeId(0xB);
const C: NodeId = NodeId(0xC);

fn snapshot(ids: &[NodeId]) -> TopologySnapshot {
    TopologySnapshot::new(
        ids.iter()
            .enumerate()
            .map(|(order, id)| ClusterNode::new(*id, order as u64, format!("node-{id}")))
            .collect(),
    )
    .unwrap()
}

fn facade<K>(config: AffinityConfig) -> AffinityFacade<K>
where
    DefaultAffinityKeyMapper: affinity::AffinityKeyMapper<K>,
{
    let cache = AffinityAssignmentCache::new("scenario", &config).unwrap();
    AffinityFacade::new(
        Arc::new(cache),
        Arc::new(DefaultAffinityKeyMapper),
        Arc::new(LivenessGate::new()),
    )
}

// ============================================================================
// Assignment shape
// ============================================================================

#[test]
fn test_four_partitions_three_nodes() {
    let cache = AffinityAssignmentCache::new("s1", &AffinityConfig::new(4, 0)).unwrap();
    let update = cache
        .on_topology_change(TopologyVersion(1), snapshot(&[A, B, C]), None)
        .unwrap();
    let assignment = update.assignment().unwrap();

    assert_eq!(assignment.partition_count(), 4);
    assert!(!assignment.has_unowned());
    for (_, owners) in assignment.iter() {
        assert_eq!(owners.len(), 1);
        assert!([A, B, C].contains(&owners[0]));
    }
    let primaries: HashSet<_> = assignment.iter().map(|(_, owners)| owners[0]).collect();
    assert_eq!(primaries.len(), 3);
}

#[test]
fn test_all_backups_means_every_node() {
    let cache = AffinityAssignmentCache::new("all", &AffinityConfig::new(16, usize::MAX)).unwrap();
    let update = cache
        .on_topology_change(TopologyVersion(1), snapshot(&[A, B, C]), None)
        .unwrap();
    for (_, owners) in update.assignment().unwrap().iter() {
        let unique: HashSet<_> = owners.iter().collect();
        assert_eq!(unique.len(), 3);
    }
}

// ============================================================================
// Membership changes
// ============================================================================

#[test]
fn test_leave_only_moves_partitions_of_leaver() {
    let cache = AffinityAssignmentCache::new("s2", &AffinityConfig::new(256, 0)).unwrap();
    let before = cache
        .on_topology_change(TopologyVersion(1), snapshot(&[A, B, C]), None)
        .unwrap()
        .assignment()
        .cloned()
        .unwrap();
    let after = cache
        .on_topology_change(TopologyVersion(2), snapshot(&[A, B]), Some(TopologyEvent::left(C)))
        .unwrap()
        .assignment()
        .cloned()
        .unwrap();

    for part in 0..256 {
        let old = before.primary(part).unwrap().unwrap();
        let new = after.primary(part).unwrap().unwrap();
        if old == C {
            assert_ne!(new, C);
        } else {
            assert_eq!(old, new, "partition {part} moved although {old} stayed");
        }
    }
}

#[test]
fn test_join_keeps_existing_primaries() {
    let cache = AffinityAssignmentCache::new("join", &AffinityConfig::new(256, 1)).unwrap();
    let before = cache
        .on_topology_change(TopologyVersion(1), snapshot(&[A, B]), None)
        .unwrap()
        .assignment()
        .cloned()
        .unwrap();
    let after = cache
        .on_topology_change(TopologyVersion(2), snapshot(&[A, B, C]), Some(TopologyEvent::joined(C)))
        .unwrap()
        .assignment()
        .cloned()
        .unwrap();

    assert!(before.moved_primaries(&after).is_empty());
    // The newcomer still receives backup copies.
    assert!(!after.backup_partitions(C).is_empty());
}

// ============================================================================
// Co-location
// ============================================================================

#[test]
fn test_colocated_keys_follow_topology_changes() {
    let f = facade::<AffinityKey<String, String>>(AffinityConfig::new(128, 1));
    let k1 = AffinityKey::with_affinity("K1".to_string(), "G".to_string());
    let k2 = AffinityKey::with_affinity("K2".to_string(), "G".to_string());

    let topologies = [vec![A], vec![A, B], vec![A, B, C], vec![B, C], vec![C]];
    for (i, ids) in topologies.iter().enumerate() {
        f.cache()
            .on_topology_change(TopologyVersion(i as u64 + 1), snapshot(ids), None)
            .unwrap();
        assert_eq!(f.primary_node(&k1).unwrap(), f.primary_node(&k2).unwrap());
        assert_eq!(f.all_nodes(&k1).unwrap(), f.all_nodes(&k2).unwrap());
    }
}

// ============================================================================
// Bootstrap
// ============================================================================

#[test]
fn test_empty_topology_has_no_owner() {
    let f = facade::<String>(AffinityConfig::new(32, 2));
    f.cache()
        .on_topology_change(TopologyVersion(1), TopologySnapshot::empty(), None)
        .unwrap();

    let key = "anything".to_string();
    assert_eq!(f.primary_node(&key).unwrap(), None);
    assert!(f.backup_nodes(&key).unwrap().is_empty());
    assert!(f.map_keys_to_nodes(vec![key]).unwrap().is_empty());
    assert!(f.cache().latest().unwrap().has_unowned());
}

// ============================================================================
// Retention
// ============================================================================

#[test]
fn test_thousand_changes_retention_sixteen() {
    let config = AffinityConfig::new(16, 0).with_retention(16);
    let cache = AffinityAssignmentCache::new("s5", &config).unwrap();

    let shapes = [snapshot(&[A, B]), snapshot(&[A, B, C])];
    for v in 1..=1000u64 {
        cache
            .on_topology_change(TopologyVersion(v), shapes[(v % 2) as usize].clone(), None)
            .unwrap();
    }

    assert_eq!(cache.latest_version(), Some(TopologyVersion(1000)));
    assert_eq!(cache.retained_versions().len(), 16);

    let read = cache.assignment(TopologyVersion(0)).unwrap();
    assert!(read.is_coerced());
    assert_eq!(read.version(), TopologyVersion(985));
    assert_eq!(
        read.into_strict().unwrap_err(),
        Error::StaleVersionCoerced {
            requested: TopologyVersion(0),
            served: TopologyVersion(985),
        }
    );

    let exact = cache.assignment(TopologyVersion(990)).unwrap();
    assert!(!exact.is_coerced());
    assert_eq!(exact.version(), TopologyVersion(990));
}

#[test]
fn test_processor_end_to_end() {
    let processor = AffinityProcessor::new();
    processor.register("orders", &AffinityConfig::new(64, 1)).unwrap();
    processor
        .on_topology_change(TopologyVersion(1), snapshot(&[A, B, C]), None)
        .unwrap();

    let orders = processor
        .facade::<u64>("orders", Arc::new(DefaultAffinityKeyMapper))
        .unwrap();
    let parts = orders.partitions_for(A).unwrap();
    assert_eq!(parts.all.len(), parts.primary.len() + parts.backup.len());

    let total: usize = [A, B, C]
        .iter()
        .map(|n| orders.primary_partitions(*n).unwrap().len())
        .sum();
    assert_eq!(total, 64);

    processor.stop();
    assert_eq!(orders.primary_node(&7).unwrap_err(), Error::NotActive);
}

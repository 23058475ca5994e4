//! Readers racing a single writer.

use affinity::{AffinityAssignmentCache, AffinityConfig, AffinityFacade, DefaultAffinityKeyMapper, LivenessGate};
use corelib::{ClusterNode, Error, NodeId, TopologySnapshot, TopologyVersion};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const PARTITIONS: u32 = 64;

fn snapshot(ids: &[u128]) -> TopologySnapshot {
    TopologySnapshot::new(
        ids.iter()
            .map(|&i| ClusterNode::new(NodeId(i), i as u64, format!("n{i}")))
            .collect(),
    )
    .unwrap()
}

#[test]
fn test_readers_never_see_partial_tables() {
    let cache = Arc::new(AffinityAssignmentCache::new("race", &AffinityConfig::new(PARTITIONS, 1)).unwrap());
    cache
        .on_topology_change(TopologyVersion(1), snapshot(&[1, 2, 3]), None)
        .unwrap();
    let done = AtomicBool::new(false);

    crossbeam::scope(|s| {
        for _ in 0..4 {
            s.spawn(|_| {
                let mut last_seen = TopologyVersion(0);
                while !done.load(Ordering::Acquire) {
                    let Some(latest) = cache.latest() else { continue };
                    // Published versions only move forward.
                    assert!(latest.version() >= last_seen);
                    last_seen = latest.version();

                    assert_eq!(latest.partition_count(), PARTITIONS);
                    for (_, owners) in latest.iter() {
                        assert_eq!(owners.len(), 2);
                        assert_ne!(owners[0], owners[1]);
                    }
                }
            });
        }

        s.spawn(|_| {
            let shapes: [Vec<u128>; 4] = [vec![1, 2, 3], vec![1, 2, 3, 4], vec![2, 3, 4], vec![2, 3]];
            for v in 2..=200u64 {
                let ids = &shapes[(v % shapes.len() as u64) as usize];
                cache
                    .on_topology_change(TopologyVersion(v), snapshot(ids), None)
                    .unwrap();
            }
            done.store(true, Ordering::Release);
        });
    })
    .unwrap();

    assert_eq!(cache.latest_version(), Some(TopologyVersion(200)));
}

#[test]
fn test_concurrent_writers_are_serialized() {
    let cache = Arc::new(AffinityAssignmentCache::new("writers", &AffinityConfig::new(PARTITIONS, 0)).unwrap());
    cache
        .on_topology_change(TopologyVersion(1), snapshot(&[1, 2]), None)
        .unwrap();

    // Several deliveries of the same next version: exactly one computes it.
    let applied = crossbeam::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                s.spawn(|_| {
                    cache
                        .on_topology_change(TopologyVersion(2), snapshot(&[1, 2, 3]), None)
                        .unwrap()
                        .is_applied()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|applied| *applied)
            .count()
    })
    .unwrap();

    assert_eq!(applied, 1);
    assert_eq!(cache.latest_version(), Some(TopologyVersion(2)));
}

#[test]
fn test_stop_during_lookups() {
    let cache = Arc::new(AffinityAssignmentCache::new("stop", &AffinityConfig::new(PARTITIONS, 0)).unwrap());
    cache
        .on_topology_change(TopologyVersion(1), snapshot(&[1, 2]), None)
        .unwrap();
    let gate = Arc::new(LivenessGate::new());
    let facade: AffinityFacade<u64> = AffinityFacade::new(cache, Arc::new(DefaultAffinityKeyMapper), Arc::clone(&gate));

    crossbeam::scope(|s| {
        for t in 0..4u64 {
            let facade = facade.clone();
            s.spawn(move |_| {
                let mut key = t;
                loop {
                    match facade.primary_node(&key) {
                        Ok(owner) => assert!(owner.is_some()),
                        Err(e) => {
                            assert_eq!(e, Error::NotActive);
                            break;
                        }
                    }
                    key += 4;
                }
            });
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
        gate.stop();
    })
    .unwrap();

    assert!(!gate.is_active());
    assert_eq!(gate.active_calls(), 0);
}

//! Event router under changing and concurrent membership.

use corelib::NodeId;
use proptest::prelude::*;
use std::collections::BTreeSet;
use streaming::{EventRouter, RoutableEvent};

struct WordCount {
    word: String,
    count: u64,
}

impl RoutableEvent for WordCount {
    type Key = str;

    fn routing_key(&self) -> &str {
        &self.word
    }
}

#[test]
fn test_custom_event_routes_by_word() {
    let router = EventRouter::new();
    let live = [NodeId(1), NodeId(2), NodeId(3)];

    let first = WordCount { word: "fox".into(), count: 1 };
    let second = WordCount { word: "fox".into(), count: 7 };
    assert_ne!(first.count, second.count);
    assert_eq!(
        router.route(&first, &live).unwrap(),
        router.route(&second, &live).unwrap()
    );
    assert_eq!(router.route(&first, &live).unwrap(), router.route("fox", &live).unwrap());
}

#[test]
fn test_concurrent_callers_with_different_views() {
    let router = EventRouter::with_replicas(16);
    let small = [NodeId(1), NodeId(2)];
    let large = [NodeId(1), NodeId(2), NodeId(3)];

    crossbeam::scope(|s| {
        for t in 0..4u32 {
            let router = &router;
            let view: &[NodeId] = if t % 2 == 0 { &small } else { &large };
            s.spawn(move |_| {
                for i in 0u32..500 {
                    let owner = router.route_key(&(t, i), view).unwrap();
                    assert!(view.contains(&owner));
                }
            });
        }
    })
    .unwrap();

    let members: BTreeSet<NodeId> = router.members().into_iter().collect();
    let small: BTreeSet<NodeId> = small.into_iter().collect();
    let large: BTreeSet<NodeId> = large.into_iter().collect();
    assert!(members == small || members == large);
}

proptest! {
    #[test]
    fn prop_owner_is_live(ids in proptest::collection::btree_set(1u128..500, 1..10), key in any::<u64>()) {
        let router = EventRouter::with_replicas(8);
        let live: Vec<NodeId> = ids.into_iter().map(NodeId).collect();
        let owner = router.route_key(&key, &live).unwrap();
        prop_assert!(live.contains(&owner));
        prop_assert_eq!(router.route_key(&key, &live).unwrap(), owner);
    }
}

//! Node eligibility and backup placement filters.

use corelib::{ClusterNode, Error, NodeHash, NodeHashResolver, Result, TopologySnapshot};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Decides whether a node may own partitions at all (e.g. data nodes only).
pub type NodeFilter = Arc<dyn Fn(&ClusterNode) -> bool + Send + Sync>;

/// Decides whether `candidate` may back up a partition whose primary is `primary`.
pub type BackupFilter = Arc<dyn Fn(&ClusterNode, &ClusterNode) -> bool + Send + Sync>;

/// Eligible members keyed by their ring identity.
pub(crate) type Candidates<'a> = BTreeMap<NodeHash, &'a ClusterNode>;

/// Resolves every eligible member of `snapshot` to its ring identity.
///
/// Two members resolving to the same hash would fight over the same ring
/// positions, so that is rejected rather than silently dropping one.
pub(crate) fn candidates<'a>(
    snapshot: &'a TopologySnapshot,
    resolver: &dyn NodeHashResolver,
    filter: Option<&NodeFilter>,
) -> Result<Candidates<'a>> {
    let mut out = BTreeMap::new();
    for node in snapshot.nodes() {
        if filter.is_some_and(|f| !f(node)) {
            continue;
        }
        let hash = resolver.resolve(node);
        if let Some(other) = out.insert(hash, node) {
            return Err(Error::invalid(format!(
                "nodes {} and {} resolve to the same node hash {hash}",
                other.id, node.id
            )));
        }
    }
    Ok(out)
}

/// Backup rules shared by the shipped functions.
#[derive(Clone, Default)]
pub(crate) struct BackupRules {
    pub exclude_neighbors: bool,
    pub filter: Option<BackupFilter>,
}

impl BackupRules {
    pub fn is_strict(&self) -> bool {
        self.exclude_neighbors || self.filter.is_some()
    }

    /// Whether `candidate` may join `owners` (primary first) as a backup.
    ///
    /// With `exclude_neighbors` set the neighbor rule alone decides and the
    /// backup filter is not consulted.
    pub fn accepts(&self, candidates: &Candidates<'_>, owners: &[NodeHash], candidate: &ClusterNode) -> bool {
        if self.exclude_neighbors {
            return !owners
                .iter()
                .filter_map(|h| candidates.get(h))
                .any(|owner| owner.is_neighbor_of(candidate));
        }
        match (&self.filter, owners.first().and_then(|h| candidates.get(h)).copied()) {
            (Some(filter), Some(primary)) => filter(primary, candidate),
            _ => true,
        }
    }

    /// Only the neighbor rule is relaxed when too few hosts exist; a backup
    /// filter on its own is never overridden.
    pub fn can_relax(&self) -> bool {
        self.exclude_neighbors
    }
}

impl std::fmt::Debug for BackupRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupRules")
            .field("exclude_neighbors", &self.exclude_neighbors)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::{NodeId, NodeIdHashResolver, NameHashResolver};

    fn snapshot() -> TopologySnapshot {
        TopologySnapshot::new(vec![
            ClusterNode::new(NodeId(1), 1, "a").with_host("h1"),
            ClusterNode::new(NodeId(2), 2, "b").with_host("h1"),
            ClusterNode::new(NodeId(3), 3, "c").with_host("h2").with_attribute("role", "client"),
        ])
        .unwrap()
    }

    #[test]
    fn test_candidates_apply_filter() {
        let snap = snapshot();
        let data_only: NodeFilter = Arc::new(|n: &ClusterNode| n.attribute("role") != Some("client"));
        let found = candidates(&snap, &NodeIdHashResolver, Some(&data_only)).unwrap();
        assert_eq!(found.len(), 2);
        assert!(!found.contains_key(&NodeHash(3)));
    }

    #[test]
    fn test_candidates_reject_hash_collisions() {
        let snap = TopologySnapshot::new(vec![
            ClusterNode::new(NodeId(1), 1, "same"),
            ClusterNode::new(NodeId(2), 2, "same"),
        ])
        .unwrap();
        assert!(candidates(&snap, &NameHashResolver, None).is_err());
    }

    #[test]
    fn test_neighbor_rule() {
        let snap = snapshot();
        let found = candidates(&snap, &NodeIdHashResolver, None).unwrap();
        let rules = BackupRules {
            exclude_neighbors: true,
            filter: None,
        };
        let owners = [NodeHash(1)];
        assert!(!rules.accepts(&found, &owners, snap.node(NodeId(2)).unwrap()));
        assert!(rules.accepts(&found, &owners, snap.node(NodeId(3)).unwrap()));
        assert!(rules.can_relax());
    }

    #[test]
    fn test_neighbor_rule_replaces_backup_filter() {
        let snap = snapshot();
        let found = candidates(&snap, &NodeIdHashResolver, None).unwrap();
        let refuse_all: BackupFilter = Arc::new(|_: &ClusterNode, _: &ClusterNode| false);
        let owners = [NodeHash(1)];

        let filter_only = BackupRules {
            exclude_neighbors: false,
            filter: Some(Arc::clone(&refuse_all)),
        };
        assert!(!filter_only.accepts(&found, &owners, snap.node(NodeId(3)).unwrap()));
        assert!(!filter_only.can_relax());

        let both = BackupRules {
            exclude_neighbors: true,
            filter: Some(refuse_all),
        };
        assert!(both.accepts(&found, &owners, snap.node(NodeId(3)).unwrap()));
        assert!(!both.accepts(&found, &owners, snap.node(NodeId(2)).unwrap()));
        assert!(both.can_relax());
    }
}

//! Ring-based affinity function.
//!
//! # Algorithm
//!
//! 1. Resolve every eligible node to its `NodeHash` and keep a ring with one
//!    set of virtual points per node
//! 2. For partition `p`, slot `i` (0 = primary) is routed from the start
//!    point `hash(p, i)`, skipping nodes already chosen and nodes the backup
//!    rules refuse; this repeats until `1 + backups` nodes are found or the
//!    ring runs out of candidates
//! 3. **Stability pass**: if the previous primary of `p` is still eligible,
//!    it stays primary (moved to the front when the fresh ranking demoted it,
//!    inserted when it fell off the list)
//! 4. **Coverage pass**: when there is no previous primary to keep and there
//!    are at least as many partitions as nodes, every node that was routed
//!    no primary takes one partition from the most loaded node
//!
//! Removing one node only changes partitions where that node was routed to.
//! With the stability pass, joins never take a primary away from a node that
//! is still present, so a node joining later only receives backups while the
//! pass is on.
//!
//! # Ties
//!
//! Ring points are ordered by `(token, NodeHash, replica)`, so two nodes
//! landing on the same token are ranked by their `NodeHash`.

use crate::assignment::PartitionId;
use crate::config::AffinityConfig;
use crate::context::AffinityContext;
use crate::function::filter::{self, BackupFilter, BackupRules, Candidates, NodeFilter};
use crate::function::AffinityFunction;
use corelib::ring::DEFAULT_REPLICAS;
use corelib::{ConsistentHashRing, NodeHash, NodeHashResolver, NodeId, NodeIdHashResolver, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

type NodeRing = ConsistentHashRing<NodeHash>;

/// Default affinity function: consistent hash ring plus stability pass.
pub struct RingAffinityFunction {
    replicas: usize,
    sticky_primaries: bool,
    backup_rules: BackupRules,
    resolver: Arc<dyn NodeHashResolver>,
    node_filter: Option<NodeFilter>,
    /// Ring of the last computation; the next one starts from a clone of it.
    ring: Mutex<Option<Arc<NodeRing>>>,
}

impl RingAffinityFunction {
    pub fn new() -> Self {
        Self {
            replicas: DEFAULT_REPLICAS,
            sticky_primaries: true,
            backup_rules: BackupRules::default(),
            resolver: Arc::new(NodeIdHashResolver),
            node_filter: None,
            ring: Mutex::new(None),
        }
    }

    /// Function configured from the ring-related fields of `config`.
    pub fn from_config(config: &AffinityConfig) -> Self {
        Self::new()
            .with_replicas(config.replicas)
            .with_sticky_primaries(config.sticky_primaries)
            .with_exclude_neighbors(config.exclude_neighbors)
    }

    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas.max(1);
        self
    }

    pub fn with_sticky_primaries(mut self, sticky: bool) -> Self {
        self.sticky_primaries = sticky;
        self
    }

    pub fn with_exclude_neighbors(mut self, exclude: bool) -> Self {
        self.backup_rules.exclude_neighbors = exclude;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn NodeHashResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_node_filter(mut self, filter: NodeFilter) -> Self {
        self.node_filter = Some(filter);
        self
    }

    /// Restricts backups by their primary. Not consulted while
    /// exclude-neighbors is on.
    pub fn with_backup_filter(mut self, filter: BackupFilter) -> Self {
        self.backup_rules.filter = Some(filter);
        self
    }

    /// Ring holding exactly `candidates`, derived from the previous one.
    ///
    /// The published ring is never modified: a changed membership clones it,
    /// applies the difference and swaps the clone in.
    fn ring_for(&self, candidates: &Candidates<'_>) -> Arc<NodeRing> {
        let desired = |hash: &NodeHash| -> Option<usize> {
            candidates
                .get(hash)
                .map(|node| node.replicas_override().unwrap_or(self.replicas))
        };

        let mut slot = self.ring.lock();
        if let Some(ring) = slot.as_ref() {
            let same = ring.member_count() == candidates.len()
                && candidates.keys().all(|h| ring.replicas_of(h) == desired(h));
            if same {
                return Arc::clone(ring);
            }
        }

        let mut next = slot.as_deref().cloned().unwrap_or_default();
        let stale: Vec<NodeHash> = next
            .members()
            .filter(|&h| next.replicas_of(h) != desired(h))
            .copied()
            .collect();
        next.remove(stale.iter());
        for (hash, node) in candidates {
            next.add(*hash, node.replicas_override().unwrap_or(self.replicas));
        }

        debug!(
            members = next.member_count(),
            points = next.point_count(),
            removed = stale.len(),
            "rebuilt affinity ring"
        );
        let next = Arc::new(next);
        *slot = Some(Arc::clone(&next));
        next
    }

    /// Fills `owners` (primary already chosen) up to `want` nodes.
    fn fill_backups(
        &self,
        ring: &NodeRing,
        part: PartitionId,
        candidates: &Candidates<'_>,
        want: usize,
        owners: &mut Vec<NodeHash>,
    ) {
        let mut slot = owners.len() as u32;
        while owners.len() < want {
            let next = ring.route(&(part, slot), |h| {
                !owners.contains(h)
                    && candidates
                        .get(h)
                        .is_some_and(|node| self.backup_rules.accepts(candidates, owners.as_slice(), node))
            });
            match next {
                Ok(h) => owners.push(*h),
                Err(_) => break,
            }
            slot += 1;
        }

        // Not enough hosts to keep copies apart: fill from the remaining nodes.
        if owners.len() < want && self.backup_rules.can_relax() {
            while owners.len() < want {
                match ring.route(&(part, slot), |h| !owners.contains(h) && candidates.contains_key(h)) {
                    Ok(h) => owners.push(*h),
                    Err(_) => break,
                }
                slot += 1;
            }
        }
    }

    /// Stability pass. Returns true if the primary was changed.
    fn keep_previous_primary(
        &self,
        ctx: &AffinityContext,
        part: PartitionId,
        eligible: &HashMap<NodeId, NodeHash>,
        want: usize,
        owners: &mut Vec<NodeHash>,
    ) -> bool {
        let Some(prev) = ctx.previous_assignment(part).and_then(|o| o.first()) else {
            return false;
        };
        let Some(&prev_hash) = eligible.get(prev) else {
            return false;
        };
        if owners.first() == Some(&prev_hash) {
            return false;
        }

        if let Some(pos) = owners.iter().position(|h| *h == prev_hash) {
            owners.remove(pos);
        }
        owners.insert(0, prev_hash);
        owners.truncate(want);
        true
    }

    /// Re-checks the backups of `owners` against a replaced primary and tops
    /// the list up again.
    fn revalidate_backups(
        &self,
        ring: &NodeRing,
        part: PartitionId,
        candidates: &Candidates<'_>,
        want: usize,
        owners: &mut Vec<NodeHash>,
    ) {
        if !self.backup_rules.is_strict() {
            return;
        }
        let Some(&primary) = owners.first() else {
            return;
        };
        let mut checked = vec![primary];
        for h in owners.iter().skip(1) {
            if let Some(node) = candidates.get(h) {
                if self.backup_rules.accepts(candidates, &checked, node) {
                    checked.push(*h);
                }
            }
        }
        *owners = checked;
        self.fill_backups(ring, part, candidates, want, owners);
    }

    /// Coverage pass. Returns how many partitions changed primary.
    ///
    /// Each uncovered node (in `NodeHash` order) takes one partition from the
    /// node holding the most primaries, ties going to the lower hash. The
    /// partition given up is the first one the newcomer would win on a ring
    /// holding just the two of them, else the donor's lowest partition.
    fn cover_every_node(
        &self,
        ring: &NodeRing,
        candidates: &Candidates<'_>,
        want: usize,
        table: &mut [Vec<NodeHash>],
    ) -> usize {
        if table.len() < candidates.len() {
            return 0;
        }

        let mut load: BTreeMap<NodeHash, Vec<PartitionId>> =
            candidates.keys().map(|h| (*h, Vec::new())).collect();
        for (part, owners) in table.iter().enumerate() {
            if let Some(parts) = owners.first().and_then(|h| load.get_mut(h)) {
                parts.push(part as PartitionId);
            }
        }
        let uncovered: Vec<NodeHash> = load
            .iter()
            .filter(|(_, parts)| parts.is_empty())
            .map(|(h, _)| *h)
            .collect();

        let mut moved = 0;
        for node in uncovered {
            let Some((donor, parts)) = load
                .iter()
                .max_by(|a, b| a.1.len().cmp(&b.1.len()).then_with(|| b.0.cmp(a.0)))
            else {
                break;
            };
            if parts.len() < 2 {
                break;
            }
            let donor = *donor;
            let Some(part) = parts
                .iter()
                .copied()
                .find(|&p| {
                    ring.route(&(p, 0u32), |h| *h == donor || *h == node)
                        .is_ok_and(|h| *h == node)
                })
                .or_else(|| parts.first().copied())
            else {
                break;
            };

            let Some(owners) = table.get_mut(part as usize) else {
                break;
            };
            owners.retain(|h| *h != node);
            owners.insert(0, node);
            owners.truncate(want);
            self.revalidate_backups(ring, part, candidates, want, owners);

            if let Some(parts) = load.get_mut(&donor) {
                parts.retain(|&p| p != part);
            }
            if let Some(parts) = load.get_mut(&node) {
                parts.push(part);
            }
            moved += 1;
        }
        moved
    }
}

impl Default for RingAffinityFunction {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RingAffinityFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingAffinityFunction")
            .field("replicas", &self.replicas)
            .field("sticky_primaries", &self.sticky_primaries)
            .field("backup_rules", &self.backup_rules)
            .field("resolver", &self.resolver)
            .field("node_filter", &self.node_filter.is_some())
            .finish()
    }
}

impl AffinityFunction for RingAffinityFunction {
    fn assign_partitions(&self, ctx: &AffinityContext) -> Result<Vec<Vec<NodeId>>> {
        let parts = ctx.partitions();
        let candidates = filter::candidates(
            ctx.current_topology_snapshot(),
            self.resolver.as_ref(),
            self.node_filter.as_ref(),
        )?;

        if candidates.is_empty() {
            debug!(version = %ctx.topology_version(), "no eligible nodes, every partition is unowned");
            return Ok(vec![Vec::new(); parts as usize]);
        }

        let ring = self.ring_for(&candidates);
        let want = ctx.backups().saturating_add(1).min(candidates.len());
        let eligible: HashMap<NodeId, NodeHash> =
            candidates.iter().map(|(h, node)| (node.id, *h)).collect();

        let mut table: Vec<Vec<NodeHash>> = Vec::with_capacity(parts as usize);
        let mut kept = 0usize;
        for part in 0..parts {
            let mut owners = Vec::with_capacity(want);
            owners.push(*ring.route(&(part, 0u32), |h| candidates.contains_key(h))?);
            self.fill_backups(&ring, part, &candidates, want, &mut owners);

            if self.sticky_primaries && self.keep_previous_primary(ctx, part, &eligible, want, &mut owners) {
                kept += 1;
                self.revalidate_backups(&ring, part, &candidates, want, &mut owners);
            }
            table.push(owners);
        }

        let bootstrap = ctx
            .previous()
            .map_or(true, |prev| prev.table().iter().all(Vec::is_empty));
        let covered = if bootstrap {
            self.cover_every_node(&ring, &candidates, want, &mut table)
        } else {
            0
        };

        let table: Vec<Vec<NodeId>> = table
            .iter()
            .map(|owners| owners.iter().map(|h| candidates[h].id).collect())
            .collect();

        debug!(
            version = %ctx.topology_version(),
            partitions = parts,
            nodes = candidates.len(),
            copies = want,
            kept_primaries = kept,
            covered,
            "ring assignment computed"
        );
        Ok(table)
    }

    fn name(&self) -> &'static str {
        "RingAffinityFunction"
    }
}

//! Highest-random-weight (rendezvous) affinity function.
//!
//! Every eligible node gets a weight per partition, `hash(node_hash, part)`.
//! Nodes are ranked by ascending `(weight, node_hash)`; the first is the
//! primary and backups are taken down the ranking. A join or a leave only
//! affects partitions where the changed node ranks within the first
//! `1 + backups` positions.
//!
//! No ring is kept between calls, so this function needs no previous
//! assignment and no stability pass.

use crate::context::AffinityContext;
use crate::function::filter::{self, BackupFilter, BackupRules, NodeFilter};
use crate::function::AffinityFunction;
use corelib::{
    NodeHash, NodeHashResolver, NodeId, NodeIdHashResolver, Partitioner, Result, Xxh3Partitioner,
};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub struct RendezvousAffinityFunction {
    backup_rules: BackupRules,
    resolver: Arc<dyn NodeHashResolver>,
    node_filter: Option<NodeFilter>,
}

impl RendezvousAffinityFunction {
    pub fn new() -> Self {
        Self {
            backup_rules: BackupRules::default(),
            resolver: Arc::new(NodeIdHashResolver),
            node_filter: None,
        }
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

    /// Ignored while exclude-neighbors is on.
    pub fn with_backup_filter(mut self, filter: BackupFilter) -> Self {
        self.backup_rules.filter = Some(filter);
        self
    }

    fn weight(node: NodeHash, part: u32) -> u64 {
        Xxh3Partitioner.token_of(&(node, part)).0
    }
}

impl Default for RendezvousAffinityFunction {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RendezvousAffinityFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendezvousAffinityFunction")
            .field("backup_rules", &self.backup_rules)
            .field("resolver", &self.resolver)
            .field("node_filter", &self.node_filter.is_some())
            .finish()
    }
}

impl AffinityFunction for RendezvousAffinityFunction {
    fn assign_partitions(&self, ctx: &AffinityContext) -> Result<Vec<Vec<NodeId>>> {
        let parts = ctx.partitions();
        let candidates = filter::candidates(
            ctx.current_topology_snapshot(),
            self.resolver.as_ref(),
            self.node_filter.as_ref(),
        )?;
        let want = ctx.backups().saturating_add(1).min(candidates.len());

        let mut table = Vec::with_capacity(parts as usize);
        let mut ranked: Vec<(u64, NodeHash)> = Vec::with_capacity(candidates.len());
        for part in 0..parts {
            ranked.clear();
            ranked.extend(candidates.keys().map(|h| (Self::weight(*h, part), *h)));
            ranked.sort_unstable();

            let mut owners: Vec<NodeHash> = Vec::with_capacity(want);
            if let Some((_, primary)) = ranked.first() {
                owners.push(*primary);
            }
            for (_, h) in ranked.iter().skip(1) {
                if owners.len() >= want {
                    break;
                }
                if self.backup_rules.accepts(&candidates, &owners, candidates[h]) {
                    owners.push(*h);
                }
            }
            if owners.len() < want && self.backup_rules.can_relax() {
                for (_, h) in ranked.iter().skip(1) {
                    if owners.len() >= want {
                        break;
                    }
                    if !owners.contains(h) {
                        owners.push(*h);
                    }
                }
            }

            table.push(owners.iter().map(|h| candidates[h].id).collect());
        }

        debug!(
            version = %ctx.topology_version(),
            partitions = parts,
            nodes = candidates.len(),
            copies = want,
            "rendezvous assignment computed"
        );
        Ok(table)
    }

    fn name(&self) -> &'static str {
        "RendezvousAffinityFunction"
    }
}

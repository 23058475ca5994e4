//! User-facing affinity lookups.
//!
//! Every method enters the liveness gate first and fails with
//! [`Error::NotActive`] once the owning context is stopped. Lookups read the
//! latest published assignment; [`AffinityFacade::at_version`] pins one.
//!
//! While nothing is published (or the topology is empty) partitions have no
//! owner: `primary_node` returns `Ok(None)` and list lookups return empty
//! lists.

use crate::assignment::{Assignment, NodePartitions, PartitionId};
use crate::cache::{AffinityAssignmentCache, VersionedAssignment};
use crate::gate::SharedGate;
use crate::mapper::AffinityKeyMapper;
use corelib::{Error, NodeId, Partitioner, Result, TopologyVersion, Xxh3Partitioner};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct AffinityFacade<K> {
    cache: Arc<AffinityAssignmentCache>,
    mapper: Arc<dyn AffinityKeyMapper<K>>,
    partitioner: Xxh3Partitioner,
    gate: SharedGate,
}

impl<K> Clone for AffinityFacade<K> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            mapper: Arc::clone(&self.mapper),
            partitioner: self.partitioner,
            gate: Arc::clone(&self.gate),
        }
    }
}

impl<K> std::fmt::Debug for AffinityFacade<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AffinityFacade")
            .field("cache", &self.cache.name())
            .field("active", &self.gate.is_active())
            .finish()
    }
}

impl<K> AffinityFacade<K> {
    pub fn new(
        cache: Arc<AffinityAssignmentCache>,
        mapper: Arc<dyn AffinityKeyMapper<K>>,
        gate: SharedGate,
    ) -> Self {
        Self {
            cache,
            mapper,
            partitioner: Xxh3Partitioner,
            gate,
        }
    }

    pub fn cache(&self) -> &Arc<AffinityAssignmentCache> {
        &self.cache
    }

    /// Fixed partition count of the cache.
    pub fn partitions(&self) -> Result<u32> {
        let _guard = self.gate.enter()?;
        Ok(self.cache.partitions())
    }

    /// Stable encoding of the affinity key of `key`.
    pub fn affinity_key_bytes(&self, key: &K) -> Result<Vec<u8>> {
        let _guard = self.gate.enter()?;
        Ok(self.mapper.affinity_key_bytes(key))
    }

    /// `hash(affinity_key(key)) mod partitions`. Independent of topology.
    pub fn partition(&self, key: &K) -> Result<PartitionId> {
        let _guard = self.gate.enter()?;
        Ok(self.partition_of(key))
    }

    fn partition_of(&self, key: &K) -> PartitionId {
        let bytes = self.mapper.affinity_key_bytes(key);
        self.partitioner.partition_index(&bytes, self.cache.partitions())
    }

    fn check_partition(&self, part: PartitionId) -> Result<()> {
        if part >= self.cache.partitions() {
            return Err(Error::invalid(format!(
                "partition {part} out of range [0, {})",
                self.cache.partitions()
            )));
        }
        Ok(())
    }

    fn owners(assignment: Option<&Assignment>, part: PartitionId) -> Result<&[NodeId]> {
        match assignment {
            Some(a) => a.nodes(part),
            None => Ok(&[]),
        }
    }

    pub fn primary_node(&self, key: &K) -> Result<Option<NodeId>> {
        let _guard = self.gate.enter()?;
        let latest = self.cache.latest();
        Ok(Self::owners(latest.as_deref(), self.partition_of(key))?.first().copied())
    }

    pub fn backup_nodes(&self, key: &K) -> Result<Vec<NodeId>> {
        let _guard = self.gate.enter()?;
        let latest = self.cache.latest();
        let owners = Self::owners(latest.as_deref(), self.partition_of(key))?;
        Ok(owners.get(1..).unwrap_or(&[]).to_vec())
    }

    /// Primary followed by backups.
    pub fn all_nodes(&self, key: &K) -> Result<Vec<NodeId>> {
        let _guard = self.gate.enter()?;
        let latest = self.cache.latest();
        Ok(Self::owners(latest.as_deref(), self.partition_of(key))?.to_vec())
    }

    pub fn is_primary(&self, node: NodeId, key: &K) -> Result<bool> {
        Ok(self.primary_node(key)? == Some(node))
    }

    pub fn is_backup(&self, node: NodeId, key: &K) -> Result<bool> {
        Ok(self.backup_nodes(key)?.contains(&node))
    }

    pub fn is_primary_or_backup(&self, node: NodeId, key: &K) -> Result<bool> {
        Ok(self.all_nodes(key)?.contains(&node))
    }

    /// Primary owner of `key`.
    pub fn map_key_to_node(&self, key: &K) -> Result<Option<NodeId>> {
        self.primary_node(key)
    }

    /// Groups keys by primary owner. Keys without an owner are left out, so
    /// an empty topology yields an empty map.
    pub fn map_keys_to_nodes<I>(&self, keys: I) -> Result<BTreeMap<NodeId, Vec<K>>>
    where
        I: IntoIterator<Item = K>,
    {
        let _guard = self.gate.enter()?;
        let mut grouped: BTreeMap<NodeId, Vec<K>> = BTreeMap::new();
        let Some(latest) = self.cache.latest() else {
            return Ok(grouped);
        };
        for key in keys {
            if let Some(primary) = latest.primary(self.partition_of(&key))? {
                grouped.entry(primary).or_default().push(key);
            }
        }
        Ok(grouped)
    }

    pub fn map_key_to_primary_and_backups(&self, key: &K) -> Result<Vec<NodeId>> {
        self.all_nodes(key)
    }

    pub fn map_partition_to_node(&self, part: PartitionId) -> Result<Option<NodeId>> {
        let _guard = self.gate.enter()?;
        self.check_partition(part)?;
        let latest = self.cache.latest();
        Ok(Self::owners(latest.as_deref(), part)?.first().copied())
    }

    /// Primary of each partition that has one.
    pub fn map_partitions_to_nodes<I>(&self, parts: I) -> Result<BTreeMap<PartitionId, NodeId>>
    where
        I: IntoIterator<Item = PartitionId>,
    {
        let _guard = self.gate.enter()?;
        let latest = self.cache.latest();
        let mut mapped = BTreeMap::new();
        for part in parts {
            self.check_partition(part)?;
            if let Some(primary) = Self::owners(latest.as_deref(), part)?.first() {
                mapped.insert(part, *primary);
            }
        }
        Ok(mapped)
    }

    pub fn map_partition_to_primary_and_backups(&self, part: PartitionId) -> Result<Vec<NodeId>> {
        let _guard = self.gate.enter()?;
        self.check_partition(part)?;
        let latest = self.cache.latest();
        Ok(Self::owners(latest.as_deref(), part)?.to_vec())
    }

    /// Inverse lookup over the latest assignment (linear scan).
    pub fn partitions_for(&self, node: NodeId) -> Result<NodePartitions> {
        let _guard = self.gate.enter()?;
        Ok(self
            .cache
            .latest()
            .map(|a| a.partitions_for(node))
            .unwrap_or_default())
    }

    pub fn primary_partitions(&self, node: NodeId) -> Result<Vec<PartitionId>> {
        Ok(self.partitions_for(node)?.primary)
    }

    pub fn backup_partitions(&self, node: NodeId) -> Result<Vec<PartitionId>> {
        Ok(self.partitions_for(node)?.backup)
    }

    pub fn all_partitions(&self, node: NodeId) -> Result<Vec<PartitionId>> {
        Ok(self.partitions_for(node)?.all)
    }

    /// Latest published topology version, `None` before the first one.
    pub fn topology_version(&self) -> Result<Option<TopologyVersion>> {
        let _guard = self.gate.enter()?;
        Ok(self.cache.latest_version())
    }

    /// Lookups pinned to `version`, for operations that must not observe a
    /// topology change midway. See [`AffinityAssignmentCache::assignment`]
    /// for how evicted versions are served.
    pub fn at_version(&self, version: TopologyVersion) -> Result<PinnedAffinity<'_, K>> {
        let _guard = self.gate.enter()?;
        Ok(PinnedAffinity {
            facade: self,
            pinned: self.cache.assignment(version)?,
        })
    }
}

/// Facade view of a single assignment version.
pub struct PinnedAffinity<'a, K> {
    facade: &'a AffinityFacade<K>,
    pinned: VersionedAssignment,
}

impl<K> PinnedAffinity<'_, K> {
    /// Version actually served.
    pub fn version(&self) -> TopologyVersion {
        self.pinned.version()
    }

    pub fn is_coerced(&self) -> bool {
        self.pinned.is_coerced()
    }

    pub fn assignment(&self) -> &Arc<Assignment> {
        self.pinned.assignment()
    }

    /// Fails with [`Error::StaleVersionCoerced`] if a newer version than
    /// requested is being served.
    pub fn strict(self) -> Result<Self> {
        if let Some(requested) = self.pinned.coerced_from() {
            return Err(Error::StaleVersionCoerced {
                requested,
                served: self.pinned.version(),
            });
        }
        Ok(self)
    }

    pub fn primary_node(&self, key: &K) -> Result<Option<NodeId>> {
        let _guard = self.facade.gate.enter()?;
        Ok(self.pinned.assignment().primary(self.facade.partition_of(key))?)
    }

    pub fn all_nodes(&self, key: &K) -> Result<Vec<NodeId>> {
        let _guard = self.facade.gate.enter()?;
        Ok(self.pinned.assignment().nodes(self.facade.partition_of(key))?.to_vec())
    }

    pub fn backup_nodes(&self, key: &K) -> Result<Vec<NodeId>> {
        let _guard = self.facade.gate.enter()?;
        Ok(self.pinned.assignment().backups(self.facade.partition_of(key))?.to_vec())
    }
}

//! The in-memory replica inventory: a relational object graph over
//! [`Dataset`], [`Block`], [`File`], [`Site`], [`Group`], [`Partition`], and
//! the two replica kinds, held in arenas keyed by stable handles (section 9,
//! "cyclic graph").
//!
//! The inventory is the sole owner of every entity it holds (section 3,
//! Ownership); callers get references scoped to a borrow of the inventory
//! and must not persist them past it. Mutation happens exclusively through
//! the methods here so the cross-indices on [`Site`] and the derived fields
//! on [`DatasetReplica`] stay consistent (invariants 1, 3, 4, 5, 7).

use std::collections::HashMap;

use dynamo_errors::{DynamoError, DynamoResult};
use tracing::warn;

use crate::block::Block;
use crate::dataset::Dataset;
use crate::file::File;
use crate::group::{Group, OwnershipLevel};
use crate::ids::{BlockHandle, DatasetHandle, GroupHandle, HandleAllocator, Id, PartitionHandle, SiteHandle};
use crate::name::BlockName;
use crate::partition::Partition;
use crate::replica::{BlockReplica, DatasetReplica};
use crate::site::Site;

#[derive(Default)]
pub struct Inventory {
    group_alloc: HandleAllocator,
    site_alloc: HandleAllocator,
    dataset_alloc: HandleAllocator,
    block_alloc: HandleAllocator,
    partition_alloc: HandleAllocator,

    groups: HashMap<GroupHandle, Group>,
    group_by_name: HashMap<Option<String>, GroupHandle>,

    sites: HashMap<SiteHandle, Site>,
    site_by_name: HashMap<String, SiteHandle>,

    datasets: HashMap<DatasetHandle, Dataset>,
    dataset_by_name: HashMap<String, DatasetHandle>,

    blocks: HashMap<BlockHandle, Block>,
    block_by_name: HashMap<(DatasetHandle, BlockName), BlockHandle>,

    files: HashMap<BlockHandle, Vec<File>>,

    partitions: HashMap<PartitionHandle, Partition>,
    partition_by_name: HashMap<String, PartitionHandle>,

    dataset_replicas: HashMap<(DatasetHandle, SiteHandle), DatasetReplica>,
    block_replicas: HashMap<(BlockHandle, SiteHandle), BlockReplica>,
}

impl Inventory {
    pub fn new() -> Self {
        let mut inv = Inventory {
            group_alloc: HandleAllocator::new(),
            site_alloc: HandleAllocator::new(),
            dataset_alloc: HandleAllocator::new(),
            block_alloc: HandleAllocator::new(),
            partition_alloc: HandleAllocator::new(),
            groups: HashMap::new(),
            group_by_name: HashMap::new(),
            sites: HashMap::new(),
            site_by_name: HashMap::new(),
            datasets: HashMap::new(),
            dataset_by_name: HashMap::new(),
            blocks: HashMap::new(),
            block_by_name: HashMap::new(),
            files: HashMap::new(),
            partitions: HashMap::new(),
            partition_by_name: HashMap::new(),
            dataset_replicas: HashMap::new(),
            block_replicas: HashMap::new(),
        };
        inv.get_or_create_group(None, OwnershipLevel::Block);
        inv
    }

    // ---- groups ----

    pub fn get_or_create_group(&mut self, name: Option<String>, olevel: OwnershipLevel) -> GroupHandle {
        if let Some(handle) = self.group_by_name.get(&name) {
            return *handle;
        }
        let handle = self.group_alloc.alloc();
        self.groups.insert(handle, Group::new(handle, name.clone(), olevel));
        self.group_by_name.insert(name, handle);
        handle
    }

    pub fn anonymous_group(&self) -> GroupHandle {
        *self.group_by_name.get(&None).expect("anonymous group always exists")
    }

    pub fn find_group_by_name(&self, name: Option<&str>) -> Option<GroupHandle> {
        self.group_by_name.get(&name.map(str::to_string)).copied()
    }

    pub fn group(&self, handle: GroupHandle) -> Option<&Group> {
        self.groups.get(&handle)
    }

    pub fn group_mut(&mut self, handle: GroupHandle) -> Option<&mut Group> {
        self.groups.get_mut(&handle)
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    // ---- sites ----

    pub fn get_or_create_site(&mut self, name: &str) -> SiteHandle {
        if let Some(handle) = self.site_by_name.get(name) {
            return *handle;
        }
        let handle = self.site_alloc.alloc();
        self.sites.insert(handle, Site::new(handle, name, ""));
        self.site_by_name.insert(name.to_string(), handle);
        handle
    }

    pub fn find_site_by_name(&self, name: &str) -> Option<SiteHandle> {
        self.site_by_name.get(name).copied()
    }

    pub fn site(&self, handle: SiteHandle) -> Option<&Site> {
        self.sites.get(&handle)
    }

    pub fn site_mut(&mut self, handle: SiteHandle) -> Option<&mut Site> {
        self.sites.get_mut(&handle)
    }

    pub fn sites(&self) -> impl Iterator<Item = &Site> {
        self.sites.values()
    }

    // ---- partitions ----

    pub fn get_or_create_partition(&mut self, name: &str) -> PartitionHandle {
        if let Some(handle) = self.partition_by_name.get(name) {
            return *handle;
        }
        let handle = self.partition_alloc.alloc();
        self.partitions.insert(handle, Partition::leaf(handle, name));
        self.partition_by_name.insert(name.to_string(), handle);
        handle
    }

    pub fn partition(&self, handle: PartitionHandle) -> Option<&Partition> {
        self.partitions.get(&handle)
    }

    pub fn partition_mut(&mut self, handle: PartitionHandle) -> Option<&mut Partition> {
        self.partitions.get_mut(&handle)
    }

    pub fn partitions(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.values()
    }

    pub fn set_partition_subpartitions(
        &mut self,
        handle: PartitionHandle,
        subpartitions: std::collections::HashSet<PartitionHandle>,
    ) {
        if let Some(p) = self.partitions.get_mut(&handle) {
            p.subpartitions = Some(subpartitions);
        }
    }

    // ---- datasets ----

    pub fn get_or_create_dataset(&mut self, name: &str) -> DatasetHandle {
        if let Some(handle) = self.dataset_by_name.get(name) {
            return *handle;
        }
        let handle = self.dataset_alloc.alloc();
        self.datasets.insert(handle, Dataset::new(handle, name));
        self.dataset_by_name.insert(name.to_string(), handle);
        handle
    }

    pub fn find_dataset_by_name(&self, name: &str) -> Option<DatasetHandle> {
        self.dataset_by_name.get(name).copied()
    }

    pub fn dataset(&self, handle: DatasetHandle) -> Option<&Dataset> {
        self.datasets.get(&handle)
    }

    pub fn dataset_mut(&mut self, handle: DatasetHandle) -> Option<&mut Dataset> {
        self.datasets.get_mut(&handle)
    }

    pub fn datasets(&self) -> impl Iterator<Item = &Dataset> {
        self.datasets.values()
    }

    /// Cascades to the dataset's blocks, files, dataset replicas, and block
    /// replicas (section 3, Lifecycle). Safe to call on a dataset with no
    /// replicas left (the empty-dataset-removal path of section 4.3.4).
    pub fn delete_dataset(&mut self, handle: DatasetHandle) {
        let Some(dataset) = self.datasets.remove(&handle) else {
            return;
        };
        self.dataset_by_name.remove(&dataset.name);

        for block in dataset.blocks().collect::<Vec<_>>() {
            self.delete_block(block);
        }
        for site in dataset.replica_sites().collect::<Vec<_>>() {
            self.delete_dataset_replica(handle, site);
        }
    }

    // ---- blocks ----

    pub fn get_or_create_block(&mut self, dataset: DatasetHandle, name: BlockName) -> BlockHandle {
        let key = (dataset, name.clone());
        if let Some(handle) = self.block_by_name.get(&key) {
            return *handle;
        }
        let handle = self.block_alloc.alloc();
        self.blocks.insert(handle, Block::new(handle, name, dataset));
        self.block_by_name.insert(key, handle);
        if let Some(d) = self.datasets.get_mut(&dataset) {
            d.insert_block(handle);
        }
        handle
    }

    pub fn find_block_by_name(&self, dataset: DatasetHandle, name: &BlockName) -> Option<BlockHandle> {
        self.block_by_name.get(&(dataset, name.clone())).copied()
    }

    pub fn block(&self, handle: BlockHandle) -> Option<&Block> {
        self.blocks.get(&handle)
    }

    pub fn block_mut(&mut self, handle: BlockHandle) -> Option<&mut Block> {
        self.blocks.get_mut(&handle)
    }

    /// Overwrite a block in place, keeping its handle (used by the
    /// secondary open-block check, section 4.3.4, which "clones" a block
    /// with `is_open = true`).
    pub fn replace_block(&mut self, updated: Block) {
        self.blocks.insert(updated.handle, updated);
    }

    /// Cascades to the block's files and block replicas (section 3,
    /// Lifecycle), updating site indices.
    pub fn delete_block(&mut self, handle: BlockHandle) {
        let Some(block) = self.blocks.remove(&handle) else {
            return;
        };
        self.block_by_name.remove(&(block.dataset, block.name.clone()));
        self.files.remove(&handle);
        if let Some(d) = self.datasets.get_mut(&block.dataset) {
            d.remove_block(handle);
        }
        for site in block.replica_sites().collect::<Vec<_>>() {
            self.delete_block_replica(handle, site);
        }
    }

    /// Recompute `dataset.size`/`dataset.num_files` from its current block
    /// set (invariant 2).
    pub fn recompute_dataset_totals(&mut self, dataset: DatasetHandle) {
        let total: (u64, u32) = self
            .datasets
            .get(&dataset)
            .map(|d| d.blocks().collect::<Vec<_>>())
            .unwrap_or_default()
            .iter()
            .filter_map(|b| self.blocks.get(b))
            .fold((0u64, 0u32), |(size, files), b| (size + b.size, files + b.num_files));
        if let Some(d) = self.datasets.get_mut(&dataset) {
            d.size = total.0;
            d.num_files = total.1;
        }
    }

    // ---- files ----

    pub fn set_files(&mut self, block: BlockHandle, files: Vec<File>) {
        self.files.insert(block, files);
    }

    pub fn files_of(&self, block: BlockHandle) -> &[File] {
        self.files.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn files_of_mut(&mut self, block: BlockHandle) -> &mut [File] {
        self.files.get_mut(&block).map(Vec::as_mut_slice).unwrap_or(&mut [])
    }

    pub fn blocks_with_files(&self) -> impl Iterator<Item = BlockHandle> + '_ {
        self.files.keys().copied()
    }

    // ---- dataset replicas ----

    pub fn dataset_replica(&self, dataset: DatasetHandle, site: SiteHandle) -> Option<&DatasetReplica> {
        self.dataset_replicas.get(&(dataset, site))
    }

    pub fn dataset_replica_mut(
        &mut self,
        dataset: DatasetHandle,
        site: SiteHandle,
    ) -> Option<&mut DatasetReplica> {
        self.dataset_replicas.get_mut(&(dataset, site))
    }

    pub fn dataset_replicas(&self) -> impl Iterator<Item = &DatasetReplica> {
        self.dataset_replicas.values()
    }

    /// Ensure a `DatasetReplica` exists for `(dataset, site)`, linking it
    /// into both the dataset and the site indices if newly created
    /// (invariant 7).
    pub fn ensure_dataset_replica(&mut self, dataset: DatasetHandle, site: SiteHandle) -> &mut DatasetReplica {
        let key = (dataset, site);
        if !self.dataset_replicas.contains_key(&key) {
            self.dataset_replicas.insert(key, DatasetReplica::new(dataset, site));
            if let Some(d) = self.datasets.get_mut(&dataset) {
                d.index_replica(site);
            }
            if let Some(s) = self.sites.get_mut(&site) {
                s.index_dataset_replica(dataset);
            }
        }
        self.dataset_replicas.get_mut(&key).expect("just inserted")
    }

    /// Removes the `DatasetReplica` and every `BlockReplica` for it
    /// (section 3, Lifecycle: "deleting a replica updates the site
    /// indices").
    pub fn delete_dataset_replica(&mut self, dataset: DatasetHandle, site: SiteHandle) {
        let Some(dr) = self.dataset_replicas.remove(&(dataset, site)) else {
            return;
        };
        for block in dr.block_replicas().collect::<Vec<_>>() {
            self.block_replicas.remove(&(block, site));
            if let Some(b) = self.blocks.get_mut(&block) {
                b.deindex_replica(site);
            }
        }
        if let Some(d) = self.datasets.get_mut(&dataset) {
            d.deindex_replica(site);
        }
        if let Some(s) = self.sites.get_mut(&site) {
            s.deindex_dataset_replica(dataset);
        }
    }

    // ---- block replicas ----

    pub fn block_replica(&self, block: BlockHandle, site: SiteHandle) -> Option<&BlockReplica> {
        self.block_replicas.get(&(block, site))
    }

    pub fn block_replicas(&self) -> impl Iterator<Item = &BlockReplica> {
        self.block_replicas.values()
    }

    /// Link a `BlockReplica` into the graph: inserts it, ensures the owning
    /// `DatasetReplica` exists, and updates the block and site indices
    /// (invariant 1, invariant 7).
    pub fn link_block_replica(&mut self, replica: BlockReplica) {
        let (block, site) = (replica.block, replica.site);
        let Some(dataset) = self.blocks.get(&block).map(|b| b.dataset) else {
            warn!(?block, "link_block_replica: block not found, dropping replica");
            return;
        };

        self.ensure_dataset_replica(dataset, site);
        let dr = self.dataset_replicas.get_mut(&(dataset, site)).expect("ensured above");
        dr.insert_block_replica(block);

        if let Some(b) = self.blocks.get_mut(&block) {
            b.index_replica(site);
        }
        if let Some(s) = self.sites.get_mut(&site) {
            s.index_block_replica(dataset, block);
        }
        self.block_replicas.insert((block, site), replica);
    }

    pub fn delete_block_replica(&mut self, block: BlockHandle, site: SiteHandle) {
        let Some(replica) = self.block_replicas.remove(&(block, site)) else {
            return;
        };
        let _ = replica;
        if let Some(b) = self.blocks.get_mut(&block) {
            b.deindex_replica(site);
            let dataset = b.dataset;
            if let Some(dr) = self.dataset_replicas.get_mut(&(dataset, site)) {
                dr.remove_block_replica(block);
            }
            if let Some(s) = self.sites.get_mut(&site) {
                s.deindex_block_replica(dataset, block);
            }
        }
    }

    // ---- invariant maintenance ----

    /// Invariant 3: `is_partial` tracks block-replica count against the
    /// dataset's full block count.
    pub fn recompute_is_partial(&mut self, dataset: DatasetHandle, site: SiteHandle) {
        let num_blocks = self.datasets.get(&dataset).map(Dataset::num_blocks).unwrap_or(0);
        if let Some(dr) = self.dataset_replicas.get_mut(&(dataset, site)) {
            dr.recompute_is_partial(num_blocks);
        }
    }

    /// Invariant 4: `is_complete` is the conjunction of its block replicas'
    /// `is_complete` flags (an empty replica is vacuously complete).
    pub fn recompute_is_complete(&mut self, dataset: DatasetHandle, site: SiteHandle) {
        let all_complete = self
            .dataset_replicas
            .get(&(dataset, site))
            .map(|dr| {
                dr.block_replicas()
                    .all(|b| self.block_replicas.get(&(b, site)).map(|br| br.is_complete).unwrap_or(false))
            })
            .unwrap_or(true);
        if let Some(dr) = self.dataset_replicas.get_mut(&(dataset, site)) {
            dr.is_complete = all_complete;
        }
    }

    /// Invariant 5: `group` collapses to the shared owner of every block
    /// replica, or `None` if they differ (or there are none).
    pub fn recompute_replica_group(&mut self, dataset: DatasetHandle, site: SiteHandle) {
        let group = self.dataset_replicas.get(&(dataset, site)).and_then(|dr| {
            let mut groups = dr
                .block_replicas()
                .filter_map(|b| self.block_replicas.get(&(b, site)))
                .map(|br| br.group);
            let first = groups.next()?;
            if groups.all(|g| g == first) {
                first
            } else {
                None
            }
        });
        if let Some(dr) = self.dataset_replicas.get_mut(&(dataset, site)) {
            dr.group = group;
        }
    }

    /// Invariant 6: a dataset is on tape iff every block has a complete
    /// custodial replica at a mass-storage site.
    pub fn recompute_on_tape(&mut self, dataset: DatasetHandle) {
        let Some(d) = self.datasets.get(&dataset) else { return };
        let all_blocks: std::collections::HashSet<BlockHandle> = d.blocks().collect();
        if all_blocks.is_empty() {
            if let Some(d) = self.datasets.get_mut(&dataset) {
                d.on_tape = false;
            }
            return;
        }
        let on_tape = all_blocks.iter().all(|&block| {
            self.block_replicas.values().any(|br| {
                br.block == block
                    && br.is_complete
                    && br.is_custodial
                    && self.sites.get(&br.site).map(|s| s.storage_type.is_tape()).unwrap_or(false)
            })
        });
        if let Some(d) = self.datasets.get_mut(&dataset) {
            d.on_tape = on_tape;
        }
    }

    /// Section 8: every `BlockReplica` has exactly one matching
    /// `DatasetReplica` that contains it (invariant 1). Intended for test
    /// and post-merge assertions, not the synchronization hot path.
    pub fn check_invariant_1(&self) -> DynamoResult<()> {
        for ((block, site), _replica) in &self.block_replicas {
            let Some(b) = self.blocks.get(block) else {
                return Err(DynamoError::invariant(format!("block replica references unknown block {block:?}")));
            };
            let dr = self.dataset_replicas.get(&(b.dataset, *site)).ok_or_else(|| {
                DynamoError::invariant(format!(
                    "no DatasetReplica for block replica ({block:?}, {site:?})"
                ))
            })?;
            if !dr.has_block_replica(*block) {
                return Err(DynamoError::invariant(format!(
                    "DatasetReplica ({:?},{site:?}) does not list block replica {block:?}",
                    b.dataset
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::BlockName;

    fn sample() -> (Inventory, DatasetHandle, BlockHandle, SiteHandle) {
        let mut inv = Inventory::new();
        let dataset = inv.get_or_create_dataset("/A/B/C");
        let block = inv.get_or_create_block(dataset, BlockName::new("b1"));
        inv.block_mut(block).unwrap().size = 100;
        inv.block_mut(block).unwrap().num_files = 2;
        inv.recompute_dataset_totals(dataset);
        let site = inv.get_or_create_site("T1_US_FNAL");
        (inv, dataset, block, site)
    }

    #[test]
    fn dataset_totals_follow_blocks() {
        let (inv, dataset, _block, _site) = sample();
        assert_eq!(inv.dataset(dataset).unwrap().size, 100);
        assert_eq!(inv.dataset(dataset).unwrap().num_files, 2);
    }

    #[test]
    fn linking_block_replica_creates_dataset_replica_and_indices() {
        let (mut inv, dataset, block, site) = sample();
        let mut br = BlockReplica::new(block, site, 100);
        br.is_complete = true;
        inv.link_block_replica(br);

        let dr = inv.dataset_replica(dataset, site).expect("dataset replica created");
        assert!(dr.has_block_replica(block));
        assert!(inv.site(site).unwrap().has_dataset_replica(dataset));
        assert!(inv.site(site).unwrap().block_replicas_of(dataset).any(|b| b == block));
        assert!(inv.block(block).unwrap().has_replica_at(site));
        inv.check_invariant_1().unwrap();
    }

    #[test]
    fn is_partial_tracks_block_coverage() {
        let mut inv = Inventory::new();
        let dataset = inv.get_or_create_dataset("/A/B/C");
        let b1 = inv.get_or_create_block(dataset, BlockName::new("b1"));
        let _b2 = inv.get_or_create_block(dataset, BlockName::new("b2"));
        let site = inv.get_or_create_site("T1_US_FNAL");
        inv.link_block_replica(BlockReplica::new(b1, site, 1));
        inv.recompute_is_partial(dataset, site);
        assert!(inv.dataset_replica(dataset, site).unwrap().is_partial);
    }

    #[test]
    fn group_collapses_to_none_on_disagreement() {
        let (mut inv, dataset, block, site) = sample();
        let g1 = inv.get_or_create_group(Some("AnalysisOps".into()), OwnershipLevel::Block);
        let mut br = BlockReplica::new(block, site, 100);
        br.group = Some(g1);
        inv.link_block_replica(br);
        inv.recompute_replica_group(dataset, site);
        assert_eq!(inv.dataset_replica(dataset, site).unwrap().group, Some(g1));

        let block2 = inv.get_or_create_block(dataset, BlockName::new("b2"));
        let g2 = inv.get_or_create_group(Some("DataOps".into()), OwnershipLevel::Block);
        let mut br2 = BlockReplica::new(block2, site, 50);
        br2.group = Some(g2);
        inv.link_block_replica(br2);
        inv.recompute_replica_group(dataset, site);
        assert_eq!(inv.dataset_replica(dataset, site).unwrap().group, None);
    }

    #[test]
    fn deleting_dataset_cascades_to_blocks_and_replicas() {
        let (mut inv, dataset, block, site) = sample();
        inv.link_block_replica(BlockReplica::new(block, site, 100));
        inv.delete_dataset(dataset);
        assert!(inv.dataset(dataset).is_none());
        assert!(inv.block(block).is_none());
        assert!(inv.dataset_replica(dataset, site).is_none());
        assert!(!inv.site(site).unwrap().has_dataset_replica(dataset));
    }

    #[test]
    fn unknown_group_keeps_replica_with_none_group() {
        let (mut inv, dataset, block, site) = sample();
        let mut br = BlockReplica::new(block, site, 100);
        br.group = None;
        inv.link_block_replica(br);
        inv.recompute_replica_group(dataset, site);
        assert_eq!(inv.dataset_replica(dataset, site).unwrap().group, None);
        inv.check_invariant_1().unwrap();
    }
}

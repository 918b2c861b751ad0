use std::collections::HashSet;

use crate::ids::{BlockHandle, DatasetHandle, GroupHandle, SiteHandle};

/// Concrete placement of a block at a site, owned by a group.
///
/// `group == None` records a source group unknown to the local group set
/// (section 4.3.3, Merge protocol): the replica is kept, with a warning
/// logged at the point of construction.
#[derive(Clone, Debug)]
pub struct BlockReplica {
    pub block: BlockHandle,
    pub site: SiteHandle,
    pub group: Option<GroupHandle>,
    pub is_complete: bool,
    pub is_custodial: bool,
    pub size: u64,
    pub last_update: i64,
}

impl BlockReplica {
    pub fn new(block: BlockHandle, site: SiteHandle, size: u64) -> Self {
        BlockReplica {
            block,
            site,
            group: None,
            is_complete: false,
            is_custodial: false,
            size,
            last_update: 0,
        }
    }

    /// Section 9 (c): the "is_complete" heuristic the remote catalog uses is
    /// intentionally permissive, guarding against catalogs that occasionally
    /// report a stale `complete` flag for a replica that has in fact not
    /// finished transferring.
    pub fn compute_is_complete(remote_complete: bool, bytes: u64, block_size: u64) -> bool {
        remote_complete || bytes < block_size
    }
}

/// The set of a dataset's block replicas at one site.
#[derive(Clone, Debug)]
pub struct DatasetReplica {
    pub dataset: DatasetHandle,
    pub site: SiteHandle,
    block_replicas: HashSet<BlockHandle>,
    pub is_complete: bool,
    pub is_partial: bool,
    pub is_custodial: bool,
    pub group: Option<GroupHandle>,
    pub last_block_created: i64,
}

impl DatasetReplica {
    pub fn new(dataset: DatasetHandle, site: SiteHandle) -> Self {
        DatasetReplica {
            dataset,
            site,
            block_replicas: HashSet::new(),
            is_complete: true,
            is_partial: false,
            is_custodial: false,
            group: None,
            last_block_created: 0,
        }
    }

    pub fn block_replicas(&self) -> impl Iterator<Item = BlockHandle> + '_ {
        self.block_replicas.iter().copied()
    }

    pub fn num_block_replicas(&self) -> usize {
        self.block_replicas.len()
    }

    pub fn has_block_replica(&self, block: BlockHandle) -> bool {
        self.block_replicas.contains(&block)
    }

    pub fn insert_block_replica(&mut self, block: BlockHandle) {
        self.block_replicas.insert(block);
    }

    pub fn remove_block_replica(&mut self, block: BlockHandle) {
        self.block_replicas.remove(&block);
    }

    /// Recompute `is_partial` against the dataset's full block count
    /// (invariant 3).
    pub fn recompute_is_partial(&mut self, dataset_num_blocks: usize) {
        self.is_partial = self.block_replicas.len() < dataset_num_blocks;
    }
}

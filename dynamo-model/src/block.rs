use std::collections::HashSet;

use crate::ids::{BlockHandle, DatasetHandle, Id, SiteHandle};
use crate::name::BlockName;

/// An immutable chunk of a dataset, the unit of replication.
///
/// `dataset` is a back-reference, not an ownership edge (section 3,
/// Ownership): the block does not outlive the dataset and must never be
/// read after the owning dataset is removed from the inventory.
#[derive(Clone, Debug)]
pub struct Block {
    pub id: Id,
    pub handle: BlockHandle,
    pub name: BlockName,
    pub dataset: DatasetHandle,
    pub size: u64,
    pub num_files: u32,
    pub is_open: bool,
    pub last_update: i64,
    replica_sites: HashSet<SiteHandle>,
}

impl Block {
    pub fn new(handle: BlockHandle, name: BlockName, dataset: DatasetHandle) -> Self {
        Block {
            id: Id::UNSAVED,
            handle,
            name,
            dataset,
            size: 0,
            num_files: 0,
            is_open: false,
            last_update: 0,
            replica_sites: HashSet::new(),
        }
    }

    /// Clone this block with `is_open` forced to `true`, keeping the same
    /// handle and id so the replacement overwrites the original in the
    /// inventory and in the store (section 4.3.4, secondary open-block
    /// check).
    pub fn cloned_open(&self) -> Block {
        let mut clone = self.clone();
        clone.is_open = true;
        clone
    }

    pub fn replica_sites(&self) -> impl Iterator<Item = SiteHandle> + '_ {
        self.replica_sites.iter().copied()
    }

    pub fn has_replica_at(&self, site: SiteHandle) -> bool {
        self.replica_sites.contains(&site)
    }

    pub fn index_replica(&mut self, site: SiteHandle) {
        self.replica_sites.insert(site);
    }

    pub fn deindex_replica(&mut self, site: SiteHandle) {
        self.replica_sites.remove(&site);
    }
}

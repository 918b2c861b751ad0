use std::collections::{HashMap, HashSet};

use crate::ids::{BlockHandle, DatasetHandle, Id, PartitionHandle, SiteHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageType {
    Disk,
    Mss,
    Buffer,
    Unknown,
}

impl StorageType {
    /// Decode the remote site catalog's storage type string.
    pub fn decode(raw: &str) -> StorageType {
        match raw.to_ascii_lowercase().as_str() {
            "disk" => StorageType::Disk,
            "mss" => StorageType::Mss,
            "buffer" => StorageType::Buffer,
            _ => StorageType::Unknown,
        }
    }

    pub fn is_tape(&self) -> bool {
        matches!(self, StorageType::Mss)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SiteStatus {
    Ready,
    Waitroom,
    Morgue,
    Unknown,
}

/// A quota and a materialized replica-membership cache for one partition at
/// one site. `replicas[dataset] == None` means every block replica of that
/// dataset replica belongs to the partition; `Some(blocks)` means only the
/// listed blocks do.
#[derive(Clone, Debug, Default)]
pub struct SitePartition {
    pub quota_bytes: u64,
    pub replicas: HashMap<DatasetHandle, Option<HashSet<BlockHandle>>>,
}

impl SitePartition {
    pub fn new(quota_bytes: u64) -> Self {
        SitePartition {
            quota_bytes,
            replicas: HashMap::new(),
        }
    }

    pub fn contains_dataset(&self, dataset: DatasetHandle) -> bool {
        self.replicas.contains_key(&dataset)
    }
}

/// A storage endpoint. Index fields (`dataset_replicas`,
/// `block_replicas_by_dataset`) are only ever mutated through the `*_index`
/// methods below so they stay consistent with the replica set that the
/// inventory owns (invariant 7).
#[derive(Clone, Debug)]
pub struct Site {
    pub id: Id,
    pub handle: SiteHandle,
    pub name: String,
    pub host: String,
    pub storage_type: StorageType,
    pub backend: String,
    pub status: SiteStatus,
    dataset_replicas: HashSet<DatasetHandle>,
    block_replicas_by_dataset: HashMap<DatasetHandle, HashSet<BlockHandle>>,
    pub partitions: HashMap<PartitionHandle, SitePartition>,
}

impl Site {
    pub fn new(handle: SiteHandle, name: impl Into<String>, host: impl Into<String>) -> Self {
        Site {
            id: Id::UNSAVED,
            handle,
            name: name.into(),
            host: host.into(),
            storage_type: StorageType::Unknown,
            backend: String::new(),
            status: SiteStatus::Unknown,
            dataset_replicas: HashSet::new(),
            block_replicas_by_dataset: HashMap::new(),
            partitions: HashMap::new(),
        }
    }

    pub fn dataset_replicas(&self) -> impl Iterator<Item = DatasetHandle> + '_ {
        self.dataset_replicas.iter().copied()
    }

    pub fn has_dataset_replica(&self, dataset: DatasetHandle) -> bool {
        self.dataset_replicas.contains(&dataset)
    }

    pub fn block_replicas_of(&self, dataset: DatasetHandle) -> impl Iterator<Item = BlockHandle> + '_ {
        self.block_replicas_by_dataset
            .get(&dataset)
            .into_iter()
            .flatten()
            .copied()
    }

    /// Record that this site now holds a dataset replica. Called by the
    /// inventory when a `DatasetReplica` is linked in; never call directly
    /// without also inserting the `DatasetReplica` itself.
    pub fn index_dataset_replica(&mut self, dataset: DatasetHandle) {
        self.dataset_replicas.insert(dataset);
        self.block_replicas_by_dataset.entry(dataset).or_default();
    }

    pub fn index_block_replica(&mut self, dataset: DatasetHandle, block: BlockHandle) {
        self.block_replicas_by_dataset
            .entry(dataset)
            .or_default()
            .insert(block);
    }

    pub fn deindex_block_replica(&mut self, dataset: DatasetHandle, block: BlockHandle) {
        if let Some(blocks) = self.block_replicas_by_dataset.get_mut(&dataset) {
            blocks.remove(&block);
        }
    }

    pub fn deindex_dataset_replica(&mut self, dataset: DatasetHandle) {
        self.dataset_replicas.remove(&dataset);
        self.block_replicas_by_dataset.remove(&dataset);
    }

    /// Rebuild both indices from scratch for `dataset`, given the current
    /// set of block replicas. Used by the replica-catalog merge (section
    /// 4.3.3), which finalizes one `DatasetReplica` at a time and rebuilds
    /// the index once per replica rather than incrementally.
    pub fn rebuild_indices_for(&mut self, dataset: DatasetHandle, blocks: HashSet<BlockHandle>) {
        self.dataset_replicas.insert(dataset);
        self.block_replicas_by_dataset.insert(dataset, blocks);
    }
}

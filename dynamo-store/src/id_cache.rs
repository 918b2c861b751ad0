//! Small name-to-id caches kept alongside the store connection, mirroring
//! the original implementation's per-entity-kind id caches (section 2 of
//! `SPEC_FULL.md`): incremental saves happen repeatedly for the same
//! handful of datasets/blocks, so a lookup-by-name round trip to the DB is
//! worth avoiding.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct IdCache {
    groups: HashMap<String, u64>,
    sites: HashMap<String, u64>,
    partitions: HashMap<String, u64>,
    datasets: HashMap<String, u64>,
    /// Blocks are only unique within their dataset.
    blocks: HashMap<(u64, String), u64>,
}

impl IdCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(&self, name: &str) -> Option<u64> {
        self.groups.get(name).copied()
    }
    pub fn put_group(&mut self, name: impl Into<String>, id: u64) {
        self.groups.insert(name.into(), id);
    }

    pub fn site(&self, name: &str) -> Option<u64> {
        self.sites.get(name).copied()
    }
    pub fn put_site(&mut self, name: impl Into<String>, id: u64) {
        self.sites.insert(name.into(), id);
    }

    pub fn partition(&self, name: &str) -> Option<u64> {
        self.partitions.get(name).copied()
    }
    pub fn put_partition(&mut self, name: impl Into<String>, id: u64) {
        self.partitions.insert(name.into(), id);
    }

    pub fn dataset(&self, name: &str) -> Option<u64> {
        self.datasets.get(name).copied()
    }
    pub fn put_dataset(&mut self, name: impl Into<String>, id: u64) {
        self.datasets.insert(name.into(), id);
    }

    pub fn block(&self, dataset_id: u64, name: &str) -> Option<u64> {
        self.blocks.get(&(dataset_id, name.to_string())).copied()
    }
    pub fn put_block(&mut self, dataset_id: u64, name: impl Into<String>, id: u64) {
        self.blocks.insert((dataset_id, name.into()), id);
    }

    /// Dropped wholesale after a full save/load, since ids may have been
    /// renumbered by the swap-table pass.
    pub fn clear(&mut self) {
        self.groups.clear();
        self.sites.clear();
        self.partitions.clear();
        self.datasets.clear();
        self.blocks.clear();
    }
}

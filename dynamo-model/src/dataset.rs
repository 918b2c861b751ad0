use std::collections::HashSet;

use crate::ids::{BlockHandle, DatasetHandle, Id, SiteHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DatasetStatus {
    Valid,
    Production,
    Unknown,
    Invalid,
    Deprecated,
    Ignored,
}

impl DatasetStatus {
    pub fn decode(raw: &str) -> DatasetStatus {
        match raw.to_ascii_uppercase().as_str() {
            "VALID" => DatasetStatus::Valid,
            "PRODUCTION" => DatasetStatus::Production,
            "INVALID" => DatasetStatus::Invalid,
            "DEPRECATED" => DatasetStatus::Deprecated,
            "IGNORED" => DatasetStatus::Ignored,
            _ => DatasetStatus::Unknown,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Unknown,
    Data,
    Mc,
    Test,
}

impl DataType {
    pub fn decode(raw: &str) -> DataType {
        match raw.to_ascii_lowercase().as_str() {
            "data" => DataType::Data,
            "mc" => DataType::Mc,
            "test" => DataType::Test,
            _ => DataType::Unknown,
        }
    }
}

/// `cycle.major.minor[_suffix]`, e.g. `CMSSW_10_6_2_patch1`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SoftwareVersion {
    pub cycle: u32,
    pub major: u32,
    pub minor: u32,
    pub suffix: Option<String>,
}

impl SoftwareVersion {
    /// Parse a release string of the form `cycle_major_minor[_suffix]` (the
    /// dataset-catalog release list uses underscores; the dotted form in the
    /// spec's glossary is the display form).
    pub fn parse(raw: &str) -> Option<SoftwareVersion> {
        let mut parts = raw.splitn(4, '_');
        let cycle = parts.next()?.parse().ok()?;
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let suffix = parts.next().map(str::to_string);
        Some(SoftwareVersion {
            cycle,
            major,
            minor,
            suffix,
        })
    }
}

/// A logical collection of blocks identified by a three-level path
/// (`/primary/processed/tier`).
#[derive(Clone, Debug)]
pub struct Dataset {
    pub id: Id,
    pub handle: DatasetHandle,
    pub name: String,
    pub size: u64,
    pub num_files: u32,
    pub status: DatasetStatus,
    pub data_type: DataType,
    pub software_version: Option<SoftwareVersion>,
    pub last_update: i64,
    pub is_open: bool,
    pub on_tape: bool,
    blocks: HashSet<BlockHandle>,
    replica_sites: HashSet<SiteHandle>,
}

impl Dataset {
    pub fn new(handle: DatasetHandle, name: impl Into<String>) -> Self {
        Dataset {
            id: Id::UNSAVED,
            handle,
            name: name.into(),
            size: 0,
            num_files: 0,
            status: DatasetStatus::Unknown,
            data_type: DataType::Unknown,
            software_version: None,
            last_update: 0,
            is_open: false,
            on_tape: false,
            blocks: HashSet::new(),
            replica_sites: HashSet::new(),
        }
    }

    pub fn blocks(&self) -> impl Iterator<Item = BlockHandle> + '_ {
        self.blocks.iter().copied()
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn has_block(&self, block: BlockHandle) -> bool {
        self.blocks.contains(&block)
    }

    pub fn insert_block(&mut self, block: BlockHandle) {
        self.blocks.insert(block);
    }

    pub fn remove_block(&mut self, block: BlockHandle) {
        self.blocks.remove(&block);
    }

    pub fn clear_blocks(&mut self) {
        self.blocks.clear();
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

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn software_version_parses_cycle_major_minor_suffix() {
        let v = SoftwareVersion::parse("10_6_2_patch1").unwrap();
        assert_eq!(v.cycle, 10);
        assert_eq!(v.major, 6);
        assert_eq!(v.minor, 2);
        assert_eq!(v.suffix.as_deref(), Some("patch1"));
    }

    #[test]
    fn software_version_without_suffix() {
        let v = SoftwareVersion::parse("10_6_2").unwrap();
        assert_eq!(v.suffix, None);
    }

    #[test]
    fn software_version_rejects_malformed_input() {
        assert!(SoftwareVersion::parse("garbage").is_none());
    }
}

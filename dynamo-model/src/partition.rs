use std::collections::HashSet;

use crate::ids::PartitionHandle;

/// A named subset of block replicas. Leaf partitions (`subpartitions ==
/// None`) are defined directly by a predicate evaluated in the policy
/// engine; non-leaf partitions are strict unions of their subpartitions'
/// membership, per the open question in section 9 (d) of the spec.
#[derive(Clone, Debug)]
pub struct Partition {
    pub handle: PartitionHandle,
    pub name: String,
    pub subpartitions: Option<HashSet<PartitionHandle>>,
}

impl Partition {
    pub fn leaf(handle: PartitionHandle, name: impl Into<String>) -> Self {
        Partition {
            handle,
            name: name.into(),
            subpartitions: None,
        }
    }

    pub fn union_of(
        handle: PartitionHandle,
        name: impl Into<String>,
        subpartitions: HashSet<PartitionHandle>,
    ) -> Self {
        Partition {
            handle,
            name: name.into(),
            subpartitions: Some(subpartitions),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.subpartitions.is_none()
    }
}

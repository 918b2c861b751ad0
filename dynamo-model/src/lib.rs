//! The replica inventory data model (section 3 of the spec): entities,
//! cross-indices, and the invariants that tie them together.

pub mod block;
pub mod dataset;
pub mod file;
pub mod group;
pub mod ids;
pub mod inventory;
pub mod name;
pub mod partition;
pub mod replica;
pub mod site;

pub use block::Block;
pub use dataset::{DataType, Dataset, DatasetStatus, SoftwareVersion};
pub use file::File;
pub use group::{Group, OwnershipLevel};
pub use ids::{BlockHandle, DatasetHandle, GroupHandle, Id, PartitionHandle, SiteHandle};
pub use inventory::Inventory;
pub use name::{glob_match, passes_filter, BlockName, ExternalBlockName};
pub use partition::Partition;
pub use replica::{BlockReplica, DatasetReplica};
pub use site::{Site, SitePartition, SiteStatus, StorageType};

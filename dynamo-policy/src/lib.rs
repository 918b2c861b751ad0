//! The partitioned rule engine over the replica graph (section 4.6): Detox
//! eviction, Enforcer/Dealer replication, and the copy/deletion submission
//! interface that turns their decisions into remote requests (section 4.7).

pub mod dealer;
pub mod detox;
pub mod enforcer;
pub mod partition;
pub mod submission;

pub use partition::{MembershipPredicate, PartitionDef};

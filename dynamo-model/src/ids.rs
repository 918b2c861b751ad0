//! Stable local handles into the [`Inventory`](crate::inventory::Inventory)
//! arenas, plus the `Id` newtype used for the persisted SQL row id.
//!
//! Handles are distinct from persisted ids: a handle is assigned the moment
//! an entity is constructed in memory and never changes or gets reused for
//! the lifetime of the process, while `Id` tracks the row in the backing
//! store and is `0` until the entity is first saved (invariant 9 of the
//! data model).

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

macro_rules! handle_type {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }
    };
}

handle_type!(DatasetHandle);
handle_type!(BlockHandle);
handle_type!(SiteHandle);
handle_type!(GroupHandle);
handle_type!(PartitionHandle);

/// Monotonic allocator for one handle type. Each [`Inventory`](crate::inventory::Inventory)
/// owns one per entity kind.
#[derive(Debug, Default)]
pub struct HandleAllocator(AtomicU32);

impl HandleAllocator {
    pub fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn alloc<H: FromRaw>(&self) -> H {
        H::from_raw(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// Implemented by every handle type so [`HandleAllocator::alloc`] can be generic.
pub trait FromRaw {
    fn from_raw(raw: u32) -> Self;
}

macro_rules! impl_from_raw {
    ($name:ident) => {
        impl FromRaw for $name {
            fn from_raw(raw: u32) -> Self {
                $name(raw)
            }
        }
    };
}

impl_from_raw!(DatasetHandle);
impl_from_raw!(BlockHandle);
impl_from_raw!(SiteHandle);
impl_from_raw!(GroupHandle);
impl_from_raw!(PartitionHandle);

/// A persisted-store row id. `0` means "unsaved" (invariant 9).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Id(pub u64);

impl Id {
    pub const UNSAVED: Id = Id(0);

    pub fn is_saved(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.0)
    }
}

impl From<u64> for Id {
    fn from(v: u64) -> Self {
        Id(v)
    }
}

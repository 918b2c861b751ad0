use crate::ids::{GroupHandle, Id};

/// The level at which a group's ownership is tracked. Most groups own at
/// block granularity; a handful of legacy groups are recorded as owning
/// entire datasets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OwnershipLevel {
    Dataset,
    Block,
}

/// An ownership principal recorded on block replicas. `name == None` is the
/// anonymous "unowned" group every site and block replica falls back to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Group {
    pub id: Id,
    pub handle: GroupHandle,
    pub name: Option<String>,
    pub olevel: OwnershipLevel,
}

impl Group {
    pub fn new(handle: GroupHandle, name: Option<String>, olevel: OwnershipLevel) -> Self {
        Group {
            id: Id::UNSAVED,
            handle,
            name,
            olevel,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.name.is_none()
    }
}

//! Identifier handles used throughout the instruction stream.

use std::fmt;

/// Unique handle for any named entity in a module.
///
/// Allocated monotonically by [`crate::Module`], never reused. The zero
/// value is reserved as the null/absent sentinel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl ObjectId {
    /// The null/absent identifier.
    pub const NULL: ObjectId = ObjectId(0);

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Canonical handle for an interned type shape.
///
/// Two structurally equal [`crate::Storages`] values share one ref.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageRef(pub u64);

impl StorageRef {
    /// The null/absent reference.
    pub const NULL: StorageRef = StorageRef(0);

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for StorageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

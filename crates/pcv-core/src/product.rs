//! Product catalog entries (resource shapes).

use serde::{Deserialize, Serialize};

/// Multi-attribute shape descriptor.
///
/// Products are compared attribute-wise; there is no single scalar size.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Product {
    /// Provider product identifier.
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub cpu_count: u32,
    pub memory_mb: u64,
    /// Primary (root volume) storage.
    pub root_volume_gb: u64,
}

impl Product {
    #[must_use]
    pub fn new(id: impl Into<String>, cpu_count: u32, memory_mb: u64, root_volume_gb: u64) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            cpu_count,
            memory_mb,
            root_volume_gb,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Returns true if `self` is strictly larger than `other`: more compute
    /// or more memory, and more primary storage.
    #[must_use]
    pub const fn is_larger_than(&self, other: &Self) -> bool {
        (self.cpu_count > other.cpu_count || self.memory_mb > other.memory_mb)
            && self.root_volume_gb > other.root_volume_gb
    }

    /// Attribute-wise dual of [`Product::is_larger_than`].
    #[must_use]
    pub const fn is_smaller_than(&self, other: &Self) -> bool {
        (self.cpu_count < other.cpu_count || self.memory_mb < other.memory_mb)
            && self.root_volume_gb < other.root_volume_gb
    }
}

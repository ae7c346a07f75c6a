//! Storage-layer types for hierarchy identity and metadata.
//!
//! [`HierarchyId`] lives here rather than in the hierarchy crate because a
//! hierarchy only gains an ID when persisted.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a stored hierarchy.
///
/// The inner `i64` aligns with SQLite's `INTEGER PRIMARY KEY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HierarchyId(pub i64);

impl fmt::Display for HierarchyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HierarchyId({})", self.0)
    }
}

/// Summary of a stored hierarchy (for listing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchySummary {
    pub id: HierarchyId,
    pub name: String,
    pub directed: bool,
    pub graph_count: usize,
    pub link_count: usize,
}

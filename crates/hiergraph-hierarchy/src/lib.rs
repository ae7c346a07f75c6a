//! Hierarchies of typed graphs linked by homomorphisms.
//!
//! A [`Hierarchy`] owns graphs and the homomorphisms between them. Graphs
//! are edited with [`GraphEdit`]s; the links an edit breaks are repaired by
//! the [`PropagationEngine`]. [`VersionedHierarchy`] adds commits, branches,
//! rollback and branch merges on top.

pub mod edit;
pub mod error;
pub mod hierarchy;
pub mod history;
pub mod merge;
pub mod propagation;

pub use edit::{EdgeDelta, EditOp, EditOutcome, GraphEdit};
pub use error::{HierarchyError, HistoryError};
pub use hierarchy::{GraphSlot, Hierarchy, HierarchyDocument, Link, LinkEntry, LinkSpec, TypingRelation};
pub use history::{Commit, VersionedHierarchy};
pub use propagation::{
    PropagationEngine, PropagationOptions, PropagationReport, RepairDirection, RepairReport,
};

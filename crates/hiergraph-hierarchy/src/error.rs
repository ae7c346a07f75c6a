//! Error types for hierarchy operations and propagation.

use hiergraph_core::{CoreError, GraphId, NodeId};
use indexmap::IndexMap;
use thiserror::Error;
use uuid::Uuid;

/// Errors produced by [`Hierarchy`](crate::Hierarchy) operations and the
/// propagation engine.
///
/// Every failing operation leaves the hierarchy as it was before the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HierarchyError {
    /// The graph id is not part of the hierarchy.
    #[error("unknown graph: '{id}'")]
    UnknownGraph { id: GraphId },

    /// A graph's directedness differs from the hierarchy's.
    #[error("graph '{id}' has directed = {graph_directed}, hierarchy has directed = {hierarchy_directed}")]
    DirectednessMismatch {
        id: GraphId,
        graph_directed: bool,
        hierarchy_directed: bool,
    },

    /// A graph with this id already exists.
    #[error("duplicate graph: '{id}'")]
    DuplicateGraph { id: GraphId },

    /// A homomorphism between these graphs already exists.
    #[error("duplicate homomorphism: '{from}' -> '{to}'")]
    DuplicateLink { from: GraphId, to: GraphId },

    /// No homomorphism between these graphs.
    #[error("no homomorphism '{from}' -> '{to}'")]
    UnknownLink { from: GraphId, to: GraphId },

    /// Adding the homomorphism would close a directed cycle.
    #[error("homomorphism '{from}' -> '{to}' would create a cycle")]
    CycleWouldForm { from: GraphId, to: GraphId },

    /// The homomorphism is awaiting repair after an edit.
    #[error("homomorphism '{from}' -> '{to}' is pending repair")]
    LinkPending { from: GraphId, to: GraphId },

    /// Two reconnection paths would retype the same graph differently.
    #[error("conflicting type conversions for graph '{graph}': {existing:?} vs {incoming:?}")]
    ConflictingConversions {
        graph: GraphId,
        existing: IndexMap<NodeId, NodeId>,
        incoming: IndexMap<NodeId, NodeId>,
    },

    /// A repair step failed and was rolled back.
    #[error("propagation '{from}' -> '{to}' failed: {cause}")]
    PropagationFailed {
        from: GraphId,
        to: GraphId,
        cause: Box<HierarchyError>,
    },

    /// Propagation was cancelled between two repairs.
    #[error("propagation cancelled after {completed} repairs")]
    Cancelled { completed: usize },

    /// Propagation did not reach a fixed point within the repair budget.
    #[error("propagation exceeded {limit} repairs")]
    RepairLimit { limit: usize },

    /// Graph-level or homomorphism-level failure.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Errors produced by [`VersionedHierarchy`](crate::VersionedHierarchy).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("unknown branch: '{name}'")]
    UnknownBranch { name: String },

    #[error("branch already exists: '{name}'")]
    BranchExists { name: String },

    #[error("unknown commit: {id}")]
    UnknownCommit { id: Uuid },

    /// Rollback target is not an ancestor of the current head.
    #[error("commit {id} is not in the history of branch '{branch}'")]
    NotOnBranch { id: Uuid, branch: String },

    #[error("cannot merge branch '{name}' into itself")]
    MergeIntoSelf { name: String },

    /// Both sides of a merge changed the same element differently.
    #[error("merge conflict on {item}")]
    MergeConflict { item: String },

    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),
}

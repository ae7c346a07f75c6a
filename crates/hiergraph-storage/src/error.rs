//! Storage error types for hiergraph-storage.
//!
//! [`StorageError`] covers the failure modes of the storage layer: database
//! and migration errors, serialization, missing rows, and stored data that
//! no longer forms a valid hierarchy.

use hiergraph_core::{CoreError, GraphId};
use hiergraph_hierarchy::HierarchyError;
use thiserror::Error;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// SQLite reported an error.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A schema migration could not be applied.
    #[error("migration error: {0}")]
    Migration(String),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A hierarchy with the given ID was not found.
    #[error("hierarchy not found: {0}")]
    HierarchyNotFound(i64),

    /// Another stored hierarchy already uses this name.
    #[error("hierarchy name already in use: '{0}'")]
    DuplicateHierarchy(String),

    /// A graph was not found in the given hierarchy.
    #[error("graph not found: hierarchy={hierarchy}, graph='{graph}'")]
    GraphNotFound { hierarchy: i64, graph: GraphId },

    /// A link was not found in the given hierarchy.
    #[error("link not found: hierarchy={hierarchy}, link='{from}' -> '{to}'")]
    LinkNotFound {
        hierarchy: i64,
        from: GraphId,
        to: GraphId,
    },

    /// Stored data does not rebuild into a valid hierarchy.
    #[error("invalid stored hierarchy: {0}")]
    Hierarchy(#[from] HierarchyError),
}

impl From<CoreError> for StorageError {
    fn from(err: CoreError) -> Self {
        StorageError::Hierarchy(err.into())
    }
}

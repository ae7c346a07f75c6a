//! Core error types for hiergraph-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering
//! homomorphism validation and the graph mutation primitives.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::NodeId;

/// The homomorphism check that failed.
///
/// Validation runs the checks in declaration order and stops at the first
/// failure, so the reason identifies the earliest violated condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidReason {
    /// The mapping domain differs from the source node set.
    Coverage,
    /// Some image is not a node of the target graph.
    Image,
    /// Some source edge has no image edge in the target.
    Connectivity,
    /// A typed source node maps to a node of a different type.
    Type,
    /// Source node attributes are not included in the image's attributes.
    NodeAttr,
    /// Source edge attributes are not included in the image edge's attributes.
    EdgeAttr,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InvalidReason::Coverage => "coverage",
            InvalidReason::Image => "image",
            InvalidReason::Connectivity => "connectivity",
            InvalidReason::Type => "type",
            InvalidReason::NodeAttr => "node attributes",
            InvalidReason::EdgeAttr => "edge attributes",
        };
        f.write_str(name)
    }
}

/// Core errors produced by the hiergraph-core crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A node mapping failed homomorphism validation.
    #[error("invalid homomorphism ({reason}): {detail}")]
    InvalidHomomorphism {
        reason: InvalidReason,
        detail: String,
    },

    /// Identity construction found a source node absent from the target.
    #[error("node '{node}' has no namesake in the target graph")]
    MissingNode { node: NodeId },

    /// A declared node type disagrees with the node's typing image.
    #[error("typing chain broken at '{node}': declared type '{declared}', image '{image}'")]
    TypingChainBroken {
        node: NodeId,
        declared: NodeId,
        image: NodeId,
    },

    /// A node was not found in the graph.
    #[error("node not found: '{id}'")]
    NodeNotFound { id: NodeId },

    /// A node with this id already exists.
    #[error("duplicate node: '{id}'")]
    DuplicateNode { id: NodeId },

    /// An edge was not found in the graph.
    #[error("edge not found: '{from}' -> '{to}'")]
    EdgeNotFound { from: NodeId, to: NodeId },

    /// An edge between these nodes already exists.
    #[error("duplicate edge: '{from}' -> '{to}'")]
    DuplicateEdge { from: NodeId, to: NodeId },

    /// A merge request was malformed.
    #[error("invalid merge: {reason}")]
    InvalidMerge { reason: String },
}

impl CoreError {
    /// Shorthand for an [`CoreError::InvalidHomomorphism`] error.
    pub fn invalid(reason: InvalidReason, detail: impl Into<String>) -> Self {
        CoreError::InvalidHomomorphism {
            reason,
            detail: detail.into(),
        }
    }

    /// Returns the failed check when this is a validation error.
    pub fn invalid_reason(&self) -> Option<InvalidReason> {
        match self {
            CoreError::InvalidHomomorphism { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

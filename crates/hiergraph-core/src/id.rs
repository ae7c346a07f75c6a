//! Name-based identifier newtypes for graphs and their nodes.
//!
//! Nodes are identified by name rather than by index: typing homomorphisms
//! map a node to the node *named* by its declared type, and identity
//! homomorphisms pair nodes that share a name across two graphs. Both ids
//! are distinct newtypes so a `GraphId` cannot be passed where a `NodeId`
//! is expected.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Node identifier, unique within one graph.
///
/// Node types are also expressed as `NodeId`s: a type is the name of a node
/// in the metamodel graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

/// Graph identifier, unique within one hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphId(pub String);

impl NodeId {
    /// Returns the node name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl GraphId {
    /// Returns the graph name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Display implementations -- just print the inner name.

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(name: &str) -> Self {
        NodeId(name.to_string())
    }
}

impl From<String> for NodeId {
    fn from(name: String) -> Self {
        NodeId(name)
    }
}

impl From<&NodeId> for NodeId {
    fn from(id: &NodeId) -> Self {
        id.clone()
    }
}

impl From<&str> for GraphId {
    fn from(name: &str) -> Self {
        GraphId(name.to_string())
    }
}

impl From<String> for GraphId {
    fn from(name: String) -> Self {
        GraphId(name)
    }
}

impl From<&GraphId> for GraphId {
    fn from(id: &GraphId) -> Self {
        id.clone()
    }
}

// Allows `IndexMap<NodeId, _>::get("name")` lookups without allocating.

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for GraphId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

//! TypedGraph: a named-node graph with optional node types and attribute
//! sets on nodes and edges.
//!
//! The graph is backed by a petgraph `StableGraph` so node and edge indices
//! survive removals, plus an `IndexMap` from node name to index. Iteration
//! over nodes follows insertion order, which keeps every algorithm built on
//! top of the graph deterministic.
//!
//! Edges are always stored in petgraph as directed edges. For undirected
//! graphs an edge is stored once, in whichever orientation it was added,
//! and every lookup accepts both orientations.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use indexmap::IndexMap;
use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::stable_graph::StableGraph;
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::{Directed, Direction};
use serde::{Deserialize, Serialize};

use crate::attrs::Attrs;
use crate::error::CoreError;
use crate::id::{GraphId, NodeId};

/// Payload stored on every petgraph node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeData {
    pub id: NodeId,
    /// Name of the node's type in the metamodel graph, if declared.
    #[serde(rename = "type", default)]
    pub node_type: Option<NodeId>,
    #[serde(default)]
    pub attrs: Attrs,
}

/// Flat edge record used by the serialized form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeData {
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default)]
    pub attrs: Attrs,
}

/// Serialized form of a [`TypedGraph`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default = "default_directed")]
    pub directed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metamodel: Option<GraphId>,
    #[serde(default)]
    pub nodes: Vec<NodeData>,
    #[serde(default)]
    pub edges: Vec<EdgeData>,
}

fn default_directed() -> bool {
    true
}

/// A typed, attributed graph addressed by node name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "GraphDocument", into = "GraphDocument")]
pub struct TypedGraph {
    graph: StableGraph<NodeData, Attrs, Directed, u32>,
    /// Node name to petgraph index, in insertion order.
    index: IndexMap<NodeId, NodeIndex<u32>>,
    directed: bool,
    /// Graph this graph's node types refer to.
    metamodel: Option<GraphId>,
}

impl Default for TypedGraph {
    fn default() -> Self {
        TypedGraph::directed()
    }
}

impl TypedGraph {
    /// Creates an empty graph.
    pub fn new(directed: bool) -> Self {
        TypedGraph {
            graph: StableGraph::default(),
            index: IndexMap::new(),
            directed,
            metamodel: None,
        }
    }

    pub fn directed() -> Self {
        TypedGraph::new(true)
    }

    pub fn undirected() -> Self {
        TypedGraph::new(false)
    }

    pub fn is_directed(&self) -> bool {
        self.directed
    }

    pub fn metamodel(&self) -> Option<&GraphId> {
        self.metamodel.as_ref()
    }

    pub fn set_metamodel(&mut self, metamodel: Option<GraphId>) {
        self.metamodel = metamodel;
    }

    // -----------------------------------------------------------------------
    // Read accessors
    // -----------------------------------------------------------------------

    pub fn node_count(&self) -> usize {
        self.index.len()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn has_node(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    /// Node names in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> + '_ {
        self.index.keys()
    }

    /// Full payload of a node.
    pub fn node(&self, id: &NodeId) -> Option<&NodeData> {
        self.index.get(id).and_then(|&idx| self.graph.node_weight(idx))
    }

    /// Declared type of a node. `None` if the node is untyped or absent.
    pub fn node_type(&self, id: &NodeId) -> Option<&NodeId> {
        self.node(id).and_then(|data| data.node_type.as_ref())
    }

    pub fn node_attrs(&self, id: &NodeId) -> Option<&Attrs> {
        self.node(id).map(|data| &data.attrs)
    }

    /// Position of a node in insertion order.
    pub fn node_position(&self, id: &NodeId) -> Option<usize> {
        self.index.get_index_of(id)
    }

    /// All edges as `(source, target, attrs)` triples.
    pub fn edges(&self) -> impl Iterator<Item = (&NodeId, &NodeId, &Attrs)> + '_ {
        self.graph.edge_references().map(move |edge| {
            (
                &self.graph[edge.source()].id,
                &self.graph[edge.target()].id,
                edge.weight(),
            )
        })
    }

    /// Whether an edge `from -> to` exists. Undirected graphs accept either
    /// orientation.
    pub fn has_edge(&self, from: &NodeId, to: &NodeId) -> bool {
        self.find_edge(from, to).is_some()
    }

    pub fn edge_attrs(&self, from: &NodeId, to: &NodeId) -> Option<&Attrs> {
        self.find_edge(from, to)
            .and_then(|edge| self.graph.edge_weight(edge))
    }

    /// Nodes reachable by one outgoing edge (all neighbors when undirected).
    pub fn successors(&self, id: &NodeId) -> Vec<&NodeId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Nodes with an edge into `id` (all neighbors when undirected).
    pub fn predecessors(&self, id: &NodeId) -> Vec<&NodeId> {
        self.neighbors(id, Direction::Incoming)
    }

    fn neighbors(&self, id: &NodeId, direction: Direction) -> Vec<&NodeId> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<&NodeId> = Vec::new();
        let mut push = |n: NodeIndex<u32>| {
            let name = &self.graph[n].id;
            if !out.contains(&name) {
                out.push(name);
            }
        };
        for n in self.graph.neighbors_directed(idx, direction) {
            push(n);
        }
        if !self.directed {
            for n in self.graph.neighbors_directed(idx, direction.opposite()) {
                push(n);
            }
        }
        out
    }

    // -----------------------------------------------------------------------
    // Mutation primitives
    // -----------------------------------------------------------------------

    /// Adds a node. Fails if the name is taken.
    pub fn add_node(
        &mut self,
        id: impl Into<NodeId>,
        node_type: Option<NodeId>,
        attrs: Attrs,
    ) -> Result<(), CoreError> {
        let id = id.into();
        if self.index.contains_key(&id) {
            return Err(CoreError::DuplicateNode { id });
        }
        let idx = self.graph.add_node(NodeData {
            id: id.clone(),
            node_type,
            attrs,
        });
        self.index.insert(id, idx);
        Ok(())
    }

    /// Removes a node and every edge incident to it.
    pub fn remove_node(&mut self, id: &NodeId) -> Result<NodeData, CoreError> {
        let idx = self
            .index
            .shift_remove(id)
            .ok_or_else(|| CoreError::NodeNotFound { id: id.clone() })?;
        self.graph
            .remove_node(idx)
            .ok_or_else(|| CoreError::NodeNotFound { id: id.clone() })
    }

    /// Adds an edge. Fails on a duplicate (either orientation when
    /// undirected) or a missing endpoint.
    pub fn add_edge(&mut self, from: &NodeId, to: &NodeId, attrs: Attrs) -> Result<(), CoreError> {
        let (a, b) = self.endpoints(from, to)?;
        if self.find_edge(from, to).is_some() {
            return Err(CoreError::DuplicateEdge {
                from: from.clone(),
                to: to.clone(),
            });
        }
        self.graph.add_edge(a, b, attrs);
        Ok(())
    }

    /// Removes an edge and returns its attributes.
    pub fn remove_edge(&mut self, from: &NodeId, to: &NodeId) -> Result<Attrs, CoreError> {
        let edge = self.find_edge(from, to).ok_or_else(|| CoreError::EdgeNotFound {
            from: from.clone(),
            to: to.clone(),
        })?;
        self.graph
            .remove_edge(edge)
            .ok_or_else(|| CoreError::EdgeNotFound {
                from: from.clone(),
                to: to.clone(),
            })
    }

    /// Unions `attrs` into an existing edge. Returns whether the edge
    /// attributes grew.
    pub fn add_edge_attrs(
        &mut self,
        from: &NodeId,
        to: &NodeId,
        attrs: &Attrs,
    ) -> Result<bool, CoreError> {
        let edge = self.find_edge(from, to).ok_or_else(|| CoreError::EdgeNotFound {
            from: from.clone(),
            to: to.clone(),
        })?;
        let weight = self
            .graph
            .edge_weight_mut(edge)
            .ok_or_else(|| CoreError::EdgeNotFound {
                from: from.clone(),
                to: to.clone(),
            })?;
        if attrs.is_subset_of(weight) {
            return Ok(false);
        }
        weight.union_with(attrs);
        Ok(true)
    }

    /// Adds the edge if absent, otherwise unions the attributes into it.
    /// Returns whether anything changed.
    pub fn upsert_edge(&mut self, from: &NodeId, to: &NodeId, attrs: &Attrs) -> Result<bool, CoreError> {
        if self.has_edge(from, to) {
            self.add_edge_attrs(from, to, attrs)
        } else {
            self.add_edge(from, to, attrs.clone())?;
            Ok(true)
        }
    }

    /// Unions `attrs` into a node's attributes.
    pub fn add_node_attrs(&mut self, id: &NodeId, attrs: &Attrs) -> Result<(), CoreError> {
        let data = self.node_mut(id)?;
        data.attrs.union_with(attrs);
        Ok(())
    }

    pub fn set_node_type(&mut self, id: &NodeId, node_type: Option<NodeId>) -> Result<(), CoreError> {
        self.node_mut(id)?.node_type = node_type;
        Ok(())
    }

    /// Renames node types according to `conversions` (old type -> new type).
    ///
    /// Every node is looked up against its type *before* the call, so
    /// `{x -> y, y -> z}` turns `x` into `y` and `y` into `z`, never `x` into
    /// `z`. Returns the number of retyped nodes.
    pub fn convert_types(&mut self, conversions: &IndexMap<NodeId, NodeId>) -> usize {
        let mut changed = 0;
        for &idx in self.index.values() {
            let data = &mut self.graph[idx];
            let Some(new_type) = data.node_type.as_ref().and_then(|t| conversions.get(t)) else {
                continue;
            };
            if data.node_type.as_ref() != Some(new_type) {
                data.node_type = Some(new_type.clone());
                changed += 1;
            }
        }
        changed
    }

    /// First unused id of the form `base1`, `base2`, ...
    pub fn fresh_node_id(&self, base: &NodeId) -> NodeId {
        self.fresh_node_ids(base, 1)
            .pop()
            .unwrap_or_else(|| base.clone())
    }

    /// `count` distinct unused ids of the form `base<i>`, lowest first.
    pub fn fresh_node_ids(&self, base: &NodeId, count: usize) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(count);
        let mut i = 1usize;
        while out.len() < count {
            let candidate = NodeId(format!("{}{}", base.0, i));
            if !self.index.contains_key(&candidate) {
                out.push(candidate);
            }
            i += 1;
        }
        out
    }

    /// Clones node `id` once per name in `names`.
    ///
    /// Each clone copies the type, the attributes and every edge incident to
    /// the original as it was before the call. A self loop on the original
    /// becomes a self loop on the clone. Clones are not connected to each
    /// other.
    pub fn clone_node(&mut self, id: &NodeId, names: &[NodeId]) -> Result<Vec<NodeId>, CoreError> {
        let idx = *self
            .index
            .get(id)
            .ok_or_else(|| CoreError::NodeNotFound { id: id.clone() })?;
        let mut seen = HashSet::new();
        for name in names {
            if self.index.contains_key(name) || !seen.insert(name) {
                return Err(CoreError::DuplicateNode { id: name.clone() });
            }
        }

        let data = self.graph[idx].clone();
        let outgoing: Vec<(NodeIndex<u32>, Attrs)> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|edge| (edge.target(), edge.weight().clone()))
            .collect();
        let incoming: Vec<(NodeIndex<u32>, Attrs)> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .filter(|edge| edge.source() != idx)
            .map(|edge| (edge.source(), edge.weight().clone()))
            .collect();

        for name in names {
            let clone = self.graph.add_node(NodeData {
                id: name.clone(),
                node_type: data.node_type.clone(),
                attrs: data.attrs.clone(),
            });
            self.index.insert(name.clone(), clone);
            for (target, attrs) in &outgoing {
                let target = if *target == idx { clone } else { *target };
                self.graph.add_edge(clone, target, attrs.clone());
            }
            for (source, attrs) in &incoming {
                self.graph.add_edge(*source, clone, attrs.clone());
            }
        }
        Ok(names.to_vec())
    }

    /// Clones node `id` `count` times under fresh ids.
    pub fn clone_node_n(&mut self, id: &NodeId, count: usize) -> Result<Vec<NodeId>, CoreError> {
        let names = self.fresh_node_ids(id, count);
        self.clone_node(id, &names)
    }

    /// Merges `ids` into a single node and returns its id.
    ///
    /// The survivor occupies the slot of the first id. It is named `into`
    /// when given (which must be one of `ids` or unused), otherwise it keeps
    /// the first id. Attributes are unioned. The type is kept if every merged
    /// node declares the same type, otherwise it is cleared. Edges incident
    /// to merged nodes are redirected to the survivor with attribute union;
    /// edges among merged nodes become self loops.
    pub fn merge_nodes(&mut self, ids: &[NodeId], into: Option<NodeId>) -> Result<NodeId, CoreError> {
        let mut unique: Vec<&NodeId> = Vec::with_capacity(ids.len());
        for id in ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        let Some(&first) = unique.first() else {
            return Err(CoreError::InvalidMerge {
                reason: "no nodes to merge".to_string(),
            });
        };
        let mut members = Vec::with_capacity(unique.len());
        for id in &unique {
            let idx = *self
                .index
                .get(*id)
                .ok_or_else(|| CoreError::NodeNotFound { id: (*id).clone() })?;
            members.push(idx);
        }
        let survivor_name = into.unwrap_or_else(|| first.clone());
        if !unique.contains(&&survivor_name) && self.index.contains_key(&survivor_name) {
            return Err(CoreError::InvalidMerge {
                reason: format!("target name '{}' is already used", survivor_name),
            });
        }
        let keep = members[0];

        // Combined payload.
        let mut attrs = Attrs::new();
        let mut types = Vec::with_capacity(members.len());
        for &idx in &members {
            attrs.union_with(&self.graph[idx].attrs);
            types.push(self.graph[idx].node_type.clone());
        }
        let node_type = if types.windows(2).all(|w| w[0] == w[1]) {
            types.into_iter().next().flatten()
        } else {
            None
        };

        // Detach every edge touching a member, remembering the redirected
        // endpoints.
        let member_set: HashSet<NodeIndex<u32>> = members.iter().copied().collect();
        let mut touched: Vec<EdgeIndex<u32>> = Vec::new();
        for &idx in &members {
            for direction in [Direction::Outgoing, Direction::Incoming] {
                for edge in self.graph.edges_directed(idx, direction) {
                    if !touched.contains(&edge.id()) {
                        touched.push(edge.id());
                    }
                }
            }
        }
        let redirect = |n: NodeIndex<u32>| if member_set.contains(&n) { keep } else { n };
        let mut rewired: Vec<(NodeIndex<u32>, NodeIndex<u32>, Attrs)> = Vec::new();
        for edge in touched {
            if let Some((a, b)) = self.graph.edge_endpoints(edge) {
                if let Some(weight) = self.graph.remove_edge(edge) {
                    rewired.push((redirect(a), redirect(b), weight));
                }
            }
        }

        for &idx in &members[1..] {
            let removed = self.graph.remove_node(idx);
            if let Some(data) = removed {
                self.index.shift_remove(&data.id);
            }
        }

        // Rename the survivor slot in place so node order is preserved.
        let old_name = self.graph[keep].id.clone();
        if old_name != survivor_name {
            let position = self.index.get_index_of(&old_name).unwrap_or(self.index.len());
            self.index.shift_remove(&old_name);
            self.index.shift_insert(position, survivor_name.clone(), keep);
        }
        {
            let data = &mut self.graph[keep];
            data.id = survivor_name.clone();
            data.attrs = attrs;
            data.node_type = node_type;
        }

        for (a, b, weight) in rewired {
            match self.find_edge_by_index(a, b) {
                Some(existing) => self.graph[existing].union_with(&weight),
                None => {
                    self.graph.add_edge(a, b, weight);
                }
            }
        }
        Ok(survivor_name)
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn node_mut(&mut self, id: &NodeId) -> Result<&mut NodeData, CoreError> {
        let idx = *self
            .index
            .get(id)
            .ok_or_else(|| CoreError::NodeNotFound { id: id.clone() })?;
        self.graph
            .node_weight_mut(idx)
            .ok_or_else(|| CoreError::NodeNotFound { id: id.clone() })
    }

    fn endpoints(&self, from: &NodeId, to: &NodeId) -> Result<(NodeIndex<u32>, NodeIndex<u32>), CoreError> {
        let a = *self
            .index
            .get(from)
            .ok_or_else(|| CoreError::NodeNotFound { id: from.clone() })?;
        let b = *self
            .index
            .get(to)
            .ok_or_else(|| CoreError::NodeNotFound { id: to.clone() })?;
        Ok((a, b))
    }

    fn find_edge(&self, from: &NodeId, to: &NodeId) -> Option<EdgeIndex<u32>> {
        let (a, b) = self.endpoints(from, to).ok()?;
        self.find_edge_by_index(a, b)
    }

    fn find_edge_by_index(&self, a: NodeIndex<u32>, b: NodeIndex<u32>) -> Option<EdgeIndex<u32>> {
        self.graph.find_edge(a, b).or_else(|| {
            if self.directed {
                None
            } else {
                self.graph.find_edge(b, a)
            }
        })
    }

    /// Edge key with undirected orientation normalized.
    fn edge_key(&self, from: &NodeId, to: &NodeId) -> (NodeId, NodeId) {
        if !self.directed && to < from {
            (to.clone(), from.clone())
        } else {
            (from.clone(), to.clone())
        }
    }

    /// Edges keyed by normalized endpoints, in sorted order.
    pub fn canonical_edges(&self) -> BTreeMap<(NodeId, NodeId), &Attrs> {
        self.edges()
            .map(|(a, b, attrs)| (self.edge_key(a, b), attrs))
            .collect()
    }

    /// Nodes keyed by name, in sorted order.
    pub fn canonical_nodes(&self) -> BTreeMap<&NodeId, &NodeData> {
        self.index
            .iter()
            .filter_map(|(id, &idx)| self.graph.node_weight(idx).map(|data| (id, data)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Equality, serialization, display
// ---------------------------------------------------------------------------

impl PartialEq for TypedGraph {
    /// Structural equality: same nodes with the same payloads and the same
    /// edges, regardless of insertion order.
    fn eq(&self, other: &Self) -> bool {
        self.directed == other.directed
            && self.metamodel == other.metamodel
            && self.canonical_nodes() == other.canonical_nodes()
            && self.canonical_edges() == other.canonical_edges()
    }
}

impl Eq for TypedGraph {}

impl From<TypedGraph> for GraphDocument {
    fn from(graph: TypedGraph) -> Self {
        let edges = graph
            .edges()
            .map(|(source, target, attrs)| EdgeData {
                source: source.clone(),
                target: target.clone(),
                attrs: attrs.clone(),
            })
            .collect();
        let nodes = graph
            .index
            .values()
            .filter_map(|&idx| graph.graph.node_weight(idx).cloned())
            .collect();
        GraphDocument {
            directed: graph.directed,
            metamodel: graph.metamodel,
            nodes,
            edges,
        }
    }
}

impl TryFrom<GraphDocument> for TypedGraph {
    type Error = CoreError;

    fn try_from(doc: GraphDocument) -> Result<Self, Self::Error> {
        let mut graph = TypedGraph::new(doc.directed);
        graph.metamodel = doc.metamodel;
        for node in doc.nodes {
            graph.add_node(node.id, node.node_type, node.attrs)?;
        }
        for edge in doc.edges {
            graph.add_edge(&edge.source, &edge.target, edge.attrs)?;
        }
        Ok(graph)
    }
}

impl fmt::Display for TypedGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = if self.directed { "->" } else { "--" };
        writeln!(f, "nodes:")?;
        for idx in self.index.values() {
            let data = &self.graph[*idx];
            match &data.node_type {
                Some(t) => write!(f, "  {} : {}", data.id, t)?,
                None => write!(f, "  {}", data.id)?,
            }
            if !data.attrs.is_empty() {
                write!(f, " {}", data.attrs)?;
            }
            writeln!(f)?;
        }
        writeln!(f, "edges:")?;
        for (a, b, attrs) in self.edges() {
            write!(f, "  {} {} {}", a, arrow, b)?;
            if !attrs.is_empty() {
                write!(f, " {}", attrs)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(name: &str) -> NodeId {
        NodeId::from(name)
    }

    fn path_graph() -> TypedGraph {
        let mut g = TypedGraph::directed();
        g.add_node("a", Some(n("A")), Attrs::new().with("k", 1)).unwrap();
        g.add_node("b", Some(n("B")), Attrs::new()).unwrap();
        g.add_node("c", None, Attrs::new()).unwrap();
        g.add_edge(&n("a"), &n("b"), Attrs::new().with("w", 1)).unwrap();
        g.add_edge(&n("b"), &n("c"), Attrs::new()).unwrap();
        g
    }

    #[test]
    fn add_and_query() {
        let g = path_graph();
        assert_eq!(g.node_count(), 3);
        assert_eq!(g.edge_count(), 2);
        assert_eq!(g.node_type(&n("a")), Some(&n("A")));
        assert_eq!(g.node_type(&n("c")), None);
        assert!(g.has_edge(&n("a"), &n("b")));
        assert!(!g.has_edge(&n("b"), &n("a")));
        assert_eq!(g.successors(&n("b")), vec![&n("c")]);
        assert_eq!(g.predecessors(&n("b")), vec![&n("a")]);
    }

    #[test]
    fn duplicate_node_and_edge_rejected() {
        let mut g = path_graph();
        assert!(matches!(
            g.add_node("a", None, Attrs::new()),
            Err(CoreError::DuplicateNode { .. })
        ));
        assert!(matches!(
            g.add_edge(&n("a"), &n("b"), Attrs::new()),
            Err(CoreError::DuplicateEdge { .. })
        ));
        assert!(matches!(
            g.add_edge(&n("a"), &n("zz"), Attrs::new()),
            Err(CoreError::NodeNotFound { .. })
        ));
    }

    #[test]
    fn undirected_edges_match_both_orientations() {
        let mut g = TypedGraph::undirected();
        g.add_node("a", None, Attrs::new()).unwrap();
        g.add_node("b", None, Attrs::new()).unwrap();
        g.add_edge(&n("a"), &n("b"), Attrs::new()).unwrap();
        assert!(g.has_edge(&n("b"), &n("a")));
        assert!(matches!(
            g.add_edge(&n("b"), &n("a"), Attrs::new()),
            Err(CoreError::DuplicateEdge { .. })
        ));
        g.remove_edge(&n("b"), &n("a")).unwrap();
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn remove_node_drops_incident_edges() {
        let mut g = path_graph();
        g.remove_node(&n("b")).unwrap();
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.edge_count(), 0);
        assert_eq!(g.nodes().cloned().collect::<Vec<_>>(), vec![n("a"), n("c")]);
    }

    #[test]
    fn convert_types_is_simultaneous() {
        let mut g = TypedGraph::directed();
        g.add_node("p", Some(n("x")), Attrs::new()).unwrap();
        g.add_node("q", Some(n("y")), Attrs::new()).unwrap();
        let mut conv = IndexMap::new();
        conv.insert(n("x"), n("y"));
        conv.insert(n("y"), n("z"));
        assert_eq!(g.convert_types(&conv), 2);
        assert_eq!(g.node_type(&n("p")), Some(&n("y")));
        assert_eq!(g.node_type(&n("q")), Some(&n("z")));
    }

    #[test]
    fn fresh_ids_skip_used_names() {
        let mut g = TypedGraph::directed();
        g.add_node("x", None, Attrs::new()).unwrap();
        g.add_node("x1", None, Attrs::new()).unwrap();
        assert_eq!(g.fresh_node_id(&n("x")), n("x2"));
        assert_eq!(g.fresh_node_ids(&n("x"), 2), vec![n("x2"), n("x3")]);
    }

    #[test]
    fn clone_copies_edges_and_payload() {
        let mut g = path_graph();
        g.add_edge(&n("b"), &n("b"), Attrs::new()).unwrap();
        let clones = g.clone_node_n(&n("b"), 2).unwrap();
        assert_eq!(clones, vec![n("b1"), n("b2")]);
        for c in &clones {
            assert_eq!(g.node_type(c), Some(&n("B")));
            assert!(g.has_edge(&n("a"), c));
            assert!(g.has_edge(c, &n("c")));
            assert!(g.has_edge(c, c));
            assert_eq!(g.edge_attrs(&n("a"), c), Some(&Attrs::new().with("w", 1)));
        }
        assert!(!g.has_edge(&n("b1"), &n("b2")));
        assert!(!g.has_edge(&n("b"), &n("b1")));
    }

    #[test]
    fn merge_unions_attrs_and_redirects_edges() {
        let mut g = TypedGraph::directed();
        g.add_node("u", Some(n("T")), Attrs::new().with("c", "red")).unwrap();
        g.add_node("v", Some(n("T")), Attrs::new().with("c", "blue")).unwrap();
        g.add_node("w", None, Attrs::new()).unwrap();
        g.add_edge(&n("u"), &n("w"), Attrs::new().with("e", 1)).unwrap();
        g.add_edge(&n("v"), &n("w"), Attrs::new().with("e", 2)).unwrap();
        g.add_edge(&n("u"), &n("v"), Attrs::new()).unwrap();

        let merged = g.merge_nodes(&[n("u"), n("v")], None).unwrap();
        assert_eq!(merged, n("u"));
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.node_type(&n("u")), Some(&n("T")));
        assert_eq!(g.node_attrs(&n("u")).unwrap().get("c").unwrap().len(), 2);
        assert_eq!(g.edge_attrs(&n("u"), &n("w")).unwrap().get("e").unwrap().len(), 2);
        assert!(g.has_edge(&n("u"), &n("u")));
        assert_eq!(g.edge_count(), 2);
    }

    #[test]
    fn merge_with_disagreeing_types_clears_type() {
        let mut g = TypedGraph::directed();
        g.add_node("u", Some(n("A")), Attrs::new()).unwrap();
        g.add_node("v", Some(n("B")), Attrs::new()).unwrap();
        g.add_node("w", None, Attrs::new()).unwrap();
        let merged = g.merge_nodes(&[n("u"), n("v")], Some(n("uv"))).unwrap();
        assert_eq!(merged, n("uv"));
        assert_eq!(g.node_type(&n("uv")), None);
        // The survivor keeps the first member's position.
        assert_eq!(g.nodes().cloned().collect::<Vec<_>>(), vec![n("uv"), n("w")]);
    }

    #[test]
    fn merge_rejects_taken_name() {
        let mut g = path_graph();
        assert!(matches!(
            g.merge_nodes(&[n("a"), n("b")], Some(n("c"))),
            Err(CoreError::InvalidMerge { .. })
        ));
        assert!(matches!(g.merge_nodes(&[], None), Err(CoreError::InvalidMerge { .. })));
    }

    #[test]
    fn document_roundtrip_preserves_structure() {
        let mut g = path_graph();
        g.set_metamodel(Some(GraphId::from("meta")));
        let json = serde_json::to_string(&g).unwrap();
        let back: TypedGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(g, back);
    }

    #[test]
    fn document_with_dangling_edge_rejected() {
        let json = r#"{"nodes":[{"id":"a"}],"edges":[{"source":"a","target":"b"}]}"#;
        assert!(serde_json::from_str::<TypedGraph>(json).is_err());
    }

    #[test]
    fn display_lists_nodes_and_edges() {
        let g = path_graph();
        insta::assert_snapshot!(g.to_string(), @r###"
        nodes:
          a : A {k: {1}}
          b : B
          c
        edges:
          a -> b {w: {1}}
          b -> c
        "###);
    }
}

//! Direct edits of one graph in a hierarchy.
//!
//! [`Hierarchy::rewrite`] applies a [`GraphEdit`] to a single graph and moves
//! the typing of every incident link along with it: clones inherit the
//! typing of the node they were cloned from, merges union it and removals
//! drop it. Links that no longer form a homomorphism are left pending with
//! their typing relation, ready for the propagation engine.

use hiergraph_core::{Attrs, GraphId, Homomorphism, Mapping, MorphismKind, NodeId, TypedGraph};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

use crate::error::HierarchyError;
use crate::hierarchy::{Hierarchy, Link, TypingRelation};

/// One primitive graph edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditOp {
    AddNode {
        id: NodeId,
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        node_type: Option<NodeId>,
        #[serde(default)]
        attrs: Attrs,
    },
    RemoveNode {
        id: NodeId,
    },
    AddEdge {
        from: NodeId,
        to: NodeId,
        #[serde(default)]
        attrs: Attrs,
    },
    RemoveEdge {
        from: NodeId,
        to: NodeId,
    },
    /// Unions attributes into an existing edge.
    AddEdgeAttrs {
        from: NodeId,
        to: NodeId,
        attrs: Attrs,
    },
    /// Clones a node under each of the given names.
    CloneNode {
        id: NodeId,
        clones: Vec<NodeId>,
    },
    /// Merges nodes; the survivor keeps the first id unless `into` is set.
    MergeNodes {
        ids: Vec<NodeId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        into: Option<NodeId>,
    },
}

/// An ordered list of edits applied to one graph as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdit {
    pub ops: Vec<EditOp>,
}

impl GraphEdit {
    pub fn new() -> Self {
        GraphEdit::default()
    }

    pub fn add_node(mut self, id: impl Into<NodeId>, node_type: Option<NodeId>, attrs: Attrs) -> Self {
        self.ops.push(EditOp::AddNode {
            id: id.into(),
            node_type,
            attrs,
        });
        self
    }

    pub fn remove_node(mut self, id: impl Into<NodeId>) -> Self {
        self.ops.push(EditOp::RemoveNode { id: id.into() });
        self
    }

    pub fn add_edge(mut self, from: impl Into<NodeId>, to: impl Into<NodeId>, attrs: Attrs) -> Self {
        self.ops.push(EditOp::AddEdge {
            from: from.into(),
            to: to.into(),
            attrs,
        });
        self
    }

    pub fn remove_edge(mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        self.ops.push(EditOp::RemoveEdge {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn add_edge_attrs(mut self, from: impl Into<NodeId>, to: impl Into<NodeId>, attrs: Attrs) -> Self {
        self.ops.push(EditOp::AddEdgeAttrs {
            from: from.into(),
            to: to.into(),
            attrs,
        });
        self
    }

    pub fn clone_node<I, N>(mut self, id: impl Into<NodeId>, clones: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeId>,
    {
        self.ops.push(EditOp::CloneNode {
            id: id.into(),
            clones: clones.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn merge_nodes<I, N>(mut self, ids: I, into: Option<NodeId>) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeId>,
    {
        self.ops.push(EditOp::MergeNodes {
            ids: ids.into_iter().map(Into::into).collect(),
            into,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Edges added to a graph, or whose attributes grew, since the last stable
/// state. Drives propagate-down.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeDelta(IndexSet<(NodeId, NodeId)>);

impl EdgeDelta {
    pub fn new() -> Self {
        EdgeDelta::default()
    }

    pub fn insert(&mut self, from: NodeId, to: NodeId) -> bool {
        self.0.insert((from, to))
    }

    pub fn contains(&self, from: &NodeId, to: &NodeId) -> bool {
        self.0.iter().any(|(a, b)| a == from && b == to)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &NodeId)> + '_ {
        self.0.iter().map(|(a, b)| (a, b))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Adds every edge of `other`.
    pub fn extend(&mut self, other: &EdgeDelta) {
        self.0.extend(other.0.iter().cloned());
    }

    /// Drops edges touching `node`.
    fn forget_node(&mut self, node: &NodeId) {
        self.0.retain(|(a, b)| a != node && b != node);
    }

    fn forget_edge(&mut self, from: &NodeId, to: &NodeId, directed: bool) {
        self.0
            .retain(|(a, b)| !((a == from && b == to) || (!directed && a == to && b == from)));
    }

    /// Renames endpoints in `merged` to `survivor`.
    fn redirect(&mut self, merged: &[NodeId], survivor: &NodeId) {
        let edges = std::mem::take(&mut self.0);
        self.0 = edges
            .into_iter()
            .map(|(a, b)| {
                let a = if merged.contains(&a) { survivor.clone() } else { a };
                let b = if merged.contains(&b) { survivor.clone() } else { b };
                (a, b)
            })
            .collect();
    }
}

impl FromIterator<(NodeId, NodeId)> for EdgeDelta {
    fn from_iter<I: IntoIterator<Item = (NodeId, NodeId)>>(iter: I) -> Self {
        EdgeDelta(iter.into_iter().collect())
    }
}

/// Result of [`Hierarchy::rewrite`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOutcome {
    pub graph: GraphId,
    pub delta: EdgeDelta,
    /// Links left pending by the edit.
    pub pending: Vec<(GraphId, GraphId)>,
}

// ---------------------------------------------------------------------------
// Incident link bookkeeping
// ---------------------------------------------------------------------------

/// A link incident to the graph being changed, with its working relation.
#[derive(Debug, Clone)]
struct IncidentLink {
    other: GraphId,
    link: Link,
    relation: TypingRelation,
}

/// Working typing relations of every link incident to one graph while that
/// graph is being changed. Nothing is written to the hierarchy until
/// [`commit`](Self::commit).
#[derive(Debug, Clone)]
pub(crate) struct IncidentRelations {
    graph: GraphId,
    /// Links `other -> graph`.
    incoming: Vec<IncidentLink>,
    /// Links `graph -> other`.
    outgoing: Vec<IncidentLink>,
}

impl IncidentRelations {
    /// Captures the relations of every link incident to `graph` except
    /// `skip` (given as `(from, to)`).
    pub(crate) fn capture(
        h: &Hierarchy,
        graph: &GraphId,
        skip: Option<(&GraphId, &GraphId)>,
    ) -> Result<Self, HierarchyError> {
        let is_skipped = |from: &GraphId, to: &GraphId| skip.map_or(false, |(a, b)| a == from && b == to);
        let mut incoming = Vec::new();
        for other in h.predecessors(graph)? {
            if is_skipped(&other, graph) {
                continue;
            }
            let link = h.link(&other, graph)?.clone();
            incoming.push(IncidentLink {
                relation: link.relation(),
                other,
                link,
            });
        }
        let mut outgoing = Vec::new();
        for other in h.successors(graph)? {
            if is_skipped(graph, &other) {
                continue;
            }
            let link = h.link(graph, &other)?.clone();
            outgoing.push(IncidentLink {
                relation: link.relation(),
                other,
                link,
            });
        }
        Ok(IncidentRelations {
            graph: graph.clone(),
            incoming,
            outgoing,
        })
    }

    /// A node was added. Outgoing typing links pick up its declared type
    /// when the target has a node of that name.
    pub(crate) fn node_added(
        &mut self,
        h: &Hierarchy,
        id: &NodeId,
        node_type: Option<&NodeId>,
    ) -> Result<(), HierarchyError> {
        for out in &mut self.outgoing {
            let mut images = SmallVec::new();
            if let (MorphismKind::Typing, Some(t)) = (out.link.kind(), node_type) {
                if h.graph(&out.other)?.has_node(t) {
                    images.push(t.clone());
                }
            }
            out.relation.insert(id.clone(), images);
        }
        Ok(())
    }

    pub(crate) fn node_removed(&mut self, id: &NodeId) {
        for inc in &mut self.incoming {
            for images in inc.relation.values_mut() {
                images.retain(|image| image != id);
            }
        }
        for out in &mut self.outgoing {
            out.relation.shift_remove(id);
        }
    }

    pub(crate) fn node_cloned(&mut self, id: &NodeId, clones: &[NodeId]) {
        for inc in &mut self.incoming {
            for images in inc.relation.values_mut() {
                if images.contains(id) {
                    images.extend(clones.iter().cloned());
                }
            }
        }
        for out in &mut self.outgoing {
            let images = out.relation.get(id).cloned().unwrap_or_default();
            for clone in clones {
                out.relation.insert(clone.clone(), images.clone());
            }
        }
    }

    pub(crate) fn nodes_merged(&mut self, ids: &[NodeId], survivor: &NodeId) {
        for inc in &mut self.incoming {
            for images in inc.relation.values_mut() {
                if !images.iter().any(|image| ids.contains(image)) {
                    continue;
                }
                let mut rewritten: SmallVec<[NodeId; 2]> = SmallVec::new();
                for image in images.drain(..) {
                    let image = if ids.contains(&image) { survivor.clone() } else { image };
                    if !rewritten.contains(&image) {
                        rewritten.push(image);
                    }
                }
                *images = rewritten;
            }
        }
        for out in &mut self.outgoing {
            let mut union: SmallVec<[NodeId; 2]> = SmallVec::new();
            for id in ids {
                if let Some(images) = out.relation.get(id) {
                    for image in images {
                        if !union.contains(image) {
                            union.push(image.clone());
                        }
                    }
                }
            }
            let position = ids
                .iter()
                .filter_map(|id| out.relation.get_index_of(id))
                .min()
                .unwrap_or(out.relation.len());
            for id in ids {
                out.relation.shift_remove(id);
            }
            let position = position.min(out.relation.len());
            out.relation.shift_insert(position, survivor.clone(), union);
        }
    }

    /// Writes `graph` into the hierarchy and rebuilds every captured link.
    /// Links whose relation is no longer a valid homomorphism are stored as
    /// pending. Returns the pending links.
    pub(crate) fn commit(self, h: &mut Hierarchy, graph: TypedGraph) -> Result<Vec<(GraphId, GraphId)>, HierarchyError> {
        h.replace_graph(&self.graph, graph)?;
        let mut pending = Vec::new();
        for inc in self.incoming {
            let link = rebuild(h, &inc.other, &self.graph, inc.link, inc.relation)?;
            if link.is_pending() {
                pending.push((inc.other.clone(), self.graph.clone()));
            }
            h.set_link(&inc.other, &self.graph, link)?;
        }
        for out in self.outgoing {
            let link = rebuild(h, &self.graph, &out.other, out.link, out.relation)?;
            if link.is_pending() {
                pending.push((self.graph.clone(), out.other.clone()));
            }
            h.set_link(&self.graph, &out.other, link)?;
        }
        Ok(pending)
    }
}

/// Single-valued mapping for `relation` if every node of `source` has
/// exactly one image.
pub(crate) fn functional_mapping(relation: &TypingRelation, source: &TypedGraph) -> Option<Mapping> {
    if relation.len() != source.node_count() {
        return None;
    }
    let mut mapping = Mapping::with_capacity(relation.len());
    for node in source.nodes() {
        match relation.get(node).map(|images| images.as_slice()) {
            Some([image]) => {
                mapping.insert(node.clone(), image.clone());
            }
            _ => return None,
        }
    }
    Some(mapping)
}

/// Rebuilds a link from a working relation, or marks it pending.
fn rebuild(
    h: &Hierarchy,
    from: &GraphId,
    to: &GraphId,
    link: Link,
    relation: TypingRelation,
) -> Result<Link, HierarchyError> {
    let source = h.graph(from)?;
    let target = h.graph(to)?;
    if let Some(mapping) = functional_mapping(&relation, source) {
        match Homomorphism::with_kind(link.kind(), source, target, mapping, link.ignore_attrs()) {
            Ok(homomorphism) => return Ok(Link::new(homomorphism)),
            Err(err) => debug!(%from, %to, error = %err, "link left pending"),
        }
    }
    Ok(Link::pending_with(link.homomorphism().clone(), relation))
}

impl Hierarchy {
    /// Applies `edit` to graph `id`.
    ///
    /// The edit is all-or-nothing: if any operation fails the hierarchy is
    /// unchanged. Incident links that still form homomorphisms afterwards
    /// are rebuilt; the others are left pending and listed in the outcome
    /// together with the edge delta for propagate-down.
    pub fn rewrite(&mut self, id: &GraphId, edit: &GraphEdit) -> Result<EditOutcome, HierarchyError> {
        let mut graph = self.graph(id)?.clone();
        let mut relations = IncidentRelations::capture(self, id, None)?;
        let mut delta = EdgeDelta::new();
        let directed = graph.is_directed();

        for op in &edit.ops {
            match op {
                EditOp::AddNode { id: node, node_type, attrs } => {
                    graph.add_node(node.clone(), node_type.clone(), attrs.clone())?;
                    relations.node_added(self, node, node_type.as_ref())?;
                }
                EditOp::RemoveNode { id: node } => {
                    graph.remove_node(node)?;
                    relations.node_removed(node);
                    delta.forget_node(node);
                }
                EditOp::AddEdge { from, to, attrs } => {
                    graph.add_edge(from, to, attrs.clone())?;
                    delta.insert(from.clone(), to.clone());
                }
                EditOp::RemoveEdge { from, to } => {
                    graph.remove_edge(from, to)?;
                    delta.forget_edge(from, to, directed);
                }
                EditOp::AddEdgeAttrs { from, to, attrs } => {
                    if graph.add_edge_attrs(from, to, attrs)? {
                        delta.insert(from.clone(), to.clone());
                    }
                }
                EditOp::CloneNode { id: node, clones } => {
                    graph.clone_node(node, clones)?;
                    relations.node_cloned(node, clones);
                    for clone in clones {
                        for succ in graph.successors(clone) {
                            delta.insert(clone.clone(), succ.clone());
                        }
                        for pred in graph.predecessors(clone) {
                            if directed {
                                delta.insert(pred.clone(), clone.clone());
                            }
                        }
                    }
                }
                EditOp::MergeNodes { ids, into } => {
                    let survivor = graph.merge_nodes(ids, into.clone())?;
                    relations.nodes_merged(ids, &survivor);
                    delta.redirect(ids, &survivor);
                }
            }
        }

        let pending = relations.commit(self, graph)?;
        debug!(graph = %id, ops = edit.ops.len(), pending = pending.len(), "applied edit");
        Ok(EditOutcome {
            graph: id.clone(),
            delta,
            pending,
        })
    }
}

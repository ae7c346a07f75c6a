//! Hierarchy: a DAG of typed graphs connected by homomorphisms.
//!
//! The hierarchy is an arena. Graphs live in the nodes of a petgraph
//! `StableDiGraph` and homomorphisms in its edges; every operation takes and
//! returns [`GraphId`]s, so callers can only mutate graphs through hierarchy
//! operations that keep the attached homomorphisms valid.
//!
//! An edge points from the more concrete graph to the more abstract one
//! (instance -> model -> metamodel).

use std::collections::{HashSet, VecDeque};
use std::fmt;

use hiergraph_core::compose::compose;
use hiergraph_core::{AttrValue, Attrs, GraphId, Homomorphism, Mapping, MorphismKind, NodeId, TypedGraph};
use indexmap::IndexMap;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

use crate::error::HierarchyError;

/// Node -> every node it is currently typed by in an adjacent graph.
///
/// A homomorphism maps each node to exactly one image. Between an edit and
/// its repair a node may temporarily have zero or several images; the
/// relation records that state.
pub type TypingRelation = IndexMap<NodeId, SmallVec<[NodeId; 2]>>;

/// A graph owned by a hierarchy slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSlot {
    pub id: GraphId,
    pub graph: TypedGraph,
}

/// Payload of a hierarchy edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// The last homomorphism that validated against both graphs.
    homomorphism: Homomorphism,
    /// Present while the link awaits repair.
    pending: Option<TypingRelation>,
}

impl Link {
    pub fn new(homomorphism: Homomorphism) -> Self {
        Link {
            homomorphism,
            pending: None,
        }
    }

    pub(crate) fn pending_with(homomorphism: Homomorphism, relation: TypingRelation) -> Self {
        Link {
            homomorphism,
            pending: Some(relation),
        }
    }

    pub fn homomorphism(&self) -> &Homomorphism {
        &self.homomorphism
    }

    pub fn kind(&self) -> MorphismKind {
        self.homomorphism.kind()
    }

    pub fn ignore_attrs(&self) -> bool {
        self.homomorphism.ignore_attrs()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<&TypingRelation> {
        self.pending.as_ref()
    }

    /// Current typing relation: the pending one, or the homomorphism's
    /// mapping with one image per node.
    pub fn relation(&self) -> TypingRelation {
        match &self.pending {
            Some(relation) => relation.clone(),
            None => self
                .homomorphism
                .mapping()
                .iter()
                .map(|(node, image)| (node.clone(), SmallVec::from_elem(image.clone(), 1)))
                .collect(),
        }
    }

    /// Serialized record of this link between `from` and `to`.
    pub fn to_entry(&self, from: &GraphId, to: &GraphId) -> LinkEntry {
        LinkEntry {
            from: from.clone(),
            to: to.clone(),
            homomorphism: self.homomorphism.clone(),
            pending: self.pending.clone(),
        }
    }
}

/// Request for [`Hierarchy::add_homomorphism`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSpec {
    /// Explicit mapping. Derived from node types for typing links and the
    /// identity for plain links when omitted.
    #[serde(default)]
    pub mapping: Option<Mapping>,
    #[serde(default)]
    pub typing: bool,
    #[serde(default)]
    pub ignore_types: bool,
    #[serde(default)]
    pub ignore_attrs: bool,
}

impl LinkSpec {
    /// Plain link with the identity mapping.
    pub fn identity() -> Self {
        LinkSpec::default()
    }

    /// Plain link with an explicit mapping.
    pub fn mapping(mapping: Mapping) -> Self {
        LinkSpec {
            mapping: Some(mapping),
            ..LinkSpec::default()
        }
    }

    /// Typing link derived from the source node types.
    pub fn typing() -> Self {
        LinkSpec {
            typing: true,
            ..LinkSpec::default()
        }
    }

    pub fn ignore_types(mut self, ignore: bool) -> Self {
        self.ignore_types = ignore;
        self
    }

    pub fn ignore_attrs(mut self, ignore: bool) -> Self {
        self.ignore_attrs = ignore;
        self
    }
}

/// A DAG of graphs connected by homomorphisms.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "HierarchyDocument", into = "HierarchyDocument")]
pub struct Hierarchy {
    directed: bool,
    dag: StableDiGraph<GraphSlot, Link>,
    /// Graph id to DAG index, in insertion order.
    index: IndexMap<GraphId, NodeIndex>,
    attrs: Attrs,
}

impl Hierarchy {
    /// Creates an empty hierarchy whose graphs must all have the given
    /// directedness.
    pub fn new(directed: bool) -> Self {
        Hierarchy {
            directed,
            dag: StableDiGraph::default(),
            index: IndexMap::new(),
            attrs: Attrs::new(),
        }
    }

    pub fn is_directed(&self) -> bool {
        self.directed
    }

    pub fn graph_count(&self) -> usize {
        self.index.len()
    }

    pub fn link_count(&self) -> usize {
        self.dag.edge_count()
    }

    pub fn contains(&self, id: &GraphId) -> bool {
        self.index.contains_key(id)
    }

    /// Graph ids in insertion order.
    pub fn graph_ids(&self) -> impl Iterator<Item = &GraphId> + '_ {
        self.index.keys()
    }

    pub fn graph(&self, id: &GraphId) -> Result<&TypedGraph, HierarchyError> {
        let idx = self.node_index(id)?;
        Ok(&self.dag[idx].graph)
    }

    pub fn link(&self, from: &GraphId, to: &GraphId) -> Result<&Link, HierarchyError> {
        let edge = self.edge_index(from, to)?;
        Ok(&self.dag[edge])
    }

    pub fn has_link(&self, from: &GraphId, to: &GraphId) -> bool {
        self.edge_index(from, to).is_ok()
    }

    /// The homomorphism `from -> to`. Fails with
    /// [`HierarchyError::LinkPending`] while the link awaits repair.
    pub fn homomorphism(&self, from: &GraphId, to: &GraphId) -> Result<&Homomorphism, HierarchyError> {
        let link = self.link(from, to)?;
        if link.is_pending() {
            return Err(HierarchyError::LinkPending {
                from: from.clone(),
                to: to.clone(),
            });
        }
        Ok(link.homomorphism())
    }

    /// Graphs with a link into `id`, in insertion order.
    pub fn predecessors(&self, id: &GraphId) -> Result<Vec<GraphId>, HierarchyError> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Graphs `id` links into, in insertion order.
    pub fn successors(&self, id: &GraphId) -> Result<Vec<GraphId>, HierarchyError> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &GraphId, direction: Direction) -> Result<Vec<GraphId>, HierarchyError> {
        let idx = self.node_index(id)?;
        let mut ids: Vec<&GraphId> = self
            .dag
            .neighbors_directed(idx, direction)
            .map(|n| &self.dag[n].id)
            .collect();
        ids.sort_by_key(|id| self.index.get_index_of(*id));
        ids.dedup();
        Ok(ids.into_iter().cloned().collect())
    }

    /// Every link as `(from, to, link)`, ordered by source then target
    /// insertion order.
    pub fn links(&self) -> Vec<(&GraphId, &GraphId, &Link)> {
        let mut links: Vec<(&GraphId, &GraphId, &Link)> = self
            .dag
            .edge_references()
            .map(|edge| {
                (
                    &self.dag[edge.source()].id,
                    &self.dag[edge.target()].id,
                    edge.weight(),
                )
            })
            .collect();
        links.sort_by_key(|(from, to, _)| (self.index.get_index_of(*from), self.index.get_index_of(*to)));
        links
    }

    /// Links awaiting repair.
    pub fn pending_links(&self) -> Vec<(GraphId, GraphId)> {
        self.links()
            .into_iter()
            .filter(|(_, _, link)| link.is_pending())
            .map(|(from, to, _)| (from.clone(), to.clone()))
            .collect()
    }

    /// Revalidates every link against the current graphs.
    pub fn check(&self) -> Result<(), HierarchyError> {
        for (from, to, _) in self.links() {
            self.check_link(from, to)?;
        }
        Ok(())
    }

    /// Whether no link is pending and every homomorphism is valid.
    pub fn is_closed(&self) -> bool {
        self.check().is_ok()
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    /// Adds `value` to the hierarchy-level attribute `key`.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.attrs.insert(key, value);
    }

    // -----------------------------------------------------------------------
    // Structural operations
    // -----------------------------------------------------------------------

    /// Adds a graph under `id`.
    pub fn add_graph(&mut self, id: impl Into<GraphId>, graph: TypedGraph) -> Result<(), HierarchyError> {
        let id = id.into();
        if graph.is_directed() != self.directed {
            return Err(HierarchyError::DirectednessMismatch {
                id,
                graph_directed: graph.is_directed(),
                hierarchy_directed: self.directed,
            });
        }
        if self.index.contains_key(&id) {
            return Err(HierarchyError::DuplicateGraph { id });
        }
        let idx = self.dag.add_node(GraphSlot { id: id.clone(), graph });
        debug!(graph = %id, "added graph");
        self.index.insert(id, idx);
        Ok(())
    }

    /// Adds a homomorphism `from -> to` built according to `spec`.
    ///
    /// Typing links derive their mapping from node types unless one is
    /// given. Plain links without a mapping use the identity, which fails
    /// with `MissingNode` when the graphs do not share node names.
    pub fn add_homomorphism(&mut self, from: &GraphId, to: &GraphId, spec: LinkSpec) -> Result<(), HierarchyError> {
        let from_idx = self.node_index(from)?;
        let to_idx = self.node_index(to)?;
        if self.dag.find_edge(from_idx, to_idx).is_some() {
            return Err(HierarchyError::DuplicateLink {
                from: from.clone(),
                to: to.clone(),
            });
        }
        if from_idx == to_idx || has_path_connecting(&self.dag, to_idx, from_idx, None) {
            return Err(HierarchyError::CycleWouldForm {
                from: from.clone(),
                to: to.clone(),
            });
        }

        let source = &self.dag[from_idx].graph;
        let target = &self.dag[to_idx].graph;
        let homomorphism = match (spec.typing, spec.mapping) {
            (true, Some(mapping)) => Homomorphism::typing_with_mapping(source, target, mapping, spec.ignore_attrs)?,
            (true, None) => Homomorphism::typing(source, target, spec.ignore_attrs)?,
            (false, Some(mapping)) => {
                Homomorphism::new(source, target, mapping, spec.ignore_types, spec.ignore_attrs)?
            }
            (false, None) => Homomorphism::identity(source, target, spec.ignore_types, spec.ignore_attrs)?,
        };
        self.dag.add_edge(from_idx, to_idx, Link::new(homomorphism));
        debug!(%from, %to, typing = spec.typing, "added homomorphism");
        Ok(())
    }

    /// Removes a graph and its links.
    ///
    /// With `reconnect`, every predecessor `p` and successor `s` of the
    /// removed graph are joined by the composition of `p -> id` and
    /// `id -> s` (unless `p -> s` already exists). Type conversions induced
    /// by typing compositions are applied to `p` and cascaded breadth-first
    /// along type-preserving links, converting each graph at most once.
    /// The cascade never enters the removed graph or another predecessor,
    /// which is converted by its own composition; successors stay open to it.
    /// Two different conversions for the same graph fail with
    /// [`HierarchyError::ConflictingConversions`]. The whole removal is
    /// staged and only committed if every affected link validates.
    pub fn remove_graph(&mut self, id: &GraphId, reconnect: bool) -> Result<(), HierarchyError> {
        let idx = self.node_index(id)?;
        if !reconnect {
            self.detach(idx);
            debug!(graph = %id, "removed graph");
            return Ok(());
        }

        let preds = self.predecessors(id)?;
        let succs = self.successors(id)?;
        let mut staged = self.clone();
        let mut converted: IndexMap<GraphId, IndexMap<NodeId, NodeId>> = IndexMap::new();
        let sealed: HashSet<GraphId> = preds.iter().chain(std::iter::once(id)).cloned().collect();

        for p in &preds {
            let into_removed = self.homomorphism(p, id)?;
            let original = self.graph(p)?;
            let mut typing_conversions: Option<IndexMap<NodeId, NodeId>> = None;
            let mut bridges = Vec::new();

            for s in &succs {
                if self.has_link(p, s) {
                    debug!(from = %p, to = %s, "link already present, not reconnecting");
                    continue;
                }
                let out_of_removed = self.homomorphism(id, s)?;
                let composition = compose(original, into_removed, out_of_removed, s, self.graph(s)?)?;
                if composition.is_typing() {
                    match &typing_conversions {
                        Some(existing) if *existing != composition.conversions => {
                            return Err(HierarchyError::ConflictingConversions {
                                graph: p.clone(),
                                existing: existing.clone(),
                                incoming: composition.conversions,
                            });
                        }
                        Some(_) => {}
                        None => {
                            typing_conversions = Some(composition.conversions.clone());
                            staged.replace_graph(p, composition.source.clone())?;
                        }
                    }
                }
                bridges.push((s.clone(), composition.homomorphism));
            }

            for (s, homomorphism) in bridges {
                staged.insert_link(p, &s, Link::new(homomorphism))?;
                debug!(from = %p, to = %s, "reconnected");
            }

            if let Some(conversions) = typing_conversions {
                if !conversions.is_empty() {
                    self.cascade_conversions(&mut staged, p, conversions, &sealed, &mut converted)?;
                }
            }
        }

        let staged_idx = staged.node_index(id)?;
        staged.detach(staged_idx);
        for (from, to, _) in staged.links() {
            let touched = preds.contains(from) || converted.contains_key(from) || converted.contains_key(to);
            if touched {
                staged.check_link(from, to)?;
            }
        }
        *self = staged;
        debug!(graph = %id, "removed graph with reconnection");
        Ok(())
    }

    /// Applies `conversions` to `start` (already converted in `staged`) and
    /// to every graph reachable from it through type-preserving links,
    /// without entering `sealed`.
    fn cascade_conversions(
        &self,
        staged: &mut Hierarchy,
        start: &GraphId,
        conversions: IndexMap<NodeId, NodeId>,
        sealed: &HashSet<GraphId>,
        converted: &mut IndexMap<GraphId, IndexMap<NodeId, NodeId>>,
    ) -> Result<(), HierarchyError> {
        if let Some(existing) = converted.get(start) {
            if *existing != conversions {
                return Err(HierarchyError::ConflictingConversions {
                    graph: start.clone(),
                    existing: existing.clone(),
                    incoming: conversions,
                });
            }
            return Ok(());
        }
        converted.insert(start.clone(), conversions.clone());

        let mut queue = VecDeque::from([start.clone()]);
        while let Some(current) = queue.pop_front() {
            for next in self.successors(&current)? {
                if sealed.contains(&next) {
                    continue;
                }
                if !self.link(&current, &next)?.homomorphism().preserves_types() {
                    continue;
                }
                if let Some(existing) = converted.get(&next) {
                    if *existing != conversions {
                        return Err(HierarchyError::ConflictingConversions {
                            graph: next,
                            existing: existing.clone(),
                            incoming: conversions,
                        });
                    }
                    continue;
                }
                let count = staged.graph_mut(&next)?.convert_types(&conversions);
                debug!(graph = %next, retyped = count, "cascaded type conversion");
                converted.insert(next.clone(), conversions.clone());
                queue.push_back(next);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Crate-internal mutation
    // -----------------------------------------------------------------------

    pub(crate) fn graph_mut(&mut self, id: &GraphId) -> Result<&mut TypedGraph, HierarchyError> {
        let idx = self.node_index(id)?;
        Ok(&mut self.dag[idx].graph)
    }

    pub(crate) fn replace_graph(&mut self, id: &GraphId, graph: TypedGraph) -> Result<(), HierarchyError> {
        *self.graph_mut(id)? = graph;
        Ok(())
    }

    pub(crate) fn set_link(&mut self, from: &GraphId, to: &GraphId, link: Link) -> Result<(), HierarchyError> {
        let edge = self.edge_index(from, to)?;
        self.dag[edge] = link;
        Ok(())
    }

    /// Inserts a link after duplicate and cycle checks, without validating
    /// its homomorphism.
    fn insert_link(&mut self, from: &GraphId, to: &GraphId, link: Link) -> Result<(), HierarchyError> {
        let from_idx = self.node_index(from)?;
        let to_idx = self.node_index(to)?;
        if self.dag.find_edge(from_idx, to_idx).is_some() {
            return Err(HierarchyError::DuplicateLink {
                from: from.clone(),
                to: to.clone(),
            });
        }
        if from_idx == to_idx || has_path_connecting(&self.dag, to_idx, from_idx, None) {
            return Err(HierarchyError::CycleWouldForm {
                from: from.clone(),
                to: to.clone(),
            });
        }
        self.dag.add_edge(from_idx, to_idx, link);
        Ok(())
    }

    /// Revalidates one link.
    pub(crate) fn check_link(&self, from: &GraphId, to: &GraphId) -> Result<(), HierarchyError> {
        let homomorphism = self.homomorphism(from, to)?;
        homomorphism.revalidate(self.graph(from)?, self.graph(to)?)?;
        Ok(())
    }

    fn detach(&mut self, idx: NodeIndex) {
        if let Some(slot) = self.dag.remove_node(idx) {
            self.index.shift_remove(&slot.id);
        }
    }

    fn node_index(&self, id: &GraphId) -> Result<NodeIndex, HierarchyError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| HierarchyError::UnknownGraph { id: id.clone() })
    }

    fn edge_index(&self, from: &GraphId, to: &GraphId) -> Result<EdgeIndex, HierarchyError> {
        let from_idx = self.node_index(from)?;
        let to_idx = self.node_index(to)?;
        self.dag
            .find_edge(from_idx, to_idx)
            .ok_or_else(|| HierarchyError::UnknownLink {
                from: from.clone(),
                to: to.clone(),
            })
    }
}

impl fmt::Display for Hierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graphs (directed == {}):", self.directed)?;
        for id in self.index.keys() {
            writeln!(f, "  {}", id)?;
        }
        writeln!(f, "homomorphisms:")?;
        for (from, to, link) in self.links() {
            write!(f, "  {} -> {} : ", from, to)?;
            match link.kind() {
                MorphismKind::Typing => write!(f, "typing")?,
                MorphismKind::Plain { ignore_types } => write!(f, "ignore_types == {}", ignore_types)?,
            }
            write!(f, ", ignore_attrs == {}", link.ignore_attrs())?;
            if link.is_pending() {
                write!(f, " (pending)")?;
            }
            writeln!(f)?;
        }
        writeln!(f, "attributes: {}", self.attrs)
    }
}

// ---------------------------------------------------------------------------
// Serialized form
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry {
    pub from: GraphId,
    pub to: GraphId,
    pub homomorphism: Homomorphism,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<TypingRelation>,
}

/// Serialized form of a [`Hierarchy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyDocument {
    #[serde(default = "default_directed")]
    pub directed: bool,
    #[serde(default, skip_serializing_if = "Attrs::is_empty")]
    pub attrs: Attrs,
    #[serde(default)]
    pub graphs: Vec<GraphSlot>,
    #[serde(default)]
    pub links: Vec<LinkEntry>,
}

fn default_directed() -> bool {
    true
}

impl From<Hierarchy> for HierarchyDocument {
    fn from(hierarchy: Hierarchy) -> Self {
        let links = hierarchy
            .links()
            .into_iter()
            .map(|(from, to, link)| link.to_entry(from, to))
            .collect();
        let graphs = hierarchy
            .index
            .values()
            .filter_map(|&idx| hierarchy.dag.node_weight(idx).cloned())
            .collect();
        HierarchyDocument {
            directed: hierarchy.directed,
            attrs: hierarchy.attrs,
            graphs,
            links,
        }
    }
}

impl TryFrom<HierarchyDocument> for Hierarchy {
    type Error = HierarchyError;

    /// Rebuilds a hierarchy, revalidating every non-pending link.
    fn try_from(doc: HierarchyDocument) -> Result<Self, Self::Error> {
        let mut hierarchy = Hierarchy::new(doc.directed);
        hierarchy.attrs = doc.attrs;
        for slot in doc.graphs {
            hierarchy.add_graph(slot.id, slot.graph)?;
        }
        for entry in doc.links {
            let pending = entry.pending.is_some();
            hierarchy.insert_link(
                &entry.from,
                &entry.to,
                Link {
                    homomorphism: entry.homomorphism,
                    pending: entry.pending,
                },
            )?;
            if !pending {
                hierarchy.check_link(&entry.from, &entry.to)?;
            }
        }
        Ok(hierarchy)
    }
}

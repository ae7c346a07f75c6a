//! Propagation of a local edit through the hierarchy.
//!
//! After a graph `R` is edited, the links touching it may no longer be
//! homomorphisms. The engine repairs them one link at a time:
//!
//! - **up** (`P -> R`): split `P` nodes that now have several images into
//!   one clone per image, remove `P` nodes that lost their image, remove
//!   `P` edges whose images are no longer connected;
//! - **down** (`R -> S`): merge `S` nodes that share a preimage, add `S`
//!   nodes for `R` nodes without an image, add (or attribute-merge) the
//!   image of every edge in the edit delta.
//!
//! Every repair is atomic: it runs against a snapshot of the hierarchy that
//! is restored if any step fails. [`PropagationEngine::propagate`] walks the
//! hierarchy breadth-first from the edited graph until no link is pending.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hiergraph_core::{GraphId, Homomorphism, Mapping, MorphismKind, NodeId, TypedGraph};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::edit::{EdgeDelta, EditOutcome, IncidentRelations};
use crate::error::HierarchyError;
use crate::hierarchy::{Hierarchy, Link, TypingRelation};

/// Which side of a link a repair changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairDirection {
    /// The link source (a predecessor of the edited graph) was repaired.
    Up,
    /// The link target (a successor of the edited graph) was repaired.
    Down,
}

/// What one repair did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    pub from: GraphId,
    pub to: GraphId,
    pub direction: RepairDirection,
    /// Split node and the nodes it became, the first being the renamed
    /// original.
    pub cloned: Vec<(NodeId, Vec<NodeId>)>,
    pub removed_nodes: Vec<NodeId>,
    pub removed_edges: Vec<(NodeId, NodeId)>,
    /// Merged nodes and the surviving node.
    pub merged: Vec<(Vec<NodeId>, NodeId)>,
    pub added_nodes: Vec<NodeId>,
    /// Edges of the repaired graph that were added or gained attributes.
    pub delta: EdgeDelta,
    /// Links left pending by this repair.
    pub pending: Vec<(GraphId, GraphId)>,
}

impl RepairReport {
    fn new(from: &GraphId, to: &GraphId, direction: RepairDirection) -> Self {
        RepairReport {
            from: from.clone(),
            to: to.clone(),
            direction,
            cloned: Vec::new(),
            removed_nodes: Vec::new(),
            removed_edges: Vec::new(),
            merged: Vec::new(),
            added_nodes: Vec::new(),
            delta: EdgeDelta::new(),
            pending: Vec::new(),
        }
    }

    /// The graph this repair changed.
    pub fn repaired(&self) -> &GraphId {
        match self.direction {
            RepairDirection::Up => &self.from,
            RepairDirection::Down => &self.to,
        }
    }

    /// Whether the repair changed nothing.
    pub fn is_noop(&self) -> bool {
        self.cloned.is_empty()
            && self.removed_nodes.is_empty()
            && self.removed_edges.is_empty()
            && self.merged.is_empty()
            && self.added_nodes.is_empty()
            && self.delta.is_empty()
    }
}

/// Options for [`PropagationEngine::propagate`].
#[derive(Debug, Clone)]
pub struct PropagationOptions {
    /// Upper bound on the number of link repairs.
    pub max_repairs: usize,
    /// Checked between repairs; when set, propagation stops with
    /// [`HierarchyError::Cancelled`].
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for PropagationOptions {
    fn default() -> Self {
        PropagationOptions {
            max_repairs: 1024,
            cancel: None,
        }
    }
}

impl PropagationOptions {
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn with_max_repairs(mut self, max_repairs: usize) -> Self {
        self.max_repairs = max_repairs;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::SeqCst))
    }
}

/// Every repair made by one propagation run, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationReport {
    pub repairs: Vec<RepairReport>,
}

impl PropagationReport {
    pub fn len(&self) -> usize {
        self.repairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repairs.is_empty()
    }
}

#[derive(Debug, Clone)]
enum Task {
    Up { predecessor: GraphId, edited: GraphId },
    Down { edited: GraphId, successor: GraphId, delta: EdgeDelta },
}

impl Task {
    fn link(&self) -> (&GraphId, &GraphId) {
        match self {
            Task::Up { predecessor, edited } => (predecessor, edited),
            Task::Down { edited, successor, .. } => (edited, successor),
        }
    }
}

/// Repairs links after an edit.
pub struct PropagationEngine;

impl PropagationEngine {
    /// Repairs predecessor `predecessor` so that `predecessor -> edited` is
    /// a homomorphism again.
    pub fn propagate_up(
        h: &mut Hierarchy,
        edited: &GraphId,
        predecessor: &GraphId,
    ) -> Result<RepairReport, HierarchyError> {
        h.link(predecessor, edited)?;
        let snapshot = h.clone();
        match repair_up(h, edited, predecessor) {
            Ok(report) => {
                info!(from = %predecessor, to = %edited, cloned = report.cloned.len(),
                    removed_nodes = report.removed_nodes.len(), removed_edges = report.removed_edges.len(),
                    "repaired predecessor");
                Ok(report)
            }
            Err(cause) => {
                *h = snapshot;
                Err(HierarchyError::PropagationFailed {
                    from: predecessor.clone(),
                    to: edited.clone(),
                    cause: Box::new(cause),
                })
            }
        }
    }

    /// Repairs successor `successor` so that `edited -> successor` is a
    /// homomorphism again. `delta` lists the edges added to `edited` since
    /// the link was last valid.
    pub fn propagate_down(
        h: &mut Hierarchy,
        edited: &GraphId,
        successor: &GraphId,
        delta: &EdgeDelta,
    ) -> Result<RepairReport, HierarchyError> {
        h.link(edited, successor)?;
        let snapshot = h.clone();
        match repair_down(h, edited, successor, delta) {
            Ok(report) => {
                info!(from = %edited, to = %successor, merged = report.merged.len(),
                    added_nodes = report.added_nodes.len(), delta = report.delta.len(),
                    "repaired successor");
                Ok(report)
            }
            Err(cause) => {
                *h = snapshot;
                Err(HierarchyError::PropagationFailed {
                    from: edited.clone(),
                    to: successor.clone(),
                    cause: Box::new(cause),
                })
            }
        }
    }

    /// Repairs every link left pending by `outcome`, then every link left
    /// pending by those repairs, breadth-first, until none is pending.
    ///
    /// Each repair is committed before the next one starts. On failure or
    /// cancellation the hierarchy keeps every repair committed so far.
    pub fn propagate(
        h: &mut Hierarchy,
        edited: &GraphId,
        outcome: &EditOutcome,
        options: &PropagationOptions,
    ) -> Result<PropagationReport, HierarchyError> {
        let mut queue: VecDeque<Task> = VecDeque::new();
        for (from, to) in &outcome.pending {
            enqueue(&mut queue, &[edited], from, to, &outcome.delta);
        }

        let mut report = PropagationReport::default();
        while let Some(task) = queue.pop_front() {
            let (from, to) = task.link();
            if !h.link(from, to)?.is_pending() {
                continue;
            }
            if options.is_cancelled() {
                return Err(HierarchyError::Cancelled {
                    completed: report.len(),
                });
            }
            if report.len() >= options.max_repairs {
                return Err(HierarchyError::RepairLimit {
                    limit: options.max_repairs,
                });
            }

            let repair = match &task {
                Task::Up { predecessor, edited } => PropagationEngine::propagate_up(h, edited, predecessor)?,
                Task::Down {
                    edited,
                    successor,
                    delta,
                } => PropagationEngine::propagate_down(h, edited, successor, delta)?,
            };
            // A down repair may also retype the graph it started from.
            let other = match repair.direction {
                RepairDirection::Up => &repair.to,
                RepairDirection::Down => &repair.from,
            };
            for (from, to) in &repair.pending {
                enqueue(&mut queue, &[repair.repaired(), other], from, to, &repair.delta);
            }
            report.repairs.push(repair);
        }
        debug!(graph = %edited, repairs = report.len(), "propagation finished");
        Ok(report)
    }
}

/// Queues the repair of pending link `from -> to`. `changed` lists the
/// graphs the last step modified, the first one being the graph whose edge
/// delta is `delta`. A link whose target changed is repaired upward, any
/// other link downward. Down tasks for a link already queued absorb the
/// delta.
fn enqueue(queue: &mut VecDeque<Task>, changed: &[&GraphId], from: &GraphId, to: &GraphId, delta: &EdgeDelta) {
    if changed.contains(&to) {
        let already = queue
            .iter()
            .any(|task| matches!(task, Task::Up { predecessor, edited } if predecessor == from && edited == to));
        if !already {
            queue.push_back(Task::Up {
                predecessor: from.clone(),
                edited: to.clone(),
            });
        }
        return;
    }
    let delta = if changed.first() == Some(&from) {
        delta.clone()
    } else {
        EdgeDelta::new()
    };
    for task in queue.iter_mut() {
        if let Task::Down {
            edited,
            successor,
            delta: queued,
        } = task
        {
            if edited == from && successor == to {
                queued.extend(&delta);
                return;
            }
        }
    }
    queue.push_back(Task::Down {
        edited: from.clone(),
        successor: to.clone(),
        delta,
    });
}

/// `images` that exist in `target`, deduplicated and in `target` node
/// order.
fn ordered_images<'a>(images: impl IntoIterator<Item = &'a NodeId>, target: &TypedGraph) -> Vec<NodeId> {
    let mut ordered: Vec<NodeId> = Vec::new();
    for image in images {
        if target.has_node(image) && !ordered.contains(image) {
            ordered.push(image.clone());
        }
    }
    ordered.sort_by_key(|image| target.node_position(image));
    ordered
}

/// Follows merge redirections to the node that now stands for `node`.
fn resolve<'a>(merged_into: &'a HashMap<NodeId, NodeId>, node: &'a NodeId) -> &'a NodeId {
    let mut current = node;
    while let Some(next) = merged_into.get(current) {
        current = next;
    }
    current
}

/// Current images of `node` in `graph` after the merges recorded so far.
fn merged_images(
    relation: &TypingRelation,
    merged_into: &HashMap<NodeId, NodeId>,
    graph: &TypedGraph,
    node: &NodeId,
) -> Vec<NodeId> {
    let images = relation.get(node).into_iter().flatten();
    ordered_images(images.map(|image| resolve(merged_into, image)), graph)
}

/// Makes the declared types of `source` agree with `mapping` for the given
/// link kind.
fn sync_types(kind: MorphismKind, source: &mut TypedGraph, target: &TypedGraph, mapping: &Mapping) -> Result<(), HierarchyError> {
    for (node, image) in mapping {
        let wanted = match kind {
            MorphismKind::Typing => Some(image.clone()),
            MorphismKind::Plain { ignore_types: false } => {
                if source.node_type(node).is_none() {
                    continue;
                }
                target.node_type(image).cloned()
            }
            MorphismKind::Plain { ignore_types: true } => continue,
        };
        if source.node_type(node) != wanted.as_ref() {
            debug!(node = %node, to = ?wanted, "retyped node");
            source.set_node_type(node, wanted)?;
        }
    }
    Ok(())
}

fn repair_up(h: &mut Hierarchy, edited: &GraphId, predecessor: &GraphId) -> Result<RepairReport, HierarchyError> {
    let link = h.link(predecessor, edited)?.clone();
    let relation = link.relation();
    let target = h.graph(edited)?;
    let mut graph = h.graph(predecessor)?.clone();
    let mut relations = IncidentRelations::capture(h, predecessor, Some((predecessor, edited)))?;
    let mut report = RepairReport::new(predecessor, edited, RepairDirection::Up);
    let mut mapping = Mapping::with_capacity(graph.node_count());

    // 1. Split nodes with several images.
    let nodes: Vec<NodeId> = graph.nodes().cloned().collect();
    for node in &nodes {
        let images = ordered_images(relation.get(node).into_iter().flatten(), target);
        match images.as_slice() {
            [] => {}
            [image] => {
                mapping.insert(node.clone(), image.clone());
            }
            _ => {
                // The original is renamed to the first fresh id and keeps
                // the first image; the clones take the rest.
                let clones = graph.fresh_node_ids(node, images.len());
                graph.clone_node(node, &clones[1..])?;
                relations.node_cloned(node, &clones[1..]);
                graph.merge_nodes(std::slice::from_ref(node), Some(clones[0].clone()))?;
                relations.nodes_merged(std::slice::from_ref(node), &clones[0]);
                for (clone, image) in clones.iter().zip(images.iter().cloned()) {
                    mapping.insert(clone.clone(), image);
                }
                debug!(graph = %predecessor, node = %node, clones = ?clones, "cloned node");
                report.cloned.push((node.clone(), clones));
            }
        }
    }

    // 2. Remove nodes without an image.
    let orphans: Vec<NodeId> = graph.nodes().filter(|n| !mapping.contains_key(*n)).cloned().collect();
    for node in orphans {
        graph.remove_node(&node)?;
        relations.node_removed(&node);
        debug!(graph = %predecessor, node = %node, "removed node");
        report.removed_nodes.push(node);
    }

    // 3. Remove edges whose images are not connected.
    let broken: Vec<(NodeId, NodeId)> = graph
        .edges()
        .filter(|(a, b, _)| match (mapping.get(*a), mapping.get(*b)) {
            (Some(ia), Some(ib)) => !target.has_edge(ia, ib),
            _ => true,
        })
        .map(|(a, b, _)| (a.clone(), b.clone()))
        .collect();
    for (a, b) in broken {
        graph.remove_edge(&a, &b)?;
        debug!(graph = %predecessor, from = %a, to = %b, "removed edge");
        report.removed_edges.push((a, b));
    }

    sync_types(link.kind(), &mut graph, target, &mapping)?;
    let homomorphism = Homomorphism::with_kind(link.kind(), &graph, target, mapping, link.ignore_attrs())?;

    report.pending = relations.commit(h, graph)?;
    h.set_link(predecessor, edited, Link::new(homomorphism))?;
    Ok(report)
}

fn repair_down(
    h: &mut Hierarchy,
    edited: &GraphId,
    successor: &GraphId,
    delta: &EdgeDelta,
) -> Result<RepairReport, HierarchyError> {
    let link = h.link(edited, successor)?.clone();
    let relation = link.relation();
    let source = h.graph(edited)?;
    let mut graph = h.graph(successor)?.clone();
    let mut relations = IncidentRelations::capture(h, successor, Some((edited, successor)))?;
    let mut report = RepairReport::new(edited, successor, RepairDirection::Down);
    let mut merged_into: HashMap<NodeId, NodeId> = HashMap::new();

    // 1. Merge nodes sharing a preimage.
    for node in source.nodes() {
        let images = merged_images(&relation, &merged_into, &graph, node);
        if images.len() < 2 {
            continue;
        }
        let survivor = graph.merge_nodes(&images, None)?;
        relations.nodes_merged(&images, &survivor);
        for image in &images {
            if *image != survivor {
                merged_into.insert(image.clone(), survivor.clone());
            }
        }
        for succ in graph.successors(&survivor) {
            report.delta.insert(survivor.clone(), succ.clone());
        }
        if graph.is_directed() {
            for pred in graph.predecessors(&survivor) {
                report.delta.insert(pred.clone(), survivor.clone());
            }
        }
        debug!(graph = %successor, nodes = ?images, into = %survivor, "merged nodes");
        report.merged.push((images, survivor));
    }

    // 2. Add nodes for preimages without an image.
    let mut mapping = Mapping::with_capacity(source.node_count());
    for node in source.nodes() {
        let images = merged_images(&relation, &merged_into, &graph, node);
        let image = match images.into_iter().next() {
            Some(image) => image,
            None => {
                let name = if graph.has_node(node) {
                    graph.fresh_node_id(node)
                } else {
                    node.clone()
                };
                let node_type = if link.homomorphism().preserves_types() {
                    source.node_type(node).cloned()
                } else {
                    None
                };
                let attrs = source.node_attrs(node).cloned().unwrap_or_default();
                graph.add_node(name.clone(), node_type.clone(), attrs)?;
                relations.node_added(h, &name, node_type.as_ref())?;
                debug!(graph = %successor, node = %name, "added node");
                report.added_nodes.push(name.clone());
                name
            }
        };
        if !link.ignore_attrs() {
            if let Some(attrs) = source.node_attrs(node) {
                if !graph.node_attrs(&image).map_or(false, |theirs| attrs.is_subset_of(theirs)) {
                    graph.add_node_attrs(&image, attrs)?;
                }
            }
        }
        mapping.insert(node.clone(), image);
    }

    // 3. Add the images of the delta edges.
    for (a, b) in delta.iter() {
        let Some(attrs) = source.edge_attrs(a, b) else {
            debug!(graph = %edited, from = %a, to = %b, "delta edge no longer present, skipped");
            continue;
        };
        let (Some(ia), Some(ib)) = (mapping.get(a), mapping.get(b)) else {
            continue;
        };
        if graph.upsert_edge(ia, ib, attrs)? {
            debug!(graph = %successor, from = %ia, to = %ib, "added edge");
            report.delta.insert(ia.clone(), ib.clone());
        }
    }

    // Typing sources follow merges of their targets.
    let mut retyped = None;
    if link.kind() == MorphismKind::Typing {
        let mut source_graph = source.clone();
        sync_types(link.kind(), &mut source_graph, &graph, &mapping)?;
        if source_graph != *source {
            let source_relations = IncidentRelations::capture(h, edited, Some((edited, successor)))?;
            retyped = Some((source_graph, source_relations));
        }
    }

    let homomorphism = match &retyped {
        Some((source_graph, _)) => {
            Homomorphism::with_kind(link.kind(), source_graph, &graph, mapping, link.ignore_attrs())?
        }
        None => Homomorphism::with_kind(link.kind(), source, &graph, mapping, link.ignore_attrs())?,
    };

    report.pending = relations.commit(h, graph)?;
    if let Some((source_graph, source_relations)) = retyped {
        report.pending.extend(source_relations.commit(h, source_graph)?);
    }
    h.set_link(edited, successor, Link::new(homomorphism))?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::GraphEdit;
    use crate::hierarchy::LinkSpec;
    use hiergraph_core::Attrs;

    fn n(name: &str) -> NodeId {
        NodeId::from(name)
    }

    fn g(name: &str) -> GraphId {
        GraphId::from(name)
    }

    /// P --plain--> R with p1 -> r1, p2 -> r2 and r1 -> r2.
    fn pair() -> Hierarchy {
        let mut r = TypedGraph::directed();
        r.add_node("r1", None, Attrs::new().with("k", 1)).unwrap();
        r.add_node("r2", None, Attrs::new()).unwrap();
        r.add_edge(&n("r1"), &n("r2"), Attrs::new()).unwrap();

        let mut p = TypedGraph::directed();
        p.add_node("p1", None, Attrs::new().with("k", 1)).unwrap();
        p.add_node("p2", None, Attrs::new()).unwrap();
        p.add_edge(&n("p1"), &n("p2"), Attrs::new()).unwrap();

        let mut h = Hierarchy::new(true);
        h.add_graph("R", r).unwrap();
        h.add_graph("P", p).unwrap();
        let mapping = [(n("p1"), n("r1")), (n("p2"), n("r2"))].into_iter().collect();
        h.add_homomorphism(&g("P"), &g("R"), LinkSpec::mapping(mapping)).unwrap();
        h
    }

    #[test]
    fn up_removes_nodes_and_edges() {
        let mut h = pair();
        h.rewrite(&g("R"), &GraphEdit::new().remove_edge("r1", "r2")).unwrap();
        let report = PropagationEngine::propagate_up(&mut h, &g("R"), &g("P")).unwrap();
        assert_eq!(report.removed_edges, vec![(n("p1"), n("p2"))]);
        assert!(h.is_closed());

        h.rewrite(&g("R"), &GraphEdit::new().remove_node("r2")).unwrap();
        let report = PropagationEngine::propagate_up(&mut h, &g("R"), &g("P")).unwrap();
        assert_eq!(report.removed_nodes, vec![n("p2")]);
        assert!(h.is_closed());
    }

    #[test]
    fn up_clones_keep_attributes() {
        let mut h = pair();
        h.rewrite(&g("R"), &GraphEdit::new().clone_node("r1", ["r1a", "r1b"]))
            .unwrap();
        let report = PropagationEngine::propagate_up(&mut h, &g("R"), &g("P")).unwrap();
        assert_eq!(report.cloned, vec![(n("p1"), vec![n("p11"), n("p12"), n("p13")])]);

        let p = h.graph(&g("P")).unwrap();
        assert!(!p.has_node(&n("p1")));
        let hom = h.homomorphism(&g("P"), &g("R")).unwrap();
        assert_eq!(hom.image(&n("p11")), Some(&n("r1")));
        assert_eq!(hom.image(&n("p12")), Some(&n("r1a")));
        assert_eq!(hom.image(&n("p13")), Some(&n("r1b")));
        for name in ["p11", "p12", "p13"] {
            assert_eq!(p.node_attrs(&n(name)), Some(&Attrs::new().with("k", 1)));
            assert!(p.has_edge(&n(name), &n("p2")));
        }
    }

    #[test]
    fn down_merges_nodes_with_shared_preimage() {
        // R --identity--> S, then R merges r1 and r2.
        let mut r = TypedGraph::directed();
        r.add_node("u", None, Attrs::new()).unwrap();
        r.add_node("v", None, Attrs::new()).unwrap();
        let mut s = TypedGraph::directed();
        s.add_node("u", None, Attrs::new().with("c", "red")).unwrap();
        s.add_node("v", None, Attrs::new().with("c", "blue")).unwrap();
        let mut h = Hierarchy::new(true);
        h.add_graph("R", r).unwrap();
        h.add_graph("S", s).unwrap();
        h.add_homomorphism(&g("R"), &g("S"), LinkSpec::identity()).unwrap();

        let outcome = h
            .rewrite(&g("R"), &GraphEdit::new().merge_nodes(["u", "v"], None))
            .unwrap();
        let report = PropagationEngine::propagate_down(&mut h, &g("R"), &g("S"), &outcome.delta).unwrap();
        assert_eq!(report.merged, vec![(vec![n("u"), n("v")], n("u"))]);
        let s = h.graph(&g("S")).unwrap();
        assert_eq!(s.node_count(), 1);
        assert_eq!(s.node_attrs(&n("u")).unwrap().get("c").unwrap().len(), 2);
        assert!(h.is_closed());
    }

    #[test]
    fn failed_repair_restores_hierarchy() {
        let mut r = TypedGraph::directed();
        r.add_node("a", None, Attrs::new()).unwrap();
        let mut s = TypedGraph::directed();
        s.add_node("a", None, Attrs::new()).unwrap();
        let mut h = Hierarchy::new(true);
        h.add_graph("R", r).unwrap();
        h.add_graph("S", s).unwrap();
        h.add_homomorphism(&g("R"), &g("S"), LinkSpec::identity()).unwrap();

        // An edge added behind the engine's back is not in any delta, so the
        // down repair adds `b` but cannot map `a -> b`.
        let graph = h.graph_mut(&g("R")).unwrap();
        graph.add_node("b", None, Attrs::new()).unwrap();
        graph.add_edge(&n("a"), &n("b"), Attrs::new()).unwrap();
        let mut relation = h.link(&g("R"), &g("S")).unwrap().relation();
        relation.insert(n("b"), Default::default());
        let stale = h.homomorphism(&g("R"), &g("S")).unwrap().clone();
        h.set_link(&g("R"), &g("S"), Link::pending_with(stale, relation))
            .unwrap();

        let before = h.clone();
        let err = PropagationEngine::propagate_down(&mut h, &g("R"), &g("S"), &EdgeDelta::new()).unwrap_err();
        match err {
            HierarchyError::PropagationFailed { from, to, cause } => {
                assert_eq!((from, to), (g("R"), g("S")));
                assert!(matches!(*cause, HierarchyError::Core(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(h.graph(&g("S")).unwrap(), before.graph(&g("S")).unwrap());
        assert_eq!(h.pending_links(), vec![(g("R"), g("S"))]);
    }

    #[test]
    fn cancellation_stops_before_first_repair() {
        let mut h = pair();
        let outcome = h.rewrite(&g("R"), &GraphEdit::new().remove_node("r2")).unwrap();
        let flag = Arc::new(AtomicBool::new(true));
        let options = PropagationOptions::default().with_cancel(flag);
        let err = PropagationEngine::propagate(&mut h, &g("R"), &outcome, &options).unwrap_err();
        assert_eq!(err, HierarchyError::Cancelled { completed: 0 });
        // Still the committed edit state: the link is pending, not half repaired.
        assert_eq!(h.pending_links(), vec![(g("P"), g("R"))]);
        assert_eq!(h.graph(&g("P")).unwrap().node_count(), 2);
    }

    #[test]
    fn unknown_link_is_not_wrapped() {
        let mut h = pair();
        let err = PropagationEngine::propagate_up(&mut h, &g("P"), &g("R")).unwrap_err();
        assert!(matches!(err, HierarchyError::UnknownLink { .. }));
    }
}

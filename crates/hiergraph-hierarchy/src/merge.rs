//! Three-way merge of hierarchy snapshots.
//!
//! [`three_way`] combines two hierarchies that diverged from a common
//! `base`. Every element is compared on its own: graph-level fields, nodes,
//! edges, hierarchy attributes, links and single mapping entries. An element
//! changed on one side only takes that side's value; an element changed the
//! same way on both sides is kept once; an element changed differently on
//! both sides is a conflict. Removal counts as a change.
//!
//! The merged hierarchy is rebuilt through [`HierarchyDocument`], so every
//! settled link is validated against the merged graphs.

use std::collections::BTreeSet;
use std::hash::Hash;

use hiergraph_core::{AttrValue, Attrs, GraphId, Homomorphism, Mapping, MorphismKind, NodeId, TypedGraph};
use indexmap::IndexMap;

use crate::error::HistoryError;
use crate::hierarchy::{GraphSlot, Hierarchy, HierarchyDocument, LinkEntry};

type NodePayload = (Option<NodeId>, Attrs);

/// Merges `ours` and `theirs` against `base`.
pub fn three_way(base: &Hierarchy, ours: &Hierarchy, theirs: &Hierarchy) -> Result<Hierarchy, HistoryError> {
    let directed = pick(
        Some(&base.is_directed()),
        Some(&ours.is_directed()),
        Some(&theirs.is_directed()),
        || "hierarchy directedness".to_string(),
    )?
    .unwrap_or(true);

    let attrs = merge_attrs(base.attrs(), ours.attrs(), theirs.attrs(), "hierarchy")?;
    let graphs = merge_graphs(base, ours, theirs)?;
    let links = merge_links(base, ours, theirs, &graphs)?;

    let doc = HierarchyDocument {
        directed,
        attrs,
        graphs: graphs
            .into_iter()
            .map(|(id, graph)| GraphSlot { id, graph })
            .collect(),
        links,
    };
    Ok(Hierarchy::try_from(doc)?)
}

// ---------------------------------------------------------------------------
// Element rule
// ---------------------------------------------------------------------------

/// Resolves one element. `None` means absent.
fn pick<T: PartialEq + Clone>(
    base: Option<&T>,
    ours: Option<&T>,
    theirs: Option<&T>,
    item: impl FnOnce() -> String,
) -> Result<Option<T>, HistoryError> {
    if ours == theirs || theirs == base {
        return Ok(ours.cloned());
    }
    if ours == base {
        return Ok(theirs.cloned());
    }
    Err(HistoryError::MergeConflict { item: item() })
}

/// Applies [`pick`] to every key of three maps. Ours' key order comes
/// first, followed by keys only theirs has.
fn merge_keyed<K, V>(
    base: &IndexMap<K, V>,
    ours: &IndexMap<K, V>,
    theirs: &IndexMap<K, V>,
    describe: impl Fn(&K) -> String,
) -> Result<IndexMap<K, V>, HistoryError>
where
    K: Hash + Eq + Clone,
    V: PartialEq + Clone,
{
    let keys = ours
        .keys()
        .chain(theirs.keys().filter(|key| !ours.contains_key(*key)));
    let mut merged = IndexMap::new();
    for key in keys {
        if let Some(value) = pick(base.get(key), ours.get(key), theirs.get(key), || describe(key))? {
            merged.insert(key.clone(), value);
        }
    }
    Ok(merged)
}

fn merge_attrs(base: &Attrs, ours: &Attrs, theirs: &Attrs, owner: &str) -> Result<Attrs, HistoryError> {
    let keyed = |attrs: &Attrs| -> IndexMap<String, BTreeSet<AttrValue>> {
        attrs.iter().map(|(key, values)| (key.clone(), values.clone())).collect()
    };
    let merged = merge_keyed(&keyed(base), &keyed(ours), &keyed(theirs), |key| {
        format!("attribute '{}' of {}", key, owner)
    })?;
    let mut attrs = Attrs::new();
    for (key, values) in merged {
        for value in values {
            attrs.insert(key.clone(), value);
        }
    }
    Ok(attrs)
}

// ---------------------------------------------------------------------------
// Graphs
// ---------------------------------------------------------------------------

fn graphs_of(h: &Hierarchy) -> Result<IndexMap<GraphId, TypedGraph>, HistoryError> {
    h.graph_ids()
        .map(|id| -> Result<_, HistoryError> { Ok((id.clone(), h.graph(id)?.clone())) })
        .collect()
}

fn merge_graphs(
    base: &Hierarchy,
    ours: &Hierarchy,
    theirs: &Hierarchy,
) -> Result<IndexMap<GraphId, TypedGraph>, HistoryError> {
    let base = graphs_of(base)?;
    let ours = graphs_of(ours)?;
    let theirs = graphs_of(theirs)?;

    let ids = ours
        .keys()
        .chain(theirs.keys().filter(|id| !ours.contains_key(*id)));
    let mut merged = IndexMap::new();
    for id in ids {
        let graph = match (ours.get(id), theirs.get(id)) {
            (Some(mine), Some(other)) => {
                let empty = TypedGraph::new(mine.is_directed());
                let ancestor = base.get(id).unwrap_or(&empty);
                merge_graph(id, ancestor, mine, other)?
            }
            // Present on one side only: added there, or removed on the
            // other side while left untouched here.
            (one, other) => match pick(base.get(id), one, other, || format!("graph '{}'", id))? {
                Some(graph) => graph,
                None => continue,
            },
        };
        merged.insert(id.clone(), graph);
    }
    Ok(merged)
}

fn nodes_of(graph: &TypedGraph) -> IndexMap<NodeId, NodePayload> {
    graph
        .nodes()
        .filter_map(|id| graph.node(id).map(|data| (id.clone(), (data.node_type.clone(), data.attrs.clone()))))
        .collect()
}

fn edges_of(graph: &TypedGraph) -> IndexMap<(NodeId, NodeId), Attrs> {
    graph
        .canonical_edges()
        .into_iter()
        .map(|(key, attrs)| (key, attrs.clone()))
        .collect()
}

fn merge_graph(id: &GraphId, base: &TypedGraph, ours: &TypedGraph, theirs: &TypedGraph) -> Result<TypedGraph, HistoryError> {
    let directed = pick(
        Some(&base.is_directed()),
        Some(&ours.is_directed()),
        Some(&theirs.is_directed()),
        || format!("directedness of graph '{}'", id),
    )?
    .unwrap_or(true);
    let metamodel = pick(
        Some(&base.metamodel().cloned()),
        Some(&ours.metamodel().cloned()),
        Some(&theirs.metamodel().cloned()),
        || format!("metamodel of graph '{}'", id),
    )?
    .flatten();

    let nodes = merge_keyed(&nodes_of(base), &nodes_of(ours), &nodes_of(theirs), |node| {
        format!("node '{}' of graph '{}'", node, id)
    })?;
    let edges = merge_keyed(&edges_of(base), &edges_of(ours), &edges_of(theirs), |(a, b)| {
        format!("edge '{}' -> '{}' of graph '{}'", a, b, id)
    })?;

    let mut graph = TypedGraph::new(directed);
    graph.set_metamodel(metamodel);
    for (node, (node_type, attrs)) in nodes {
        graph.add_node(node, node_type, attrs).map_err(crate::HierarchyError::from)?;
    }
    for ((a, b), attrs) in edges {
        if !graph.has_node(&a) || !graph.has_node(&b) {
            return Err(HistoryError::MergeConflict {
                item: format!("edge '{}' -> '{}' of graph '{}' joins a removed node", a, b, id),
            });
        }
        graph.add_edge(&a, &b, attrs).map_err(crate::HierarchyError::from)?;
    }
    Ok(graph)
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

fn links_of(h: &Hierarchy) -> IndexMap<(GraphId, GraphId), LinkEntry> {
    h.links()
        .into_iter()
        .map(|(from, to, link)| ((from.clone(), to.clone()), link.to_entry(from, to)))
        .collect()
}

fn merge_links(
    base: &Hierarchy,
    ours: &Hierarchy,
    theirs: &Hierarchy,
    graphs: &IndexMap<GraphId, TypedGraph>,
) -> Result<Vec<LinkEntry>, HistoryError> {
    let base = links_of(base);
    let ours = links_of(ours);
    let theirs = links_of(theirs);

    let keys = ours
        .keys()
        .chain(theirs.keys().filter(|key| !ours.contains_key(*key)));
    let mut merged = Vec::new();
    for key in keys {
        let (from, to) = key;
        let describe = || format!("homomorphism '{}' -> '{}'", from, to);
        let entry = match (ours.get(key), theirs.get(key)) {
            (Some(mine), Some(other)) if mine.pending.is_none() && other.pending.is_none() => {
                merge_settled_link(base.get(key), mine, other, graphs)?
            }
            (mine, other) => match pick(base.get(key), mine, other, describe)? {
                Some(entry) => entry,
                None => continue,
            },
        };
        merged.push(entry);
    }
    Ok(merged)
}

/// Merges a link settled on both sides entry by entry and rebuilds its
/// homomorphism against the merged graphs.
fn merge_settled_link(
    base: Option<&LinkEntry>,
    ours: &LinkEntry,
    theirs: &LinkEntry,
    graphs: &IndexMap<GraphId, TypedGraph>,
) -> Result<LinkEntry, HistoryError> {
    let (from, to) = (&ours.from, &ours.to);
    let flags = |entry: &LinkEntry| -> (MorphismKind, bool) {
        (entry.homomorphism.kind(), entry.homomorphism.ignore_attrs())
    };
    let base_flags = base.map(flags);
    let (kind, ignore_attrs) = pick(base_flags.as_ref(), Some(&flags(ours)), Some(&flags(theirs)), || {
        format!("kind of homomorphism '{}' -> '{}'", from, to)
    })?
    .unwrap_or_else(|| flags(ours));

    let empty = Mapping::new();
    let base_mapping = base.map_or(&empty, |entry| entry.homomorphism.mapping());
    let mapping = merge_keyed(
        base_mapping,
        ours.homomorphism.mapping(),
        theirs.homomorphism.mapping(),
        |node| format!("image of '{}' under '{}' -> '{}'", node, from, to),
    )?;

    let endpoint = |id: &GraphId| {
        graphs
            .get(id)
            .ok_or_else(|| crate::HierarchyError::UnknownGraph { id: id.clone() })
    };
    let homomorphism = Homomorphism::with_kind(kind, endpoint(from)?, endpoint(to)?, mapping, ignore_attrs)
        .map_err(crate::HierarchyError::from)?;
    Ok(LinkEntry {
        from: from.clone(),
        to: to.clone(),
        homomorphism,
        pending: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::GraphEdit;
    use crate::hierarchy::LinkSpec;

    fn n(name: &str) -> NodeId {
        NodeId::from(name)
    }

    fn g(name: &str) -> GraphId {
        GraphId::from(name)
    }

    /// model --typing--> meta, with model nodes `a` and `b`.
    fn base() -> Hierarchy {
        let mut meta = TypedGraph::directed();
        meta.add_node("T", None, Attrs::new()).unwrap();
        meta.add_edge(&n("T"), &n("T"), Attrs::new()).unwrap();
        let mut model = TypedGraph::directed();
        model.add_node("a", Some(n("T")), Attrs::new()).unwrap();
        model.add_node("b", Some(n("T")), Attrs::new()).unwrap();
        let mut h = Hierarchy::new(true);
        h.add_graph("meta", meta).unwrap();
        h.add_graph("model", model).unwrap();
        h.add_homomorphism(&g("model"), &g("meta"), LinkSpec::typing()).unwrap();
        h
    }

    fn edited(edit: GraphEdit) -> Hierarchy {
        let mut h = base();
        h.rewrite(&g("model"), &edit).unwrap();
        assert!(h.is_closed());
        h
    }

    #[test]
    fn disjoint_edits_are_combined() {
        let ours = edited(GraphEdit::new().add_node("c", Some(n("T")), Attrs::new()));
        let theirs = edited(
            GraphEdit::new()
                .remove_node("b")
                .add_edge("a", "a", Attrs::new().with("w", 1)),
        );

        let merged = three_way(&base(), &ours, &theirs).unwrap();
        let model = merged.graph(&g("model")).unwrap();
        let nodes: Vec<NodeId> = model.nodes().cloned().collect();
        assert_eq!(nodes, vec![n("a"), n("c")]);
        assert_eq!(model.edge_attrs(&n("a"), &n("a")), Some(&Attrs::new().with("w", 1)));
        let hom = merged.homomorphism(&g("model"), &g("meta")).unwrap();
        assert_eq!(hom.image(&n("c")), Some(&n("T")));
        assert_eq!(hom.image(&n("b")), None);
        merged.check().unwrap();
    }

    #[test]
    fn identical_edits_merge_cleanly() {
        let edit = GraphEdit::new().add_node("c", Some(n("T")), Attrs::new().with("k", 1));
        let merged = three_way(&base(), &edited(edit.clone()), &edited(edit)).unwrap();
        assert_eq!(merged.graph(&g("model")).unwrap().node_count(), 3);
    }

    #[test]
    fn diverging_node_attributes_conflict() {
        let ours = edited(GraphEdit::new().add_node("c", Some(n("T")), Attrs::new().with("k", 1)));
        let theirs = edited(GraphEdit::new().add_node("c", Some(n("T")), Attrs::new().with("k", 2)));
        assert_eq!(
            three_way(&base(), &ours, &theirs).unwrap_err(),
            HistoryError::MergeConflict {
                item: "node 'c' of graph 'model'".to_string()
            }
        );
    }

    #[test]
    fn edge_onto_a_removed_node_conflicts() {
        let ours = edited(GraphEdit::new().remove_node("b"));
        let theirs = edited(GraphEdit::new().add_edge("a", "b", Attrs::new()));
        let err = three_way(&base(), &ours, &theirs).unwrap_err();
        assert!(matches!(err, HistoryError::MergeConflict { item } if item.contains("removed node")));
    }

    #[test]
    fn removed_graph_stays_removed_unless_changed() {
        let mut ours = base();
        ours.remove_graph(&g("model"), false).unwrap();
        let merged = three_way(&base(), &ours, &base()).unwrap();
        assert!(!merged.contains(&g("model")));
        assert_eq!(merged.link_count(), 0);

        let theirs = edited(GraphEdit::new().add_node("c", Some(n("T")), Attrs::new()));
        let err = three_way(&base(), &ours, &theirs).unwrap_err();
        assert!(matches!(err, HistoryError::MergeConflict { item } if item == "graph 'model'"));
    }

    #[test]
    fn hierarchy_attributes_merge_per_key() {
        let mut ours = base();
        ours.set_attr("owner", "ann");
        let mut theirs = base();
        theirs.set_attr("stage", 2);
        let merged = three_way(&base(), &ours, &theirs).unwrap();
        assert!(merged.attrs().get("owner").is_some());
        assert!(merged.attrs().get("stage").is_some());
    }
}

//! Deterministic content hashing for hierarchies using blake3.
//!
//! Hashes compose bottom-up, Merkle style. Hashes are derived state and are
//! never stored in the database.
//!
//! # Levels
//!
//! - **Graph content**: directedness, metamodel, nodes with types and
//!   attributes, edges with attributes
//! - **Link**: endpoints, kind, flags, mapping and pending relation
//! - **Graph**: content hash plus the hashes of its outgoing links
//! - **Hierarchy root**: directedness, attributes and every graph hash
//!
//! # Determinism
//!
//! Nodes, edges and mappings are hashed in sorted order, and undirected
//! edges with normalized endpoints, so insertion order never changes a
//! hash. Values are written as JSON through `serde_json::to_writer`, which
//! quotes every identifier and keeps field boundaries unambiguous.

use std::collections::BTreeMap;

use hiergraph_core::{GraphId, NodeId, TypedGraph};
use hiergraph_hierarchy::{Hierarchy, Link};
use serde::Serialize;

use crate::error::StorageError;

/// Per-graph hashes of a hierarchy, as produced by [`hash_all_graphs`].
pub type GraphHashes = BTreeMap<GraphId, blake3::Hash>;

fn write_json<T: Serialize + ?Sized>(hasher: &mut blake3::Hasher, value: &T) -> Result<(), StorageError> {
    serde_json::to_writer(&mut *hasher, value)?;
    hasher.update(b"\0");
    Ok(())
}

/// Hashes a graph's own content, independent of its links.
pub fn hash_graph_content(graph: &TypedGraph) -> Result<blake3::Hash, StorageError> {
    let mut hasher = blake3::Hasher::new();
    write_json(&mut hasher, &graph.is_directed())?;
    write_json(&mut hasher, &graph.metamodel())?;
    let nodes: Vec<_> = graph.canonical_nodes().into_values().collect();
    write_json(&mut hasher, &nodes)?;
    let edges: Vec<_> = graph.canonical_edges().into_iter().collect();
    write_json(&mut hasher, &edges)?;
    Ok(hasher.finalize())
}

/// Hashes the link `from -> to`.
pub fn hash_link(from: &GraphId, to: &GraphId, link: &Link) -> Result<blake3::Hash, StorageError> {
    let homomorphism = link.homomorphism();
    let mut hasher = blake3::Hasher::new();
    write_json(&mut hasher, from)?;
    write_json(&mut hasher, to)?;
    write_json(&mut hasher, &homomorphism.kind())?;
    write_json(&mut hasher, &homomorphism.ignore_attrs())?;
    let mapping: BTreeMap<&NodeId, &NodeId> = homomorphism.mapping().iter().collect();
    write_json(&mut hasher, &mapping)?;
    // Image order inside a pending relation decides clone naming, so it is
    // hashed as is.
    let pending: Option<BTreeMap<&NodeId, _>> = link
        .pending()
        .map(|relation| relation.iter().collect());
    write_json(&mut hasher, &pending)?;
    Ok(hasher.finalize())
}

/// Hashes a graph together with its outgoing links.
///
/// Any change to a link marks its source graph, so saving the source graph
/// with its incident links persists the change.
pub fn hash_graph(hierarchy: &Hierarchy, id: &GraphId) -> Result<blake3::Hash, StorageError> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(hash_graph_content(hierarchy.graph(id)?)?.as_bytes());

    let mut targets = hierarchy.successors(id)?;
    targets.sort();
    for to in &targets {
        let link = hierarchy.link(id, to)?;
        hasher.update(hash_link(id, to, link)?.as_bytes());
    }
    Ok(hasher.finalize())
}

/// Hashes every graph of the hierarchy.
pub fn hash_all_graphs(hierarchy: &Hierarchy) -> Result<GraphHashes, StorageError> {
    hierarchy
        .graph_ids()
        .map(|id| -> Result<_, StorageError> { Ok((id.clone(), hash_graph(hierarchy, id)?)) })
        .collect()
}

/// Root hash over the whole hierarchy.
pub fn hash_hierarchy(hierarchy: &Hierarchy) -> Result<blake3::Hash, StorageError> {
    let mut hasher = blake3::Hasher::new();
    write_json(&mut hasher, &hierarchy.is_directed())?;
    write_json(&mut hasher, hierarchy.attrs())?;
    for (id, hash) in hash_all_graphs(hierarchy)? {
        write_json(&mut hasher, &id)?;
        hasher.update(hash.as_bytes());
    }
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hiergraph_core::Attrs;
    use hiergraph_hierarchy::LinkSpec;

    fn n(name: &str) -> NodeId {
        NodeId::from(name)
    }

    fn g(name: &str) -> GraphId {
        GraphId::from(name)
    }

    fn triangle(order: &[&str], directed: bool) -> TypedGraph {
        let mut graph = TypedGraph::new(directed);
        for name in order {
            graph.add_node(*name, None, Attrs::new().with("label", *name)).unwrap();
        }
        graph.add_edge(&n("a"), &n("b"), Attrs::new()).unwrap();
        graph.add_edge(&n("b"), &n("c"), Attrs::new().with("w", 2)).unwrap();
        graph.add_edge(&n("c"), &n("a"), Attrs::new()).unwrap();
        graph
    }

    #[test]
    fn insertion_order_does_not_change_content_hash() {
        let first = hash_graph_content(&triangle(&["a", "b", "c"], true)).unwrap();
        let second = hash_graph_content(&triangle(&["c", "a", "b"], true)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn undirected_edges_hash_by_endpoints() {
        let mut forward = TypedGraph::undirected();
        let mut backward = TypedGraph::undirected();
        for graph in [&mut forward, &mut backward] {
            graph.add_node("a", None, Attrs::new()).unwrap();
            graph.add_node("b", None, Attrs::new()).unwrap();
        }
        forward.add_edge(&n("a"), &n("b"), Attrs::new()).unwrap();
        backward.add_edge(&n("b"), &n("a"), Attrs::new()).unwrap();
        assert_eq!(
            hash_graph_content(&forward).unwrap(),
            hash_graph_content(&backward).unwrap()
        );
    }

    #[test]
    fn content_changes_change_the_hash() {
        let base = triangle(&["a", "b", "c"], true);
        let before = hash_graph_content(&base).unwrap();

        let mut attr = base.clone();
        attr.add_node_attrs(&n("a"), &Attrs::new().with("extra", true)).unwrap();
        assert_ne!(hash_graph_content(&attr).unwrap(), before);

        let mut typed = base.clone();
        typed.set_node_type(&n("a"), Some(n("t"))).unwrap();
        assert_ne!(hash_graph_content(&typed).unwrap(), before);

        let undirected = triangle(&["a", "b", "c"], false);
        assert_ne!(hash_graph_content(&undirected).unwrap(), before);
    }

    #[test]
    fn link_changes_mark_the_source_graph() {
        let mut h = Hierarchy::new(true);
        for id in ["a", "b", "c"] {
            let mut graph = TypedGraph::directed();
            graph.add_node("x", None, Attrs::new()).unwrap();
            h.add_graph(id, graph).unwrap();
        }
        h.add_homomorphism(&g("a"), &g("b"), LinkSpec::identity()).unwrap();
        let before = hash_all_graphs(&h).unwrap();

        h.add_homomorphism(&g("a"), &g("c"), LinkSpec::identity()).unwrap();
        let after = hash_all_graphs(&h).unwrap();
        assert_ne!(before[&g("a")], after[&g("a")]);
        assert_eq!(before[&g("b")], after[&g("b")]);
        assert_eq!(before[&g("c")], after[&g("c")]);
        assert_ne!(hash_hierarchy(&h).unwrap(), blake3::Hash::from([0; 32]));
    }
}

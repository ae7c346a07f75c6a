//! Decomposition of a [`Hierarchy`] into flat storage records and back.
//!
//! Both backends store the same pieces: a header (directedness and
//! attributes), one [`GraphDocument`] per graph in insertion order, and one
//! [`LinkEntry`] per homomorphism. [`recompose`] rebuilds the hierarchy
//! through its validating constructor, so corrupted rows surface as
//! [`StorageError::Hierarchy`].

use hiergraph_core::graph::GraphDocument;
use hiergraph_core::{Attrs, GraphId, TypedGraph};
use hiergraph_hierarchy::{GraphSlot, Hierarchy, HierarchyDocument, LinkEntry};

use crate::error::StorageError;

/// A hierarchy broken into the records the stores persist.
#[derive(Debug, Clone)]
pub struct DecomposedHierarchy {
    pub directed: bool,
    pub attrs: Attrs,
    pub graphs: Vec<(GraphId, GraphDocument)>,
    pub links: Vec<LinkEntry>,
}

/// Splits a hierarchy into storage records.
pub fn decompose(hierarchy: &Hierarchy) -> DecomposedHierarchy {
    let doc = HierarchyDocument::from(hierarchy.clone());
    DecomposedHierarchy {
        directed: doc.directed,
        attrs: doc.attrs,
        graphs: doc
            .graphs
            .into_iter()
            .map(|slot| (slot.id, GraphDocument::from(slot.graph)))
            .collect(),
        links: doc.links,
    }
}

/// Rebuilds and revalidates a hierarchy from storage records.
pub fn recompose(decomposed: DecomposedHierarchy) -> Result<Hierarchy, StorageError> {
    let graphs = decomposed
        .graphs
        .into_iter()
        .map(|(id, doc)| -> Result<GraphSlot, StorageError> {
            Ok(GraphSlot {
                id,
                graph: TypedGraph::try_from(doc)?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let doc = HierarchyDocument {
        directed: decomposed.directed,
        attrs: decomposed.attrs,
        graphs,
        links: decomposed.links,
    };
    Ok(Hierarchy::try_from(doc)?)
}

/// Storage record of a single graph.
pub fn graph_document(graph: &TypedGraph) -> GraphDocument {
    GraphDocument::from(graph.clone())
}

/// Links of `hierarchy` with `id` at either end, in hierarchy order.
pub fn incident_links(hierarchy: &Hierarchy, id: &GraphId) -> Vec<LinkEntry> {
    hierarchy
        .links()
        .into_iter()
        .filter(|(from, to, _)| *from == id || *to == id)
        .map(|(from, to, link)| link.to_entry(from, to))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hiergraph_core::NodeId;
    use hiergraph_hierarchy::LinkSpec;

    fn sample() -> Hierarchy {
        let mut h = Hierarchy::new(true);
        let mut meta = TypedGraph::directed();
        meta.add_node("agent", None, Attrs::new()).unwrap();
        meta.add_edge(&NodeId::from("agent"), &NodeId::from("agent"), Attrs::new())
            .unwrap();
        let mut model = TypedGraph::directed();
        model
            .add_node("alice", Some(NodeId::from("agent")), Attrs::new().with("age", 30))
            .unwrap();
        model.add_node("bob", Some(NodeId::from("agent")), Attrs::new()).unwrap();
        model.add_edge(&NodeId::from("alice"), &NodeId::from("bob"), Attrs::new())
            .unwrap();
        h.add_graph("meta", meta).unwrap();
        h.add_graph("model", model).unwrap();
        h.add_homomorphism(&GraphId::from("model"), &GraphId::from("meta"), LinkSpec::typing())
            .unwrap();
        h.set_attr("name", "people");
        h
    }

    #[test]
    fn recompose_restores_decomposed_hierarchy() {
        let h = sample();
        let rebuilt = recompose(decompose(&h)).unwrap();
        assert_eq!(
            serde_json::to_value(&rebuilt).unwrap(),
            serde_json::to_value(&h).unwrap()
        );
    }

    #[test]
    fn recompose_rejects_broken_links() {
        let mut decomposed = decompose(&sample());
        // The stored typing link still maps bob.
        let (_, model) = decomposed
            .graphs
            .iter_mut()
            .find(|(id, _)| id.as_str() == "model")
            .unwrap();
        model.nodes.retain(|n| n.id.as_str() != "bob");
        model.edges.clear();
        let err = recompose(decomposed).unwrap_err();
        assert!(matches!(err, StorageError::Hierarchy(_)));
    }

    #[test]
    fn incident_links_cover_both_ends() {
        let h = sample();
        assert_eq!(incident_links(&h, &GraphId::from("meta")).len(), 1);
        assert_eq!(incident_links(&h, &GraphId::from("model")).len(), 1);
    }
}

//! Incremental save via dirty detection.
//!
//! Compares graph hashes taken when a hierarchy was loaded (or last saved)
//! with its current state, and writes back only the graphs that changed.
//! A changed link marks its source graph, see [`hash_graph`](crate::hash::hash_graph).

use std::collections::BTreeSet;

use hiergraph_core::GraphId;
use hiergraph_hierarchy::Hierarchy;
use tracing::debug;

use crate::error::StorageError;
use crate::hash::{hash_all_graphs, GraphHashes};
use crate::traits::HierarchyStore;
use crate::types::HierarchyId;

/// The graphs that need saving.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtySet {
    /// Graphs added since the previous hashes were taken.
    pub new: BTreeSet<GraphId>,
    /// Graphs whose content or outgoing links changed.
    pub modified: BTreeSet<GraphId>,
    /// Graphs no longer in the hierarchy.
    pub removed: BTreeSet<GraphId>,
}

impl DirtySet {
    /// Graphs to write (new + modified).
    pub fn needs_save(&self) -> BTreeSet<GraphId> {
        self.new.union(&self.modified).cloned().collect()
    }

    pub fn is_clean(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.new.len() + self.modified.len() + self.removed.len()
    }
}

/// Compares `previous` hashes against the current hierarchy.
pub fn compute_dirty_set(hierarchy: &Hierarchy, previous: &GraphHashes) -> Result<DirtySet, StorageError> {
    let current = hash_all_graphs(hierarchy)?;
    let mut dirty = DirtySet::default();

    for (id, hash) in &current {
        match previous.get(id) {
            Some(prev) if prev != hash => {
                dirty.modified.insert(id.clone());
            }
            Some(_) => {}
            None => {
                dirty.new.insert(id.clone());
            }
        }
    }
    dirty.removed = previous
        .keys()
        .filter(|id| !current.contains_key(*id))
        .cloned()
        .collect();

    Ok(dirty)
}

/// Writes the dirty part of `hierarchy` to `store` and returns what was
/// written.
///
/// New graphs are inserted first so the links written afterwards find both
/// endpoints. Each step is atomic on its own; the sequence is not, and an
/// interrupted save is repaired by a full [`HierarchyStore::save_hierarchy`].
pub fn save_incremental<S: HierarchyStore + ?Sized>(
    store: &mut S,
    id: HierarchyId,
    hierarchy: &Hierarchy,
    previous: &GraphHashes,
) -> Result<DirtySet, StorageError> {
    let dirty = compute_dirty_set(hierarchy, previous)?;

    store.set_attrs(id, hierarchy.attrs())?;
    for graph_id in &dirty.new {
        store.insert_graph(id, graph_id, hierarchy.graph(graph_id)?)?;
    }
    for graph_id in &dirty.removed {
        store.delete_graph(id, graph_id)?;
    }
    for graph_id in dirty.needs_save() {
        store.save_graph(id, hierarchy, &graph_id)?;
    }

    debug!(
        hierarchy = id.0,
        new = dirty.new.len(),
        modified = dirty.modified.len(),
        removed = dirty.removed.len(),
        "incremental save"
    );
    Ok(dirty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use hiergraph_core::{Attrs, NodeId, TypedGraph};
    use hiergraph_hierarchy::{GraphEdit, LinkSpec};

    fn g(name: &str) -> GraphId {
        GraphId::from(name)
    }

    fn chain() -> Hierarchy {
        let mut h = Hierarchy::new(true);
        for id in ["a", "b", "c"] {
            let mut graph = TypedGraph::directed();
            graph.add_node("x", None, Attrs::new()).unwrap();
            h.add_graph(id, graph).unwrap();
        }
        h.add_homomorphism(&g("a"), &g("b"), LinkSpec::identity()).unwrap();
        h.add_homomorphism(&g("b"), &g("c"), LinkSpec::identity()).unwrap();
        h
    }

    #[test]
    fn unchanged_hierarchy_is_clean() {
        let h = chain();
        let hashes = hash_all_graphs(&h).unwrap();
        let dirty = compute_dirty_set(&h, &hashes).unwrap();
        assert!(dirty.is_clean());
        assert_eq!(dirty.total(), 0);
    }

    #[test]
    fn empty_previous_marks_everything_new() {
        let dirty = compute_dirty_set(&chain(), &GraphHashes::new()).unwrap();
        assert_eq!(dirty.new.len(), 3);
        assert!(dirty.modified.is_empty());
    }

    #[test]
    fn edit_marks_only_the_edited_graph() {
        let mut h = chain();
        let hashes = hash_all_graphs(&h).unwrap();
        h.rewrite(&g("c"), &GraphEdit::new().add_node("y", None, Attrs::new()))
            .unwrap();

        let dirty = compute_dirty_set(&h, &hashes).unwrap();
        assert_eq!(dirty.modified, BTreeSet::from([g("c")]));
        assert!(dirty.new.is_empty() && dirty.removed.is_empty());
    }

    #[test]
    fn reconnecting_removal_is_saved_incrementally() {
        let mut store = InMemoryStore::new();
        let id = store.create_hierarchy("chain", true).unwrap();
        let mut h = chain();
        store.save_hierarchy(id, &h).unwrap();
        let hashes = hash_all_graphs(&h).unwrap();

        h.remove_graph(&g("b"), true).unwrap();
        let dirty = save_incremental(&mut store, id, &h, &hashes).unwrap();
        assert_eq!(dirty.removed, BTreeSet::from([g("b")]));
        assert_eq!(dirty.modified, BTreeSet::from([g("a")]));

        let loaded = store.load_hierarchy(id).unwrap();
        assert!(loaded.has_link(&g("a"), &g("c")));
        assert_eq!(
            loaded.homomorphism(&g("a"), &g("c")).unwrap().image(&NodeId::from("x")),
            Some(&NodeId::from("x"))
        );
        assert_eq!(serde_json::to_value(&loaded).unwrap(), serde_json::to_value(&h).unwrap());
    }
}

//! In-memory implementation of [`HierarchyStore`].
//!
//! [`InMemoryStore`] backs tests and one-shot CLI runs where persistence is
//! not needed. It keeps the same decomposed records as the SQLite backend,
//! in insertion-ordered maps, and enforces the same referential rules.

use std::collections::BTreeMap;

use hiergraph_core::graph::GraphDocument;
use hiergraph_core::{Attrs, GraphId, TypedGraph};
use hiergraph_hierarchy::{Hierarchy, LinkEntry};
use indexmap::IndexMap;

use crate::convert::{decompose, graph_document, incident_links, recompose, DecomposedHierarchy};
use crate::error::StorageError;
use crate::traits::HierarchyStore;
use crate::types::{HierarchyId, HierarchySummary};

/// Data stored for a single hierarchy.
#[derive(Debug, Clone)]
struct StoredHierarchy {
    name: String,
    directed: bool,
    attrs: Attrs,
    graphs: IndexMap<GraphId, GraphDocument>,
    links: IndexMap<(GraphId, GraphId), LinkEntry>,
}

impl StoredHierarchy {
    fn new(name: &str, directed: bool) -> Self {
        StoredHierarchy {
            name: name.to_string(),
            directed,
            attrs: Attrs::new(),
            graphs: IndexMap::new(),
            links: IndexMap::new(),
        }
    }

    fn store_decomposed(&mut self, decomposed: DecomposedHierarchy) {
        self.directed = decomposed.directed;
        self.attrs = decomposed.attrs;
        self.graphs = decomposed.graphs.into_iter().collect();
        self.links = decomposed
            .links
            .into_iter()
            .map(|link| ((link.from.clone(), link.to.clone()), link))
            .collect();
    }

    fn to_decomposed(&self) -> DecomposedHierarchy {
        DecomposedHierarchy {
            directed: self.directed,
            attrs: self.attrs.clone(),
            graphs: self
                .graphs
                .iter()
                .map(|(id, doc)| (id.clone(), doc.clone()))
                .collect(),
            links: self.links.values().cloned().collect(),
        }
    }

    fn remove_incident_links(&mut self, graph_id: &GraphId) {
        self.links
            .retain(|(from, to), _| from != graph_id && to != graph_id);
    }
}

/// In-memory [`HierarchyStore`].
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    hierarchies: BTreeMap<i64, StoredHierarchy>,
    next_id: i64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore {
            hierarchies: BTreeMap::new(),
            next_id: 1,
        }
    }

    fn stored(&self, id: HierarchyId) -> Result<&StoredHierarchy, StorageError> {
        self.hierarchies
            .get(&id.0)
            .ok_or(StorageError::HierarchyNotFound(id.0))
    }

    fn stored_mut(&mut self, id: HierarchyId) -> Result<&mut StoredHierarchy, StorageError> {
        self.hierarchies
            .get_mut(&id.0)
            .ok_or(StorageError::HierarchyNotFound(id.0))
    }

    fn check_endpoints(stored: &StoredHierarchy, id: HierarchyId, link: &LinkEntry) -> Result<(), StorageError> {
        for graph in [&link.from, &link.to] {
            if !stored.graphs.contains_key(graph) {
                return Err(StorageError::GraphNotFound {
                    hierarchy: id.0,
                    graph: graph.clone(),
                });
            }
        }
        Ok(())
    }
}

impl HierarchyStore for InMemoryStore {
    fn create_hierarchy(&mut self, name: &str, directed: bool) -> Result<HierarchyId, StorageError> {
        if self.hierarchies.values().any(|stored| stored.name == name) {
            return Err(StorageError::DuplicateHierarchy(name.to_string()));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.hierarchies.insert(id, StoredHierarchy::new(name, directed));
        Ok(HierarchyId(id))
    }

    fn load_hierarchy(&self, id: HierarchyId) -> Result<Hierarchy, StorageError> {
        recompose(self.stored(id)?.to_decomposed())
    }

    fn delete_hierarchy(&mut self, id: HierarchyId) -> Result<(), StorageError> {
        self.hierarchies
            .remove(&id.0)
            .map(|_| ())
            .ok_or(StorageError::HierarchyNotFound(id.0))
    }

    fn list_hierarchies(&self) -> Result<Vec<HierarchySummary>, StorageError> {
        Ok(self
            .hierarchies
            .iter()
            .map(|(&id, stored)| HierarchySummary {
                id: HierarchyId(id),
                name: stored.name.clone(),
                directed: stored.directed,
                graph_count: stored.graphs.len(),
                link_count: stored.links.len(),
            })
            .collect())
    }

    fn set_attrs(&mut self, id: HierarchyId, attrs: &Attrs) -> Result<(), StorageError> {
        self.stored_mut(id)?.attrs = attrs.clone();
        Ok(())
    }

    fn save_hierarchy(&mut self, id: HierarchyId, hierarchy: &Hierarchy) -> Result<(), StorageError> {
        self.stored_mut(id)?.store_decomposed(decompose(hierarchy));
        Ok(())
    }

    fn save_graph(
        &mut self,
        id: HierarchyId,
        hierarchy: &Hierarchy,
        graph_id: &GraphId,
    ) -> Result<(), StorageError> {
        let graph = hierarchy.graph(graph_id)?;
        let links = incident_links(hierarchy, graph_id);
        // Validate before touching anything so a failure leaves the store as is.
        let mut staged = self.stored(id)?.clone();
        staged
            .graphs
            .insert(graph_id.clone(), graph_document(graph));
        staged.remove_incident_links(graph_id);
        for link in links {
            Self::check_endpoints(&staged, id, &link)?;
            staged
                .links
                .insert((link.from.clone(), link.to.clone()), link);
        }
        *self.stored_mut(id)? = staged;
        Ok(())
    }

    fn insert_graph(
        &mut self,
        id: HierarchyId,
        graph_id: &GraphId,
        graph: &TypedGraph,
    ) -> Result<(), StorageError> {
        self.stored_mut(id)?
            .graphs
            .insert(graph_id.clone(), graph_document(graph));
        Ok(())
    }

    fn get_graph(&self, id: HierarchyId, graph_id: &GraphId) -> Result<TypedGraph, StorageError> {
        let doc = self
            .stored(id)?
            .graphs
            .get(graph_id)
            .ok_or_else(|| StorageError::GraphNotFound {
                hierarchy: id.0,
                graph: graph_id.clone(),
            })?;
        Ok(TypedGraph::try_from(doc.clone())?)
    }

    fn delete_graph(&mut self, id: HierarchyId, graph_id: &GraphId) -> Result<(), StorageError> {
        let stored = self.stored_mut(id)?;
        if stored.graphs.shift_remove(graph_id).is_none() {
            return Err(StorageError::GraphNotFound {
                hierarchy: id.0,
                graph: graph_id.clone(),
            });
        }
        stored.remove_incident_links(graph_id);
        Ok(())
    }

    fn list_graphs(&self, id: HierarchyId) -> Result<Vec<GraphId>, StorageError> {
        Ok(self.stored(id)?.graphs.keys().cloned().collect())
    }

    fn insert_link(&mut self, id: HierarchyId, link: &LinkEntry) -> Result<(), StorageError> {
        let stored = self.stored_mut(id)?;
        Self::check_endpoints(stored, id, link)?;
        stored
            .links
            .insert((link.from.clone(), link.to.clone()), link.clone());
        Ok(())
    }

    fn get_link(
        &self,
        id: HierarchyId,
        from: &GraphId,
        to: &GraphId,
    ) -> Result<LinkEntry, StorageError> {
        self.stored(id)?
            .links
            .get(&(from.clone(), to.clone()))
            .cloned()
            .ok_or_else(|| StorageError::LinkNotFound {
                hierarchy: id.0,
                from: from.clone(),
                to: to.clone(),
            })
    }

    fn delete_link(&mut self, id: HierarchyId, from: &GraphId, to: &GraphId) -> Result<(), StorageError> {
        self.stored_mut(id)?
            .links
            .shift_remove(&(from.clone(), to.clone()))
            .map(|_| ())
            .ok_or_else(|| StorageError::LinkNotFound {
                hierarchy: id.0,
                from: from.clone(),
                to: to.clone(),
            })
    }

    fn list_links(&self, id: HierarchyId) -> Result<Vec<LinkEntry>, StorageError> {
        Ok(self.stored(id)?.links.values().cloned().collect())
    }
}

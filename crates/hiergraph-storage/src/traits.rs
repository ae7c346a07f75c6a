//! The [`HierarchyStore`] trait defining the storage contract for hierarchies.
//!
//! Two-layer API design:
//! - **Low-level CRUD** methods on graphs and links. Each call replaces one
//!   graph (with its nodes and edges) or one link, and is the unit the
//!   incremental save in [`crate::dirty`] is built from.
//! - **High-level** methods (`save_hierarchy`, `load_hierarchy`,
//!   `save_graph`) move whole hierarchies, or one graph together with its
//!   incident links.
//!
//! [`InMemoryStore`](crate::InMemoryStore) and
//! [`SqliteStore`](crate::SqliteStore) implement this trait with identical
//! semantics.

use hiergraph_core::{Attrs, GraphId, TypedGraph};
use hiergraph_hierarchy::{Hierarchy, LinkEntry};

use crate::error::StorageError;
use crate::types::{HierarchyId, HierarchySummary};

/// The storage contract for hierarchies.
///
/// The trait is synchronous; a store is owned by one caller at a time.
/// Stores do not validate homomorphisms on write. Validation happens when
/// a hierarchy is loaded.
pub trait HierarchyStore {
    // -------------------------------------------------------------------
    // Hierarchy-level operations
    // -------------------------------------------------------------------

    /// Creates a new empty hierarchy with a unique name.
    fn create_hierarchy(&mut self, name: &str, directed: bool) -> Result<HierarchyId, StorageError>;

    /// Loads and revalidates a complete hierarchy.
    fn load_hierarchy(&self, id: HierarchyId) -> Result<Hierarchy, StorageError>;

    /// Deletes a hierarchy with all its graphs and links.
    fn delete_hierarchy(&mut self, id: HierarchyId) -> Result<(), StorageError>;

    /// Lists stored hierarchies ordered by ID.
    fn list_hierarchies(&self) -> Result<Vec<HierarchySummary>, StorageError>;

    /// Looks up a hierarchy by name.
    fn find_hierarchy(&self, name: &str) -> Result<Option<HierarchyId>, StorageError> {
        Ok(self
            .list_hierarchies()?
            .into_iter()
            .find(|summary| summary.name == name)
            .map(|summary| summary.id))
    }

    /// Replaces the hierarchy-level attributes.
    fn set_attrs(&mut self, id: HierarchyId, attrs: &Attrs) -> Result<(), StorageError>;

    // -------------------------------------------------------------------
    // High-level operations
    // -------------------------------------------------------------------

    /// Overwrites every graph and link of `id` with `hierarchy`.
    fn save_hierarchy(&mut self, id: HierarchyId, hierarchy: &Hierarchy) -> Result<(), StorageError>;

    /// Saves one graph of `hierarchy` and replaces the stored links incident
    /// to it with the hierarchy's current ones.
    ///
    /// The other endpoint of every incident link must already be stored.
    fn save_graph(
        &mut self,
        id: HierarchyId,
        hierarchy: &Hierarchy,
        graph_id: &GraphId,
    ) -> Result<(), StorageError>;

    // -------------------------------------------------------------------
    // Graph CRUD
    // -------------------------------------------------------------------

    /// Inserts a graph, or replaces its nodes and edges if it exists.
    ///
    /// A replaced graph keeps its position and its links.
    fn insert_graph(
        &mut self,
        id: HierarchyId,
        graph_id: &GraphId,
        graph: &TypedGraph,
    ) -> Result<(), StorageError>;

    /// Retrieves a graph by ID.
    fn get_graph(&self, id: HierarchyId, graph_id: &GraphId) -> Result<TypedGraph, StorageError>;

    /// Deletes a graph and every link incident to it.
    fn delete_graph(&mut self, id: HierarchyId, graph_id: &GraphId) -> Result<(), StorageError>;

    /// IDs of the stored graphs in insertion order.
    fn list_graphs(&self, id: HierarchyId) -> Result<Vec<GraphId>, StorageError>;

    // -------------------------------------------------------------------
    // Link CRUD
    // -------------------------------------------------------------------

    /// Inserts a link, or replaces the stored link between the same graphs.
    ///
    /// Both endpoints must be stored.
    fn insert_link(&mut self, id: HierarchyId, link: &LinkEntry) -> Result<(), StorageError>;

    /// Retrieves the link `from -> to`.
    fn get_link(
        &self,
        id: HierarchyId,
        from: &GraphId,
        to: &GraphId,
    ) -> Result<LinkEntry, StorageError>;

    /// Deletes the link `from -> to`.
    fn delete_link(&mut self, id: HierarchyId, from: &GraphId, to: &GraphId) -> Result<(), StorageError>;

    /// All stored links in insertion order.
    fn list_links(&self, id: HierarchyId) -> Result<Vec<LinkEntry>, StorageError>;
}

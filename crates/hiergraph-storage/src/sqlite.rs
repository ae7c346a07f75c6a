//! SQLite implementation of [`HierarchyStore`].
//!
//! [`SqliteStore`] persists hierarchies in a SQLite database with WAL mode,
//! a transaction around every write, and automatic schema migrations.
//! Graphs are decomposed into node and edge rows; attribute sets and
//! homomorphisms are stored as JSON TEXT columns via serde_json.

use hiergraph_core::graph::{EdgeData, GraphDocument, NodeData};
use hiergraph_core::{Attrs, GraphId, NodeId, TypedGraph};
use hiergraph_hierarchy::{Hierarchy, LinkEntry};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::convert::{decompose, graph_document, incident_links, recompose, DecomposedHierarchy};
use crate::error::StorageError;
use crate::traits::HierarchyStore;
use crate::types::{HierarchyId, HierarchySummary};

/// SQLite-backed implementation of [`HierarchyStore`].
///
/// Every write operation is wrapped in a transaction for atomicity.
/// The database uses WAL mode and foreign keys with cascading deletes.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at `path`.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = crate::schema::open_database(path)?;
        Ok(SqliteStore { conn })
    }

    /// Opens an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = crate::schema::open_in_memory()?;
        Ok(SqliteStore { conn })
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------
//
// The helpers take a `&Connection` so they run unchanged inside a
// `Transaction`.

fn assert_hierarchy_exists(conn: &Connection, id: HierarchyId) -> Result<(), StorageError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM hierarchies WHERE id = ?1)",
        params![id.0],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(StorageError::HierarchyNotFound(id.0));
    }
    Ok(())
}

fn graph_exists(conn: &Connection, id: HierarchyId, graph_id: &GraphId) -> Result<bool, StorageError> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM graphs WHERE hierarchy_id = ?1 AND graph_id = ?2)",
        params![id.0, graph_id.as_str()],
        |row| row.get(0),
    )?)
}

/// Upserts the graph row and rewrites its nodes and edges.
fn write_graph(
    conn: &Connection,
    id: HierarchyId,
    graph_id: &GraphId,
    doc: &GraphDocument,
) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO graphs (hierarchy_id, graph_id, position, directed, metamodel)
         VALUES (?1, ?2,
                 (SELECT COALESCE(MAX(position) + 1, 0) FROM graphs WHERE hierarchy_id = ?1),
                 ?3, ?4)
         ON CONFLICT (hierarchy_id, graph_id)
         DO UPDATE SET directed = excluded.directed, metamodel = excluded.metamodel",
        params![
            id.0,
            graph_id.as_str(),
            doc.directed,
            doc.metamodel.as_ref().map(GraphId::as_str)
        ],
    )?;
    conn.execute(
        "DELETE FROM edges WHERE hierarchy_id = ?1 AND graph_id = ?2",
        params![id.0, graph_id.as_str()],
    )?;
    conn.execute(
        "DELETE FROM nodes WHERE hierarchy_id = ?1 AND graph_id = ?2",
        params![id.0, graph_id.as_str()],
    )?;

    let mut insert_node = conn.prepare(
        "INSERT INTO nodes (hierarchy_id, graph_id, node_id, position, node_type, attrs)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for (position, node) in doc.nodes.iter().enumerate() {
        insert_node.execute(params![
            id.0,
            graph_id.as_str(),
            node.id.as_str(),
            position as i64,
            node.node_type.as_ref().map(NodeId::as_str),
            serde_json::to_string(&node.attrs)?,
        ])?;
    }

    let mut insert_edge = conn.prepare(
        "INSERT INTO edges (hierarchy_id, graph_id, position, source, target, attrs)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for (position, edge) in doc.edges.iter().enumerate() {
        insert_edge.execute(params![
            id.0,
            graph_id.as_str(),
            position as i64,
            edge.source.as_str(),
            edge.target.as_str(),
            serde_json::to_string(&edge.attrs)?,
        ])?;
    }
    Ok(())
}

fn read_graph(
    conn: &Connection,
    id: HierarchyId,
    graph_id: &GraphId,
) -> Result<Option<GraphDocument>, StorageError> {
    let header = conn
        .query_row(
            "SELECT directed, metamodel FROM graphs WHERE hierarchy_id = ?1 AND graph_id = ?2",
            params![id.0, graph_id.as_str()],
            |row| Ok((row.get::<_, bool>(0)?, row.get::<_, Option<String>>(1)?)),
        )
        .optional()?;
    let Some((directed, metamodel)) = header else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT node_id, node_type, attrs FROM nodes
         WHERE hierarchy_id = ?1 AND graph_id = ?2 ORDER BY position",
    )?;
    let node_rows = stmt
        .query_map(params![id.0, graph_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut nodes = Vec::with_capacity(node_rows.len());
    for (node_id, node_type, attrs) in node_rows {
        nodes.push(NodeData {
            id: NodeId(node_id),
            node_type: node_type.map(NodeId),
            attrs: serde_json::from_str(&attrs)?,
        });
    }

    let mut stmt = conn.prepare(
        "SELECT source, target, attrs FROM edges
         WHERE hierarchy_id = ?1 AND graph_id = ?2 ORDER BY position",
    )?;
    let edge_rows = stmt
        .query_map(params![id.0, graph_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut edges = Vec::with_capacity(edge_rows.len());
    for (source, target, attrs) in edge_rows {
        edges.push(EdgeData {
            source: NodeId(source),
            target: NodeId(target),
            attrs: serde_json::from_str(&attrs)?,
        });
    }

    Ok(Some(GraphDocument {
        directed,
        metamodel: metamodel.map(GraphId),
        nodes,
        edges,
    }))
}

fn read_graph_ids(conn: &Connection, id: HierarchyId) -> Result<Vec<GraphId>, StorageError> {
    let mut stmt =
        conn.prepare("SELECT graph_id FROM graphs WHERE hierarchy_id = ?1 ORDER BY position")?;
    let ids = stmt
        .query_map(params![id.0], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids.into_iter().map(GraphId).collect())
}

/// Upserts a link after checking that both endpoints are stored.
fn write_link(conn: &Connection, id: HierarchyId, link: &LinkEntry) -> Result<(), StorageError> {
    for graph in [&link.from, &link.to] {
        if !graph_exists(conn, id, graph)? {
            return Err(StorageError::GraphNotFound {
                hierarchy: id.0,
                graph: graph.clone(),
            });
        }
    }
    let pending = link
        .pending
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "INSERT INTO links (hierarchy_id, from_graph, to_graph, position, homomorphism, pending)
         VALUES (?1, ?2, ?3,
                 (SELECT COALESCE(MAX(position) + 1, 0) FROM links WHERE hierarchy_id = ?1),
                 ?4, ?5)
         ON CONFLICT (hierarchy_id, from_graph, to_graph)
         DO UPDATE SET homomorphism = excluded.homomorphism, pending = excluded.pending",
        params![
            id.0,
            link.from.as_str(),
            link.to.as_str(),
            serde_json::to_string(&link.homomorphism)?,
            pending,
        ],
    )?;
    Ok(())
}

fn link_from_row(from: String, to: String, homomorphism: String, pending: Option<String>) -> Result<LinkEntry, StorageError> {
    Ok(LinkEntry {
        from: GraphId(from),
        to: GraphId(to),
        homomorphism: serde_json::from_str(&homomorphism)?,
        pending: pending.map(|p| serde_json::from_str(&p)).transpose()?,
    })
}

type LinkRow = (String, String, String, Option<String>);

fn link_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LinkRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn read_links(conn: &Connection, id: HierarchyId) -> Result<Vec<LinkEntry>, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT from_graph, to_graph, homomorphism, pending FROM links
         WHERE hierarchy_id = ?1 ORDER BY position",
    )?;
    let rows = stmt
        .query_map(params![id.0], link_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(from, to, homomorphism, pending)| link_from_row(from, to, homomorphism, pending))
        .collect()
}

fn write_decomposed(
    conn: &Connection,
    id: HierarchyId,
    decomposed: &DecomposedHierarchy,
) -> Result<(), StorageError> {
    conn.execute(
        "UPDATE hierarchies SET directed = ?2, attrs = ?3 WHERE id = ?1",
        params![id.0, decomposed.directed, serde_json::to_string(&decomposed.attrs)?],
    )?;
    // Cascades to nodes, edges and links.
    conn.execute("DELETE FROM graphs WHERE hierarchy_id = ?1", params![id.0])?;
    for (graph_id, doc) in &decomposed.graphs {
        write_graph(conn, id, graph_id, doc)?;
    }
    for link in &decomposed.links {
        write_link(conn, id, link)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// HierarchyStore
// ---------------------------------------------------------------------------

impl HierarchyStore for SqliteStore {
    fn create_hierarchy(&mut self, name: &str, directed: bool) -> Result<HierarchyId, StorageError> {
        let tx = self.conn.transaction()?;
        let taken: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM hierarchies WHERE name = ?1)",
            params![name],
            |row| row.get(0),
        )?;
        if taken {
            return Err(StorageError::DuplicateHierarchy(name.to_string()));
        }
        tx.execute(
            "INSERT INTO hierarchies (name, directed) VALUES (?1, ?2)",
            params![name, directed],
        )?;
        let id = HierarchyId(tx.last_insert_rowid());
        tx.commit()?;
        debug!(hierarchy = id.0, name, "created hierarchy");
        Ok(id)
    }

    fn load_hierarchy(&self, id: HierarchyId) -> Result<Hierarchy, StorageError> {
        let header = self
            .conn
            .query_row(
                "SELECT directed, attrs FROM hierarchies WHERE id = ?1",
                params![id.0],
                |row| Ok((row.get::<_, bool>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        let Some((directed, attrs)) = header else {
            return Err(StorageError::HierarchyNotFound(id.0));
        };

        let mut graphs = Vec::new();
        for graph_id in read_graph_ids(&self.conn, id)? {
            if let Some(doc) = read_graph(&self.conn, id, &graph_id)? {
                graphs.push((graph_id, doc));
            }
        }
        let decomposed = DecomposedHierarchy {
            directed,
            attrs: serde_json::from_str::<Attrs>(&attrs)?,
            graphs,
            links: read_links(&self.conn, id)?,
        };
        debug!(
            hierarchy = id.0,
            graphs = decomposed.graphs.len(),
            links = decomposed.links.len(),
            "loaded hierarchy"
        );
        recompose(decomposed)
    }

    fn delete_hierarchy(&mut self, id: HierarchyId) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        let deleted = tx.execute("DELETE FROM hierarchies WHERE id = ?1", params![id.0])?;
        if deleted == 0 {
            return Err(StorageError::HierarchyNotFound(id.0));
        }
        tx.commit()?;
        Ok(())
    }

    fn list_hierarchies(&self) -> Result<Vec<HierarchySummary>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT h.id, h.name, h.directed,
                    (SELECT COUNT(*) FROM graphs g WHERE g.hierarchy_id = h.id),
                    (SELECT COUNT(*) FROM links l WHERE l.hierarchy_id = h.id)
             FROM hierarchies h ORDER BY h.id",
        )?;
        let summaries = stmt
            .query_map([], |row| {
                Ok(HierarchySummary {
                    id: HierarchyId(row.get(0)?),
                    name: row.get(1)?,
                    directed: row.get(2)?,
                    graph_count: row.get::<_, i64>(3)? as usize,
                    link_count: row.get::<_, i64>(4)? as usize,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(summaries)
    }

    fn find_hierarchy(&self, name: &str) -> Result<Option<HierarchyId>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM hierarchies WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?
            .map(HierarchyId))
    }

    fn set_attrs(&mut self, id: HierarchyId, attrs: &Attrs) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        let updated = tx.execute(
            "UPDATE hierarchies SET attrs = ?2 WHERE id = ?1",
            params![id.0, serde_json::to_string(attrs)?],
        )?;
        if updated == 0 {
            return Err(StorageError::HierarchyNotFound(id.0));
        }
        tx.commit()?;
        Ok(())
    }

    fn save_hierarchy(&mut self, id: HierarchyId, hierarchy: &Hierarchy) -> Result<(), StorageError> {
        let decomposed = decompose(hierarchy);
        let tx = self.conn.transaction()?;
        assert_hierarchy_exists(&tx, id)?;
        write_decomposed(&tx, id, &decomposed)?;
        tx.commit()?;
        debug!(
            hierarchy = id.0,
            graphs = decomposed.graphs.len(),
            links = decomposed.links.len(),
            "saved hierarchy"
        );
        Ok(())
    }

    fn save_graph(
        &mut self,
        id: HierarchyId,
        hierarchy: &Hierarchy,
        graph_id: &GraphId,
    ) -> Result<(), StorageError> {
        let doc = graph_document(hierarchy.graph(graph_id)?);
        let links = incident_links(hierarchy, graph_id);

        let tx = self.conn.transaction()?;
        assert_hierarchy_exists(&tx, id)?;
        write_graph(&tx, id, graph_id, &doc)?;
        tx.execute(
            "DELETE FROM links WHERE hierarchy_id = ?1 AND (from_graph = ?2 OR to_graph = ?2)",
            params![id.0, graph_id.as_str()],
        )?;
        for link in &links {
            write_link(&tx, id, link)?;
        }
        tx.commit()?;
        debug!(hierarchy = id.0, graph = %graph_id, links = links.len(), "saved graph");
        Ok(())
    }

    fn insert_graph(
        &mut self,
        id: HierarchyId,
        graph_id: &GraphId,
        graph: &TypedGraph,
    ) -> Result<(), StorageError> {
        let doc = graph_document(graph);
        let tx = self.conn.transaction()?;
        assert_hierarchy_exists(&tx, id)?;
        write_graph(&tx, id, graph_id, &doc)?;
        tx.commit()?;
        Ok(())
    }

    fn get_graph(&self, id: HierarchyId, graph_id: &GraphId) -> Result<TypedGraph, StorageError> {
        assert_hierarchy_exists(&self.conn, id)?;
        let doc = read_graph(&self.conn, id, graph_id)?.ok_or_else(|| StorageError::GraphNotFound {
            hierarchy: id.0,
            graph: graph_id.clone(),
        })?;
        Ok(TypedGraph::try_from(doc)?)
    }

    fn delete_graph(&mut self, id: HierarchyId, graph_id: &GraphId) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        assert_hierarchy_exists(&tx, id)?;
        let deleted = tx.execute(
            "DELETE FROM graphs WHERE hierarchy_id = ?1 AND graph_id = ?2",
            params![id.0, graph_id.as_str()],
        )?;
        if deleted == 0 {
            return Err(StorageError::GraphNotFound {
                hierarchy: id.0,
                graph: graph_id.clone(),
            });
        }
        tx.commit()?;
        Ok(())
    }

    fn list_graphs(&self, id: HierarchyId) -> Result<Vec<GraphId>, StorageError> {
        assert_hierarchy_exists(&self.conn, id)?;
        read_graph_ids(&self.conn, id)
    }

    fn insert_link(&mut self, id: HierarchyId, link: &LinkEntry) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        assert_hierarchy_exists(&tx, id)?;
        write_link(&tx, id, link)?;
        tx.commit()?;
        Ok(())
    }

    fn get_link(
        &self,
        id: HierarchyId,
        from: &GraphId,
        to: &GraphId,
    ) -> Result<LinkEntry, StorageError> {
        assert_hierarchy_exists(&self.conn, id)?;
        let row = self
            .conn
            .query_row(
                "SELECT from_graph, to_graph, homomorphism, pending FROM links
                 WHERE hierarchy_id = ?1 AND from_graph = ?2 AND to_graph = ?3",
                params![id.0, from.as_str(), to.as_str()],
                link_row,
            )
            .optional()?;
        let (from_graph, to_graph, homomorphism, pending) =
            row.ok_or_else(|| StorageError::LinkNotFound {
                hierarchy: id.0,
                from: from.clone(),
                to: to.clone(),
            })?;
        link_from_row(from_graph, to_graph, homomorphism, pending)
    }

    fn delete_link(&mut self, id: HierarchyId, from: &GraphId, to: &GraphId) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        assert_hierarchy_exists(&tx, id)?;
        let deleted = tx.execute(
            "DELETE FROM links WHERE hierarchy_id = ?1 AND from_graph = ?2 AND to_graph = ?3",
            params![id.0, from.as_str(), to.as_str()],
        )?;
        if deleted == 0 {
            return Err(StorageError::LinkNotFound {
                hierarchy: id.0,
                from: from.clone(),
                to: to.clone(),
            });
        }
        tx.commit()?;
        Ok(())
    }

    fn list_links(&self, id: HierarchyId) -> Result<Vec<LinkEntry>, StorageError> {
        assert_hierarchy_exists(&self.conn, id)?;
        read_links(&self.conn, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hiergraph_hierarchy::LinkSpec;

    fn g(name: &str) -> GraphId {
        GraphId::from(name)
    }

    fn n(name: &str) -> NodeId {
        NodeId::from(name)
    }

    /// model -> meta typing, with attributes on both levels.
    fn people() -> Hierarchy {
        let mut meta = TypedGraph::directed();
        meta.add_node("agent", None, Attrs::new().with("kind", "class")).unwrap();
        meta.add_edge(&n("agent"), &n("agent"), Attrs::new().with("rel", "knows"))
            .unwrap();
        let mut model = TypedGraph::directed();
        model.add_node("bob", Some(n("agent")), Attrs::new()).unwrap();
        model.add_node("alice", Some(n("agent")), Attrs::new()).unwrap();
        model.add_edge(&n("alice"), &n("bob"), Attrs::new().with("rel", "knows"))
            .unwrap();

        let mut h = Hierarchy::new(true);
        h.add_graph("meta", meta).unwrap();
        h.add_graph("model", model).unwrap();
        h.add_homomorphism(&g("model"), &g("meta"), LinkSpec::typing()).unwrap();
        h.set_attr("domain", "people");
        h
    }

    #[test]
    fn save_and_load_preserve_order_and_attributes() {
        let mut store = SqliteStore::in_memory().unwrap();
        let id = store.create_hierarchy("people", true).unwrap();
        let h = people();
        store.save_hierarchy(id, &h).unwrap();

        let loaded = store.load_hierarchy(id).unwrap();
        assert_eq!(serde_json::to_value(&loaded).unwrap(), serde_json::to_value(&h).unwrap());
        let model = loaded.graph(&g("model")).unwrap();
        assert_eq!(model.nodes().collect::<Vec<_>>(), vec![&n("bob"), &n("alice")]);

        let summaries = store.list_hierarchies().unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].graph_count, 2);
        assert_eq!(summaries[0].link_count, 1);
    }

    #[test]
    fn insert_graph_keeps_position_and_links() {
        let mut store = SqliteStore::in_memory().unwrap();
        let id = store.create_hierarchy("people", true).unwrap();
        let h = people();
        store.save_hierarchy(id, &h).unwrap();

        let mut meta = h.graph(&g("meta")).unwrap().clone();
        meta.add_node("place", None, Attrs::new()).unwrap();
        store.insert_graph(id, &g("meta"), &meta).unwrap();

        assert_eq!(store.list_graphs(id).unwrap(), vec![g("meta"), g("model")]);
        assert_eq!(store.list_links(id).unwrap().len(), 1);
        assert!(store.get_graph(id, &g("meta")).unwrap().has_node(&n("place")));
    }

    #[test]
    fn deleting_a_graph_cascades_to_links() {
        let mut store = SqliteStore::in_memory().unwrap();
        let id = store.create_hierarchy("people", true).unwrap();
        store.save_hierarchy(id, &people()).unwrap();

        store.delete_graph(id, &g("meta")).unwrap();
        assert!(store.list_links(id).unwrap().is_empty());
        assert!(matches!(
            store.get_link(id, &g("model"), &g("meta")),
            Err(StorageError::LinkNotFound { .. })
        ));
        assert!(matches!(
            store.delete_graph(id, &g("meta")),
            Err(StorageError::GraphNotFound { .. })
        ));
    }

    #[test]
    fn failed_write_rolls_back() {
        let mut store = SqliteStore::in_memory().unwrap();
        let id = store.create_hierarchy("people", true).unwrap();
        let h = people();

        // meta is not stored yet, so the link write fails after the graph row
        // has been written.
        let err = store.save_graph(id, &h, &g("model")).unwrap_err();
        assert!(matches!(err, StorageError::GraphNotFound { graph, .. } if graph == g("meta")));
        assert!(store.list_graphs(id).unwrap().is_empty());
    }

    #[test]
    fn unknown_hierarchy_is_reported() {
        let mut store = SqliteStore::in_memory().unwrap();
        assert!(matches!(
            store.load_hierarchy(HierarchyId(7)),
            Err(StorageError::HierarchyNotFound(7))
        ));
        assert!(matches!(
            store.delete_hierarchy(HierarchyId(7)),
            Err(StorageError::HierarchyNotFound(7))
        ));
        assert_eq!(store.find_hierarchy("nope").unwrap(), None);
    }

    #[test]
    fn data_survives_reopening_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.db");
        let path = path.to_str().unwrap();
        let h = people();
        let id = {
            let mut store = SqliteStore::new(path).unwrap();
            let id = store.create_hierarchy("people", true).unwrap();
            store.save_hierarchy(id, &h).unwrap();
            id
        };

        let store = SqliteStore::new(path).unwrap();
        assert_eq!(store.find_hierarchy("people").unwrap(), Some(id));
        let loaded = store.load_hierarchy(id).unwrap();
        assert_eq!(loaded.attrs(), h.attrs());
        assert!(loaded.homomorphism(&g("model"), &g("meta")).unwrap().is_typing());
    }
}

//! Persistent storage for hiergraph hierarchies.
//!
//! Provides the [`HierarchyStore`] trait as the storage contract, with
//! [`InMemoryStore`] and [`SqliteStore`] as swappable backends, plus
//! blake3 content hashing and incremental saves of changed graphs.
//!
//! # Architecture
//!
//! - **Trait-based**: callers work against [`HierarchyStore`] and never see
//!   the backend.
//! - **Decomposed rows**: graphs are stored as node and edge rows, links as
//!   JSON homomorphisms; loading revalidates every link.
//! - **Derived hashes**: hashes are computed on demand and never persisted.
//!
//! # Modules
//!
//! - [`convert`]: hierarchy to storage records and back
//! - [`dirty`]: dirty detection and incremental save
//! - [`error`]: [`StorageError`]
//! - [`hash`]: blake3 content hashing
//! - [`memory`]: [`InMemoryStore`]
//! - [`schema`]: SQLite migrations
//! - [`sqlite`]: [`SqliteStore`]
//! - [`traits`]: [`HierarchyStore`]
//! - [`types`]: [`HierarchyId`] and [`HierarchySummary`]

pub mod convert;
pub mod dirty;
pub mod error;
pub mod hash;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;
pub mod types;

// Re-export key types for ergonomic use.
pub use dirty::{compute_dirty_set, save_incremental, DirtySet};
pub use error::StorageError;
pub use hash::{hash_all_graphs, hash_graph, hash_hierarchy, GraphHashes};
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::HierarchyStore;
pub use types::{HierarchyId, HierarchySummary};

//! Core graph and homomorphism types for hiergraph.
//!
//! Typed attributed graphs addressed by node name, validated homomorphisms
//! between them and their composition.

pub mod attrs;
pub mod compose;
pub mod error;
pub mod graph;
pub mod homomorphism;
pub mod id;

pub use attrs::{AttrValue, Attrs};
pub use compose::{compose, Composition};
pub use error::{CoreError, InvalidReason};
pub use graph::TypedGraph;
pub use homomorphism::{validate, Homomorphism, Mapping, MorphismKind};
pub use id::{GraphId, NodeId};

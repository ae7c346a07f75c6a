//! Homomorphisms between typed graphs.
//!
//! A [`Homomorphism`] stores only the node mapping and its policy flags. The
//! graphs it relates are owned elsewhere (by a hierarchy slot) and are
//! borrowed while the mapping is validated, so a homomorphism is always
//! validated against the graphs it is attached to and never aliases them.
//!
//! Whether a mapping is a typing homomorphism is part of its value
//! ([`MorphismKind`]) rather than something inspected at run time.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::attrs::Attrs;
use crate::error::{CoreError, InvalidReason};
use crate::graph::TypedGraph;
use crate::id::NodeId;

/// Node mapping from a source graph to a target graph.
pub type Mapping = IndexMap<NodeId, NodeId>;

/// Distinguishes plain homomorphisms from typing homomorphisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MorphismKind {
    /// Explicit or identity mapping.
    Plain { ignore_types: bool },
    /// Mapping derived from the source nodes' declared types.
    Typing,
}

/// A validated structure-preserving node mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Homomorphism {
    #[serde(flatten)]
    kind: MorphismKind,
    #[serde(default)]
    ignore_attrs: bool,
    mapping: Mapping,
}

/// Checks that `mapping` is a homomorphism from `source` to `target`.
///
/// Checks run in a fixed order and stop at the first failure: coverage,
/// image containment, connectivity, types, node attributes, edge
/// attributes. The type check is skipped when `ignore_types` is set and
/// both attribute checks are skipped when `ignore_attrs` is set.
pub fn validate(
    source: &TypedGraph,
    target: &TypedGraph,
    mapping: &Mapping,
    ignore_types: bool,
    ignore_attrs: bool,
) -> Result<(), CoreError> {
    // 1. Coverage.
    if let Some(missing) = source.nodes().find(|n| !mapping.contains_key(*n)) {
        return Err(CoreError::invalid(
            InvalidReason::Coverage,
            format!("source node '{}' is not mapped", missing),
        ));
    }
    if let Some(extra) = mapping.keys().find(|n| !source.has_node(n)) {
        return Err(CoreError::invalid(
            InvalidReason::Coverage,
            format!("mapped node '{}' is not in the source graph", extra),
        ));
    }

    // 2. Image containment.
    if let Some((node, image)) = mapping.iter().find(|(_, image)| !target.has_node(image)) {
        return Err(CoreError::invalid(
            InvalidReason::Image,
            format!("'{}' maps to '{}', which is not in the target graph", node, image),
        ));
    }

    // 3. Connectivity. `has_edge` accepts both orientations when the target
    // is undirected.
    for (a, b, _) in source.edges() {
        let (ia, ib) = (&mapping[a], &mapping[b]);
        if !target.has_edge(ia, ib) {
            return Err(CoreError::invalid(
                InvalidReason::Connectivity,
                format!("edge '{}'->'{}' has no image edge '{}'->'{}'", a, b, ia, ib),
            ));
        }
    }

    // 4. Types.
    if !ignore_types {
        for (node, image) in mapping {
            let Some(declared) = source.node_type(node) else {
                continue;
            };
            if target.node_type(image) != Some(declared) {
                return Err(CoreError::invalid(
                    InvalidReason::Type,
                    format!(
                        "'{}' has type '{}' but its image '{}' has type {}",
                        node,
                        declared,
                        image,
                        target
                            .node_type(image)
                            .map_or_else(|| "none".to_string(), |t| format!("'{}'", t)),
                    ),
                ));
            }
        }
    }

    if ignore_attrs {
        return Ok(());
    }

    // 5. Node attributes.
    let empty = Attrs::new();
    for (node, image) in mapping {
        let ours = source.node_attrs(node).unwrap_or(&empty);
        let theirs = target.node_attrs(image).unwrap_or(&empty);
        if !ours.is_subset_of(theirs) {
            return Err(CoreError::invalid(
                InvalidReason::NodeAttr,
                format!("attributes of '{}' are not included in those of '{}'", node, image),
            ));
        }
    }

    // 6. Edge attributes.
    for (a, b, attrs) in source.edges() {
        let (ia, ib) = (&mapping[a], &mapping[b]);
        let theirs = target.edge_attrs(ia, ib).unwrap_or(&empty);
        if !attrs.is_subset_of(theirs) {
            return Err(CoreError::invalid(
                InvalidReason::EdgeAttr,
                format!(
                    "attributes of edge '{}'->'{}' are not included in those of '{}'->'{}'",
                    a, b, ia, ib
                ),
            ));
        }
    }

    Ok(())
}

/// Mapping `n -> type(n)`. Untyped nodes are a coverage failure.
fn typing_mapping(source: &TypedGraph) -> Result<Mapping, CoreError> {
    let mut mapping = Mapping::with_capacity(source.node_count());
    for node in source.nodes() {
        let Some(declared) = source.node_type(node) else {
            return Err(CoreError::invalid(
                InvalidReason::Coverage,
                format!("node '{}' has no declared type", node),
            ));
        };
        mapping.insert(node.clone(), declared.clone());
    }
    Ok(mapping)
}

impl Homomorphism {
    /// Builds a plain homomorphism from an explicit mapping.
    pub fn new(
        source: &TypedGraph,
        target: &TypedGraph,
        mapping: Mapping,
        ignore_types: bool,
        ignore_attrs: bool,
    ) -> Result<Self, CoreError> {
        validate(source, target, &mapping, ignore_types, ignore_attrs)?;
        Ok(Homomorphism {
            kind: MorphismKind::Plain { ignore_types },
            ignore_attrs,
            mapping,
        })
    }

    /// Builds the identity mapping `n -> n`.
    ///
    /// Fails with [`CoreError::MissingNode`] for the first source node whose
    /// name does not exist in the target.
    pub fn identity(
        source: &TypedGraph,
        target: &TypedGraph,
        ignore_types: bool,
        ignore_attrs: bool,
    ) -> Result<Self, CoreError> {
        let mut mapping = Mapping::with_capacity(source.node_count());
        for node in source.nodes() {
            if !target.has_node(node) {
                return Err(CoreError::MissingNode { node: node.clone() });
            }
            mapping.insert(node.clone(), node.clone());
        }
        Homomorphism::new(source, target, mapping, ignore_types, ignore_attrs)
    }

    /// Builds a typing homomorphism whose mapping is each node's declared
    /// type.
    pub fn typing(source: &TypedGraph, target: &TypedGraph, ignore_attrs: bool) -> Result<Self, CoreError> {
        let mapping = typing_mapping(source)?;
        validate(source, target, &mapping, true, ignore_attrs)?;
        Ok(Homomorphism {
            kind: MorphismKind::Typing,
            ignore_attrs,
            mapping,
        })
    }

    /// Builds a typing homomorphism from an explicit mapping.
    ///
    /// Untyped source nodes may map anywhere. A declared type must name the
    /// node's image, otherwise construction fails with
    /// [`CoreError::TypingChainBroken`].
    pub fn typing_with_mapping(
        source: &TypedGraph,
        target: &TypedGraph,
        mapping: Mapping,
        ignore_attrs: bool,
    ) -> Result<Self, CoreError> {
        validate(source, target, &mapping, true, ignore_attrs)?;
        for (node, image) in &mapping {
            if let Some(declared) = source.node_type(node) {
                if declared != image {
                    return Err(CoreError::TypingChainBroken {
                        node: node.clone(),
                        declared: declared.clone(),
                        image: image.clone(),
                    });
                }
            }
        }
        Ok(Homomorphism {
            kind: MorphismKind::Typing,
            ignore_attrs,
            mapping,
        })
    }

    /// Builds a homomorphism of the given kind, dispatching to the matching
    /// constructor.
    pub fn with_kind(
        kind: MorphismKind,
        source: &TypedGraph,
        target: &TypedGraph,
        mapping: Mapping,
        ignore_attrs: bool,
    ) -> Result<Self, CoreError> {
        match kind {
            MorphismKind::Plain { ignore_types } => {
                Homomorphism::new(source, target, mapping, ignore_types, ignore_attrs)
            }
            MorphismKind::Typing => Homomorphism::typing_with_mapping(source, target, mapping, ignore_attrs),
        }
    }

    /// Re-checks this mapping against (possibly changed) graphs.
    pub fn revalidate(&self, source: &TypedGraph, target: &TypedGraph) -> Result<(), CoreError> {
        validate(source, target, &self.mapping, self.ignores_types(), self.ignore_attrs)?;
        if self.is_typing() {
            for (node, image) in &self.mapping {
                if let Some(declared) = source.node_type(node) {
                    if declared != image {
                        return Err(CoreError::TypingChainBroken {
                            node: node.clone(),
                            declared: declared.clone(),
                            image: image.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn kind(&self) -> MorphismKind {
        self.kind
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    pub fn into_mapping(self) -> Mapping {
        self.mapping
    }

    pub fn ignore_attrs(&self) -> bool {
        self.ignore_attrs
    }

    /// Whether the type check is skipped during validation. Always true for
    /// typing homomorphisms, whose types are checked by the chain rule.
    pub fn ignores_types(&self) -> bool {
        match self.kind {
            MorphismKind::Plain { ignore_types } => ignore_types,
            MorphismKind::Typing => true,
        }
    }

    /// Whether this is a plain homomorphism that checks types.
    pub fn preserves_types(&self) -> bool {
        matches!(self.kind, MorphismKind::Plain { ignore_types: false })
    }

    pub fn is_typing(&self) -> bool {
        matches!(self.kind, MorphismKind::Typing)
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// Image of a source node.
    pub fn image(&self, node: &NodeId) -> Option<&NodeId> {
        self.mapping.get(node)
    }

    /// Source nodes mapped to `target`, in mapping order.
    pub fn preimage(&self, target: &NodeId) -> Vec<&NodeId> {
        self.mapping
            .iter()
            .filter(|(_, image)| *image == target)
            .map(|(node, _)| node)
            .collect()
    }

    /// Whether the mapping is injective.
    pub fn is_monic(&self) -> bool {
        let mut seen = std::collections::HashSet::with_capacity(self.mapping.len());
        self.mapping.values().all(|image| seen.insert(image))
    }
}

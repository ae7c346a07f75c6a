//! Composition of adjacent homomorphisms.
//!
//! Composing `first: X -> Y` with `second: Y -> Z` yields a homomorphism
//! `X -> Z`. When typing is involved on a type-preserving path the result is
//! re-derived as a typing homomorphism, which retypes the nodes of `X`; the
//! retyping is reported as a conversion map so callers can apply the same
//! renaming to other graphs typed like `X`.
//!
//! Composition never mutates its inputs. The returned [`Composition`]
//! carries a converted copy of the source graph.

use indexmap::IndexMap;

use crate::error::{CoreError, InvalidReason};
use crate::graph::TypedGraph;
use crate::homomorphism::{Homomorphism, Mapping, MorphismKind};
use crate::id::{GraphId, NodeId};

/// Result of [`compose`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Composition {
    /// The source graph, retyped when the composition is a typing one.
    pub source: TypedGraph,
    /// The composed homomorphism from `source` to the target.
    pub homomorphism: Homomorphism,
    /// Old type -> new type. When `first` is a typing homomorphism this is
    /// every non-identity entry of `second`, whether or not the source uses
    /// that type, so that every graph typed by the same intermediate graph
    /// gets the same map. Empty otherwise: when `first` is a type-preserving
    /// plain homomorphism each source node is already typed by the image
    /// `second` gives its image, so no type is renamed.
    pub conversions: IndexMap<NodeId, NodeId>,
}

impl Composition {
    pub fn is_typing(&self) -> bool {
        self.homomorphism.is_typing()
    }
}

/// Whether composing homomorphisms of these kinds yields a typing
/// homomorphism.
pub fn composes_to_typing(first: MorphismKind, second: MorphismKind) -> bool {
    match (first, second) {
        (MorphismKind::Typing, MorphismKind::Typing) => true,
        (MorphismKind::Typing, MorphismKind::Plain { ignore_types })
        | (MorphismKind::Plain { ignore_types }, MorphismKind::Typing) => !ignore_types,
        (MorphismKind::Plain { .. }, MorphismKind::Plain { .. }) => false,
    }
}

/// `second . first` on mappings.
pub fn compose_mappings(first: &Mapping, second: &Mapping) -> Result<Mapping, CoreError> {
    first
        .iter()
        .map(|(node, middle)| {
            second
                .get(middle)
                .map(|image| (node.clone(), image.clone()))
                .ok_or_else(|| {
                    CoreError::invalid(
                        InvalidReason::Coverage,
                        format!("intermediate node '{}' (image of '{}') is not mapped", middle, node),
                    )
                })
        })
        .collect()
}

/// Composes `first: source -> Y` with `second: Y -> target`.
///
/// In the typing case every node of the returned source is typed by its
/// composed image, the type renaming is reported in
/// [`Composition::conversions`], and the source's metamodel is set to
/// `target_id`. Otherwise the result is a plain homomorphism that ignores
/// types, and ignores attributes if either input does.
pub fn compose(
    source: &TypedGraph,
    first: &Homomorphism,
    second: &Homomorphism,
    target_id: &GraphId,
    target: &TypedGraph,
) -> Result<Composition, CoreError> {
    let mapping = compose_mappings(first.mapping(), second.mapping())?;
    let ignore_attrs = first.ignore_attrs() || second.ignore_attrs();

    if !composes_to_typing(first.kind(), second.kind()) {
        let homomorphism = Homomorphism::new(source, target, mapping, true, ignore_attrs)?;
        return Ok(Composition {
            source: source.clone(),
            homomorphism,
            conversions: IndexMap::new(),
        });
    }

    let conversions: IndexMap<NodeId, NodeId> = if first.is_typing() {
        second
            .mapping()
            .iter()
            .filter(|(old, new)| old != new)
            .map(|(old, new)| (old.clone(), new.clone()))
            .collect()
    } else {
        IndexMap::new()
    };

    let mut converted = source.clone();
    for (node, image) in &mapping {
        converted.set_node_type(node, Some(image.clone()))?;
    }
    converted.set_metamodel(Some(target_id.clone()));

    let homomorphism = Homomorphism::typing(&converted, target, ignore_attrs)?;
    Ok(Composition {
        source: converted,
        homomorphism,
        conversions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::Attrs;
    use proptest::prelude::*;

    fn n(name: &str) -> NodeId {
        NodeId::from(name)
    }

    /// A -> B -> C typing chain: instance nodes typed by model nodes typed by
    /// metamodel nodes.
    fn typing_chain() -> (TypedGraph, TypedGraph, TypedGraph) {
        let mut a = TypedGraph::directed();
        a.add_node("alice", Some(n("person")), Attrs::new()).unwrap();
        a.add_node("paris", Some(n("city")), Attrs::new()).unwrap();
        a.add_edge(&n("alice"), &n("paris"), Attrs::new()).unwrap();

        let mut b = TypedGraph::directed();
        b.add_node("person", Some(n("agent")), Attrs::new()).unwrap();
        b.add_node("city", Some(n("place")), Attrs::new()).unwrap();
        b.add_edge(&n("person"), &n("city"), Attrs::new()).unwrap();

        let mut c = TypedGraph::directed();
        c.add_node("agent", None, Attrs::new()).unwrap();
        c.add_node("place", None, Attrs::new()).unwrap();
        c.add_edge(&n("agent"), &n("place"), Attrs::new()).unwrap();
        (a, b, c)
    }

    #[test]
    fn typing_composition_retypes_source() {
        let (a, b, c) = typing_chain();
        let ab = Homomorphism::typing(&a, &b, false).unwrap();
        let bc = Homomorphism::typing(&b, &c, false).unwrap();

        let composed = compose(&a, &ab, &bc, &GraphId::from("C"), &c).unwrap();
        assert!(composed.is_typing());
        assert_eq!(composed.source.node_type(&n("alice")), Some(&n("agent")));
        assert_eq!(composed.source.metamodel(), Some(&GraphId::from("C")));
        assert_eq!(composed.conversions.get("person"), Some(&n("agent")));
        assert_eq!(composed.conversions.get("city"), Some(&n("place")));
        assert_eq!(composed.conversions.len(), 2);
        // The input graph is untouched.
        assert_eq!(a.node_type(&n("alice")), Some(&n("person")));
    }

    #[test]
    fn type_ignoring_plain_link_composes_plainly() {
        let (a, b, c) = typing_chain();
        let ab = Homomorphism::typing(&a, &b, false).unwrap();
        let bc = Homomorphism::new(&b, &c, b_to_c(), true, true).unwrap();

        let composed = compose(&a, &ab, &bc, &GraphId::from("C"), &c).unwrap();
        assert!(!composed.is_typing());
        assert!(composed.homomorphism.ignores_types());
        assert!(composed.homomorphism.ignore_attrs());
        assert!(composed.conversions.is_empty());
        assert_eq!(composed.source, a);
        assert_eq!(composed.homomorphism.image(&n("paris")), Some(&n("place")));
    }

    #[test]
    fn type_preserving_plain_then_typing_stays_typing() {
        let (_, b, c) = typing_chain();
        // B' is a copy of B under other names, mapped into B preserving types.
        let mut b2 = TypedGraph::directed();
        b2.add_node("p", Some(n("agent")), Attrs::new()).unwrap();
        b2.add_node("q", Some(n("place")), Attrs::new()).unwrap();
        let mut mapping = Mapping::new();
        mapping.insert(n("p"), n("person"));
        mapping.insert(n("q"), n("city"));
        let first = Homomorphism::new(&b2, &b, mapping, false, false).unwrap();
        let second = Homomorphism::typing(&b, &c, false).unwrap();

        let composed = compose(&b2, &first, &second, &GraphId::from("C"), &c).unwrap();
        assert!(composed.is_typing());
        assert!(composed.conversions.is_empty());
        for node in b2.nodes() {
            assert_eq!(composed.source.node_type(node), b2.node_type(node));
        }
        assert_eq!(composed.source.node_type(&n("p")), Some(&n("agent")));
        assert_eq!(composed.source.metamodel(), Some(&GraphId::from("C")));
    }

    #[test]
    fn conversions_cover_unused_types() {
        let (mut a, b, c) = typing_chain();
        a.remove_node(&n("paris")).unwrap();
        let ab = Homomorphism::typing(&a, &b, false).unwrap();
        let bc = Homomorphism::typing(&b, &c, false).unwrap();

        let composed = compose(&a, &ab, &bc, &GraphId::from("C"), &c).unwrap();
        assert_eq!(composed.conversions.get("city"), Some(&n("place")));
    }

    #[test]
    fn incompatible_chain_is_rejected() {
        let (a, b, c) = typing_chain();
        let ab = Homomorphism::typing(&a, &b, false).unwrap();
        let bc = Homomorphism::typing(&b, &c, false).unwrap();
        // Reversed order: the images of `bc` are not in the domain of `ab`.
        let err = compose(&b, &bc, &ab, &GraphId::from("B"), &b).unwrap_err();
        assert_eq!(err.invalid_reason(), Some(InvalidReason::Coverage));
    }

    fn b_to_c() -> Mapping {
        let mut mapping = Mapping::new();
        mapping.insert(n("person"), n("agent"));
        mapping.insert(n("city"), n("place"));
        mapping
    }

    /// Complete directed graph (self loops included) on `size` nodes, so
    /// that every mapping into it is a homomorphism.
    fn complete(prefix: &str, size: usize) -> TypedGraph {
        let mut g = TypedGraph::directed();
        for i in 0..size {
            g.add_node(format!("{}{}", prefix, i), None, Attrs::new()).unwrap();
        }
        for i in 0..size {
            for j in 0..size {
                g.add_edge(
                    &NodeId(format!("{}{}", prefix, i)),
                    &NodeId(format!("{}{}", prefix, j)),
                    Attrs::new(),
                )
                .unwrap();
            }
        }
        g
    }

    fn random_hom(source: &TypedGraph, prefix: &str, images: &[usize]) -> Homomorphism {
        let target = complete(prefix, 3);
        let mapping: Mapping = source
            .nodes()
            .zip(images)
            .map(|(node, i)| (node.clone(), NodeId(format!("{}{}", prefix, i))))
            .collect();
        Homomorphism::new(source, &target, mapping, false, false).unwrap()
    }

    proptest! {
        /// compose(compose(h1, h2), h3) and compose(h1, compose(h2, h3))
        /// agree on mappings.
        #[test]
        fn composition_is_associative(
            i1 in proptest::collection::vec(0usize..3, 3),
            i2 in proptest::collection::vec(0usize..3, 3),
            i3 in proptest::collection::vec(0usize..3, 3),
        ) {
            let a = complete("a", 3);
            let b = complete("b", 3);
            let c = complete("c", 3);
            let d = complete("d", 3);
            let h1 = random_hom(&a, "b", &i1);
            let h2 = random_hom(&b, "c", &i2);
            let h3 = random_hom(&c, "d", &i3);

            let left = compose(&a, &h1, &h2, &GraphId::from("C"), &c).unwrap();
            let left = compose(&left.source, &left.homomorphism, &h3, &GraphId::from("D"), &d).unwrap();

            let right = compose(&b, &h2, &h3, &GraphId::from("D"), &d).unwrap();
            let right = compose(&a, &h1, &right.homomorphism, &GraphId::from("D"), &d).unwrap();

            prop_assert_eq!(left.homomorphism.mapping(), right.homomorphism.mapping());
        }
    }

    #[test]
    fn typing_composition_is_associative() {
        let (a, b, c) = typing_chain();
        let mut d = TypedGraph::directed();
        d.add_node("thing", None, Attrs::new()).unwrap();
        d.add_edge(&n("thing"), &n("thing"), Attrs::new()).unwrap();
        let mut c_typed = c.clone();
        c_typed.set_node_type(&n("agent"), Some(n("thing"))).unwrap();
        c_typed.set_node_type(&n("place"), Some(n("thing"))).unwrap();

        let h1 = Homomorphism::typing(&a, &b, false).unwrap();
        let h2 = Homomorphism::typing(&b, &c_typed, false).unwrap();
        let h3 = Homomorphism::typing(&c_typed, &d, false).unwrap();

        let left = compose(&a, &h1, &h2, &GraphId::from("C"), &c_typed).unwrap();
        let left = compose(&left.source, &left.homomorphism, &h3, &GraphId::from("D"), &d).unwrap();
        let right = compose(&b, &h2, &h3, &GraphId::from("D"), &d).unwrap();
        let right = compose(&a, &h1, &right.homomorphism, &GraphId::from("D"), &d).unwrap();

        assert_eq!(left.homomorphism.mapping(), right.homomorphism.mapping());
        assert_eq!(left.source, right.source);
    }
}

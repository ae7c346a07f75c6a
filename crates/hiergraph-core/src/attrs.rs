//! Attribute sets carried by nodes and edges.
//!
//! An attribute set maps a key to a *set* of values. Homomorphisms compare
//! attribute sets by inclusion and merges combine them by union, so the
//! representation keeps both operations cheap and deterministic (`BTreeMap`
//! / `BTreeSet` give a canonical order for serialization and hashing).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Bool(b) => write!(f, "{}", b),
            AttrValue::Int(i) => write!(f, "{}", i),
            AttrValue::Str(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        AttrValue::Int(i)
    }
}

impl From<i32> for AttrValue {
    fn from(i: i32) -> Self {
        AttrValue::Int(i64::from(i))
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Str(s)
    }
}

/// Attribute set: key to set of values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attrs(BTreeMap<String, BTreeSet<AttrValue>>);

impl Attrs {
    /// Creates an empty attribute set.
    pub fn new() -> Self {
        Attrs(BTreeMap::new())
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Adds `value` to the value set of `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.0.entry(key.into()).or_default().insert(value.into());
    }

    /// Returns the value set of `key`.
    pub fn get(&self, key: &str) -> Option<&BTreeSet<AttrValue>> {
        self.0.get(key)
    }

    /// Removes a key and all its values.
    pub fn remove(&mut self, key: &str) -> Option<BTreeSet<AttrValue>> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<AttrValue>)> {
        self.0.iter()
    }

    /// Inclusion test used by homomorphism validation.
    ///
    /// Every key of `self` must be present in `other` and its value set must
    /// be a subset of the corresponding value set in `other`. A key with an
    /// empty value set still requires the key to be present.
    pub fn is_subset_of(&self, other: &Attrs) -> bool {
        self.0.iter().all(|(key, values)| {
            other
                .0
                .get(key)
                .map_or(false, |theirs| values.is_subset(theirs))
        })
    }

    /// Unions `other` into `self`, key by key.
    pub fn union_with(&mut self, other: &Attrs) {
        for (key, values) in &other.0 {
            self.0
                .entry(key.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
    }

    /// Returns the union of two attribute sets.
    pub fn union(&self, other: &Attrs) -> Attrs {
        let mut merged = self.clone();
        merged.union_with(other);
        merged
    }
}

impl<K, V> FromIterator<(K, V)> for Attrs
where
    K: Into<String>,
    V: Into<AttrValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut attrs = Attrs::new();
        for (key, value) in iter {
            attrs.insert(key, value);
        }
        attrs
    }
}

impl fmt::Display for Attrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (key, values)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {{", key)?;
            for (j, value) in values.iter().enumerate() {
                if j > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", value)?;
            }
            write!(f, "}}")?;
        }
        write!(f, "}}")
    }
}

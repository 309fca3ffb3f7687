//! Diff tree data model.
//!
//! A [`ValueDiff`] is immutable once built. Nested diffs are shared by `Arc`;
//! a reference back to an ancestor of the same tree is held weakly, so cyclic
//! trees free normally when the root is dropped.

use crate::object::{MemberInfo, Value};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

/// What a sub-diff is keyed by
#[derive(Clone, Copy)]
pub enum DiffKey {
    Member(&'static MemberInfo),
    Index(usize),
}

impl DiffKey {
    pub fn member(&self) -> Option<&'static MemberInfo> {
        match self {
            DiffKey::Member(m) => Some(*m),
            DiffKey::Index(_) => None,
        }
    }

    pub fn index(&self) -> Option<usize> {
        match self {
            DiffKey::Member(_) => None,
            DiffKey::Index(i) => Some(*i),
        }
    }
}

impl PartialEq for DiffKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DiffKey::Member(a), DiffKey::Member(b)) => std::ptr::eq(*a, *b),
            (DiffKey::Index(a), DiffKey::Index(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for DiffKey {}

impl Hash for DiffKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            DiffKey::Member(m) => {
                0u8.hash(state);
                (*m as *const MemberInfo as usize).hash(state);
            }
            DiffKey::Index(i) => {
                1u8.hash(state);
                i.hash(state);
            }
        }
    }
}

impl fmt::Display for DiffKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffKey::Member(m) => f.write_str(m.name),
            DiffKey::Index(i) => write!(f, "[{}]", i),
        }
    }
}

impl fmt::Debug for DiffKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Link from a sub-diff to the diff of a nested pair
#[derive(Clone)]
pub(crate) enum NestedDiff {
    Shared(Arc<ValueDiff>),
    /// Back reference to a diff that is still being built higher up
    Ancestor(Weak<ValueDiff>),
}

/// One differing member or element
#[derive(Clone)]
pub struct SubDiff {
    key: DiffKey,
    x: Value,
    y: Value,
    nested: Option<NestedDiff>,
}

impl SubDiff {
    pub(crate) fn value(key: DiffKey, x: Value, y: Value) -> Self {
        Self {
            key,
            x,
            y,
            nested: None,
        }
    }

    pub(crate) fn nested(key: DiffKey, x: Value, y: Value, nested: NestedDiff) -> Self {
        Self {
            key,
            x,
            y,
            nested: Some(nested),
        }
    }

    pub fn key(&self) -> DiffKey {
        self.key
    }

    pub fn x(&self) -> &Value {
        &self.x
    }

    pub fn y(&self) -> &Value {
        &self.y
    }

    /// A mismatch of two values, with nothing below it
    pub fn is_terminal(&self) -> bool {
        self.nested.is_none()
    }

    /// The nested diff, if this is not a terminal mismatch
    pub fn value_diff(&self) -> Option<Arc<ValueDiff>> {
        match self.nested.as_ref()? {
            NestedDiff::Shared(diff) => Some(diff.clone()),
            NestedDiff::Ancestor(weak) => weak.upgrade(),
        }
    }

    pub(crate) fn nested_link(&self) -> Option<&NestedDiff> {
        self.nested.as_ref()
    }
}

impl fmt::Debug for SubDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.nested {
            None => write!(f, "{} x: {} y: {}", self.key, self.x, self.y),
            Some(NestedDiff::Shared(d)) => write!(f, "{} ({} diffs)", self.key, d.diffs().len()),
            Some(NestedDiff::Ancestor(_)) => write!(f, "{} ...", self.key),
        }
    }
}

/// The difference between two values, with every differing member or
/// element as a child
#[derive(Clone)]
pub struct ValueDiff {
    x: Value,
    y: Value,
    diffs: Vec<SubDiff>,
}

impl ValueDiff {
    pub fn new(x: Value, y: Value, diffs: Vec<SubDiff>) -> Self {
        Self { x, y, diffs }
    }

    /// A diff with no children: no difference
    pub fn empty(x: Value, y: Value) -> Self {
        Self::new(x, y, Vec::new())
    }

    pub fn x(&self) -> &Value {
        &self.x
    }

    pub fn y(&self) -> &Value {
        &self.y
    }

    pub fn diffs(&self) -> &[SubDiff] {
        &self.diffs
    }

    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }

    /// The child keyed by `key`
    pub fn find(&self, key: &DiffKey) -> Option<&SubDiff> {
        self.diffs.iter().find(|d| d.key == *key)
    }

    /// The child for the member named `name`
    pub fn member(&self, name: &str) -> Option<&SubDiff> {
        self.diffs
            .iter()
            .find(|d| d.key.member().is_some_and(|m| m.name == name))
    }
}

impl fmt::Debug for ValueDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueDiff")
            .field("x", &self.x)
            .field("y", &self.y)
            .field("diffs", &self.diffs)
            .finish()
    }
}

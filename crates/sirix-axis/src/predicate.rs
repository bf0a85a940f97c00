use sirix_types::NodeKey;

use crate::source::NodeSource;

/// A short-circuiting test over one node, used to compose `FilterAxis`
/// (spec §4.11).
pub trait Predicate<S: NodeSource> {
    fn matches(&self, source: &S, key: NodeKey) -> bool;
}

/// Matches nodes whose `(name_key, uri_key)` equals a target pair.
pub struct NameFilter {
    pub name_key: u64,
    pub uri_key: u64,
}

impl<S: NodeSource> Predicate<S> for NameFilter {
    fn matches(&self, source: &S, key: NodeKey) -> bool {
        source.view(key).and_then(|v| v.name()) == Some((self.name_key, self.uri_key))
    }
}

/// Matches nodes whose `kind_tag()` equals a target discriminant —
/// typically a path-summary node kind when walking the path-summary tree.
pub struct PathKindFilter {
    pub kind: u8,
}

impl<S: NodeSource> Predicate<S> for PathKindFilter {
    fn matches(&self, source: &S, key: NodeKey) -> bool {
        source.view(key).map_or(false, |v| v.kind_tag() == self.kind)
    }
}

/// Matches nodes at an exact tree depth.
pub struct PathLevelFilter {
    pub level: u32,
}

impl<S: NodeSource> Predicate<S> for PathLevelFilter {
    fn matches(&self, source: &S, key: NodeKey) -> bool {
        source.view(key).map_or(false, |v| v.level() == self.level)
    }
}

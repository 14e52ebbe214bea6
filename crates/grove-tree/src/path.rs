// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Segment paths and key paths.
//!
//! A *segment path* names a nesting level in the output tree by the sequence
//! of array-property names leading to it (`["states", "cities"]`); the empty
//! path is the root level. A *key path* holds the parent row keys required to
//! reach one specific row's children at that level. An event at a segment
//! path of length *n* always carries a key path of length *n*.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ident::{hash_parts, ItemKey, PathHash};

/// Ordered sequence of array-property names identifying a nesting level.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegPath(Vec<String>);

/// Returns true when the two segment paths name the same level.
///
/// Equivalent to `==`; kept as a named function because call sites gating
/// event routing read better with a verb.
#[inline]
pub fn paths_match(a: &SegPath, b: &SegPath) -> bool {
    a == b
}

impl SegPath {
    /// The root level.
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Builds a path from segment names.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// The segment names, outermost first.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Number of segments; 0 for the root level.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the root level.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The path one level deeper through the array named `name`.
    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Self(segments)
    }

    /// Splits off the last segment: `(parent path, array name)`.
    ///
    /// Returns `None` at the root level.
    #[must_use]
    pub fn split_last(&self) -> Option<(Self, &str)> {
        let (last, init) = self.0.split_last()?;
        Some((Self(init.to_vec()), last.as_str()))
    }

    /// Returns true when `prefix` is a (non-strict) prefix of this path.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// The segments remaining after `prefix`, when `prefix` matches.
    #[must_use]
    pub fn strip_prefix(&self, prefix: &Self) -> Option<&[String]> {
        self.starts_with(prefix).then(|| &self.0[prefix.0.len()..])
    }

    /// Appends `suffix` segments to this path.
    #[must_use]
    pub fn join(&self, suffix: &[String]) -> Self {
        let mut segments = self.0.clone();
        segments.extend(suffix.iter().cloned());
        Self(segments)
    }

    /// Stable identifier for this path (domain-separated BLAKE3).
    #[must_use]
    pub fn hash_id(&self) -> PathHash {
        hash_parts(b"segpath:", self.0.iter().map(String::as_str))
    }
}

impl fmt::Debug for SegPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SegPath(/{})", self.0.join("/"))
    }
}

impl fmt::Display for SegPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

impl<S: Into<String>> FromIterator<S> for SegPath {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Ordered sequence of parent row keys reaching one row's slot at a level.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyPath(Vec<ItemKey>);

impl KeyPath {
    /// The empty key path (root-level events).
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Builds a key path from keys.
    pub fn new<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<ItemKey>,
    {
        Self(keys.into_iter().map(Into::into).collect())
    }

    /// The keys, outermost first.
    #[must_use]
    pub fn keys(&self) -> &[ItemKey] {
        &self.0
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the empty key path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The key path one level deeper through the row keyed `key`.
    #[must_use]
    pub fn child(&self, key: ItemKey) -> Self {
        let mut keys = self.0.clone();
        keys.push(key);
        Self(keys)
    }

    /// Splits off the last key: `(parent key path, key)`.
    ///
    /// Returns `None` for the empty key path.
    #[must_use]
    pub fn split_last(&self) -> Option<(Self, &ItemKey)> {
        let (last, init) = self.0.split_last()?;
        Some((Self(init.to_vec()), last))
    }

    /// Splits this key path at `mid`: `(first mid keys, the rest)`.
    ///
    /// Returns `None` when the path is shorter than `mid`.
    #[must_use]
    pub fn split_at(&self, mid: usize) -> Option<(Self, &[ItemKey])> {
        (self.0.len() >= mid).then(|| (Self(self.0[..mid].to_vec()), &self.0[mid..]))
    }

    /// Rebuilds this key path with `key` spliced in at position `at`.
    ///
    /// Used by steps that introduce a grouping level: the enclosing keys stay,
    /// the group key slots in, and the remaining keys shift one level deeper.
    /// Returns `None` when the path is shorter than `at`.
    #[must_use]
    pub fn splice(&self, at: usize, key: ItemKey) -> Option<Self> {
        (self.0.len() >= at).then(|| {
            let mut keys = Vec::with_capacity(self.0.len() + 1);
            keys.extend_from_slice(&self.0[..at]);
            keys.push(key);
            keys.extend_from_slice(&self.0[at..]);
            Self(keys)
        })
    }

    /// Stable identifier for this key path (domain-separated BLAKE3).
    #[must_use]
    pub fn hash_id(&self) -> PathHash {
        hash_parts(b"keypath:", self.0.iter().map(ItemKey::as_str))
    }
}

impl fmt::Debug for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPath(")?;
        for (i, key) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{key}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn root_paths_are_empty() {
        assert!(SegPath::root().is_root());
        assert!(KeyPath::root().is_root());
        assert_eq!(SegPath::root().len(), 0);
    }

    #[test]
    fn starts_with_accepts_prefixes_and_self() {
        let p = SegPath::new(["states", "cities", "towns"]);
        assert!(p.starts_with(&SegPath::root()));
        assert!(p.starts_with(&SegPath::new(["states"])));
        assert!(p.starts_with(&p.clone()));
        assert!(!p.starts_with(&SegPath::new(["cities"])));
        assert!(!SegPath::new(["states"]).starts_with(&p));
    }

    #[test]
    fn strip_prefix_returns_remainder() {
        let p = SegPath::new(["states", "cities", "towns"]);
        let rest = p.strip_prefix(&SegPath::new(["states"]));
        assert_eq!(rest, Some(&["cities".to_string(), "towns".to_string()][..]));
        assert!(p.strip_prefix(&SegPath::new(["towns"])).is_none());
    }

    #[test]
    fn child_and_split_last_round_trip() {
        let p = SegPath::new(["states"]).child("cities");
        let (parent, name) = p.split_last().unwrap();
        assert_eq!(parent, SegPath::new(["states"]));
        assert_eq!(name, "cities");
    }

    #[test]
    fn key_path_splice_inserts_group_key() {
        let kp = KeyPath::new(["a", "b", "c"]);
        let spliced = kp.splice(1, ItemKey::from("g")).unwrap();
        assert_eq!(spliced, KeyPath::new(["a", "g", "b", "c"]));
        assert!(kp.splice(4, ItemKey::from("g")).is_none());
    }

    #[test]
    fn hash_ids_distinguish_paths_and_domains() {
        let seg = SegPath::new(["a", "b"]);
        let keys = KeyPath::new(["a", "b"]);
        assert_ne!(seg.hash_id(), keys.hash_id());
        assert_ne!(seg.hash_id(), SegPath::new(["a"]).hash_id());
        assert_eq!(seg.hash_id(), SegPath::new(["a", "b"]).hash_id());
    }

    #[test]
    fn paths_match_is_sequence_equality() {
        assert!(paths_match(&SegPath::root(), &SegPath::root()));
        assert!(!paths_match(&SegPath::root(), &SegPath::new(["x"])));
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifier and hashing utilities.
use std::fmt;
use std::sync::Arc;

use blake3::Hasher;

use crate::props::Props;

/// Canonical 256-bit digest used for addressing paths and deriving group keys.
pub type Digest = [u8; 32];

/// Identifier of a row within its parent keyed array.
///
/// Keys are opaque strings: caller-supplied for input records, hex-rendered
/// group digests for rows synthesized by group-by steps. Unique among
/// siblings, stable across modifications. Backed by `Arc<str>` so the engine
/// can thread keys through key paths and side tables without reallocating.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemKey(Arc<str>);

impl ItemKey {
    /// Creates a key from any string-ish value.
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ItemKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ItemKey {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemKey({:?})", &*self.0)
    }
}

impl serde::Serialize for ItemKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for ItemKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        <String as serde::Deserialize<'de>>::deserialize(deserializer).map(Self::from)
    }
}

/// Identifier for a segment path or key path, used as the key of every
/// path-keyed map in the engine.
///
/// Produced by [`SegPath::hash_id`](crate::SegPath::hash_id) and
/// [`KeyPath::hash_id`](crate::KeyPath::hash_id); the two use distinct
/// domain-separation prefixes, so a segment path and a key path never share
/// an identifier.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PathHash(pub Digest);

impl PathHash {
    /// Returns the canonical byte representation of this identifier.
    #[must_use]
    pub fn as_bytes(&self) -> &Digest {
        &self.0
    }
}

impl fmt::Debug for PathHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathHash({})", hex::encode(&self.0[..6]))
    }
}

/// Hashes a sequence of length-delimited string parts under a domain prefix.
///
/// Length delimiting keeps `["ab","c"]` and `["a","bc"]` distinct.
pub(crate) fn hash_parts<'a>(domain: &[u8], parts: impl Iterator<Item = &'a str>) -> PathHash {
    let mut hasher = Hasher::new();
    hasher.update(domain);
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    PathHash(hasher.finalize().into())
}

/// Renders the canonical JSON of the named subset of `props`.
///
/// Property maps are BTreeMap-backed, so serialization order is sorted key
/// order; the output is a stable canonical form of the subset. Properties
/// absent from `props` are omitted (absence is part of the canonical form).
pub fn canonical_json(props: &Props, properties: &[String]) -> String {
    let subset = props.subset(properties);
    // Serializing a BTreeMap of Values cannot fail.
    serde_json::to_string(&subset).unwrap_or_default()
}

/// Derives the group key for `props` grouped by `properties`.
///
/// The key is the hex rendering of a domain-separated BLAKE3 digest over the
/// canonical JSON of the grouping subset: an opaque, collision-resistant,
/// stable string.
pub fn make_group_key(props: &Props, properties: &[String]) -> ItemKey {
    let canonical = canonical_json(props, properties);
    let mut hasher = Hasher::new();
    hasher.update(b"group:");
    hasher.update(canonical.as_bytes());
    let digest: Digest = hasher.finalize().into();
    ItemKey::new(hex::encode(digest))
}

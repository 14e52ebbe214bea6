// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ordered property maps.
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An item's properties as seen at one step's output: an ordered map from
/// property name to JSON value.
///
/// The map is BTreeMap-backed so iteration and serialization order is sorted
/// key order, which makes the serialized form canonical — group-key hashing
/// depends on this.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Props(BTreeMap<String, Value>);

impl Props {
    /// Creates an empty property map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a property map from a JSON object value.
    ///
    /// Returns `None` when `value` is not an object.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_object().map(|map| {
            Self(
                map.iter()
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect(),
            )
        })
    }

    /// Renders the map as a JSON object value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        )
    }

    /// Looks up a property value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Reads a property as an `f64`, when present and numeric.
    #[must_use]
    pub fn number(&self, name: &str) -> Option<f64> {
        self.0.get(name).and_then(Value::as_f64)
    }

    /// Returns true when the property is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Sets a property in place.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    /// Removes a property in place, returning its prior value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    /// Number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when no properties are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates properties in sorted name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// The subset of this map restricted to `names` (absent names omitted).
    #[must_use]
    pub fn subset(&self, names: &[String]) -> Self {
        Self(
            names
                .iter()
                .filter_map(|name| {
                    self.0
                        .get(name)
                        .map(|value| (name.clone(), value.clone()))
                })
                .collect(),
        )
    }

    /// This map with `names` removed.
    #[must_use]
    pub fn without(&self, names: &[String]) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(name, _)| !names.iter().any(|n| n == *name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        )
    }

    /// This map with one property added or replaced.
    #[must_use]
    pub fn with(&self, name: impl Into<String>, value: Value) -> Self {
        let mut next = self.clone();
        next.insert(name, value);
        next
    }

    /// This map overlaid with cached mutable values.
    ///
    /// An entry of `Some(v)` overrides (or introduces) the property; `None`
    /// records the *absent* state and removes the property from the view.
    #[must_use]
    pub fn overlay(&self, overrides: &BTreeMap<String, Option<Value>>) -> Self {
        let mut view = self.clone();
        for (name, value) in overrides {
            match value {
                Some(value) => view.insert(name.clone(), value.clone()),
                None => {
                    view.remove(name);
                }
            }
        }
        view
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.iter()).finish()
    }
}

impl FromIterator<(String, Value)> for Props {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Props {
    type Item = (&'a String, &'a Value);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

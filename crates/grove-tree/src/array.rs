// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The materialized tree: insertion-ordered keyed arrays of rows.
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ident::ItemKey;
use crate::props::Props;

/// One row of a keyed array: a key, its properties, and any nested child
/// arrays keyed by array-property name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyedRow {
    /// Row key, unique among siblings.
    pub key: ItemKey,
    /// The row's properties.
    pub props: Props,
    /// Nested child arrays by name. Present only once a child level has been
    /// materialized under this row.
    pub children: BTreeMap<String, KeyedArray>,
}

impl KeyedRow {
    /// Renders the row as a JSON object: its properties plus one array-valued
    /// entry per child level.
    ///
    /// Child arrays shadow same-named properties; the engine never produces
    /// that collision, but rendering has to pick one.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut object = match self.props.to_value() {
            Value::Object(object) => object,
            // Props::to_value always yields an object.
            _ => serde_json::Map::new(),
        };
        for (name, child) in &self.children {
            object.insert(name.clone(), child.to_value());
        }
        Value::Object(object)
    }
}

/// Insertion-ordered sequence of keyed rows with a maintained key→index map.
///
/// Order is observable and preserved across updates: surviving rows keep
/// their relative position, a removed row's slot collapses, and added rows
/// append. Lookup by key is O(1) through the index, which is kept in sync by
/// every mutation (the tick-replay cost note in the engine spec: batching
/// amortizes index maintenance across a flush).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KeyedArray {
    rows: Vec<KeyedRow>,
    #[serde(skip)]
    index: HashMap<ItemKey, usize>,
}

impl KeyedArray {
    /// Creates an empty array.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true when the array has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The rows in insertion order.
    #[must_use]
    pub fn rows(&self) -> &[KeyedRow] {
        &self.rows
    }

    /// Position of the row keyed `key`, when present.
    #[must_use]
    pub fn position(&self, key: &ItemKey) -> Option<usize> {
        if self.index.len() != self.rows.len() {
            // Deserialized arrays arrive without an index; fall back to scan.
            return self.rows.iter().position(|row| &row.key == key);
        }
        self.index.get(key).copied()
    }

    /// Shared access to the row keyed `key`.
    #[must_use]
    pub fn get(&self, key: &ItemKey) -> Option<&KeyedRow> {
        self.position(key).map(|at| &self.rows[at])
    }

    /// Mutable access to the row keyed `key`.
    pub fn get_mut(&mut self, key: &ItemKey) -> Option<&mut KeyedRow> {
        self.rebuild_index_if_stale();
        self.position(key).map(|at| &mut self.rows[at])
    }

    /// Appends a new row. Returns `false` (and leaves the array unchanged)
    /// when the key is already present.
    pub fn push(&mut self, key: ItemKey, props: Props) -> bool {
        self.rebuild_index_if_stale();
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key.clone(), self.rows.len());
        self.rows.push(KeyedRow {
            key,
            props,
            children: BTreeMap::new(),
        });
        true
    }

    /// Removes the row keyed `key`, collapsing its slot. Returns the removed
    /// row (with its subtree) when it was present.
    pub fn remove(&mut self, key: &ItemKey) -> Option<KeyedRow> {
        self.rebuild_index_if_stale();
        let at = self.index.remove(key)?;
        let row = self.rows.remove(at);
        for shifted in &self.rows[at..] {
            if let Some(slot) = self.index.get_mut(&shifted.key) {
                *slot -= 1;
            }
        }
        Some(row)
    }

    /// Renders the array as a JSON array of row objects, in insertion order.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Array(self.rows.iter().map(KeyedRow::to_value).collect())
    }

    fn rebuild_index_if_stale(&mut self) {
        if self.index.len() != self.rows.len() {
            self.index = self
                .rows
                .iter()
                .enumerate()
                .map(|(at, row)| (row.key.clone(), at))
                .collect();
        }
    }
}

impl PartialEq for KeyedArray {
    fn eq(&self, other: &Self) -> bool {
        self.rows == other.rows
    }
}

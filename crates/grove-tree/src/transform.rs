// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ordered transform operations over the materialized tree.
//!
//! [`apply_ops`] is the pure boundary between the engine and the outer state
//! container: it takes the current root array, applies a batch of [`TreeOp`]s
//! *in order*, and returns the next root. Order matters — a `Modify` under a
//! key added earlier in the same batch requires that add to have been applied
//! first, so operations are never grouped or reordered here.
//!
//! # Missing-target policy
//!
//! - `Remove`/`Modify` of a row that does not exist: logged warning, operation
//!   skipped. The legitimate cause is a filter gating an ancestor away.
//! - `Add` into a parent that does not exist at a non-root level: a contract
//!   violation by the step graph, returned as [`TreeError::UnknownItem`].
//! - Mismatched segment/key path lengths: always a contract violation.
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::array::KeyedArray;
use crate::ident::ItemKey;
use crate::path::{KeyPath, SegPath};
use crate::props::Props;

/// One transform operation against the materialized tree.
#[derive(Clone, Debug, PartialEq)]
pub enum TreeOp {
    /// Append a row to the array at `path` under the parent reached by `keys`.
    Add {
        /// Segment path of the level receiving the row.
        path: SegPath,
        /// Parent keys reaching that level.
        keys: KeyPath,
        /// Key of the new row.
        key: ItemKey,
        /// The new row's properties.
        props: Props,
    },
    /// Remove the row (and its subtree), collapsing its slot.
    Remove {
        /// Segment path of the level holding the row.
        path: SegPath,
        /// Parent keys reaching that level.
        keys: KeyPath,
        /// Key of the row being removed.
        key: ItemKey,
    },
    /// Set (or clear) one property of an existing row.
    Modify {
        /// Segment path of the level holding the row.
        path: SegPath,
        /// Parent keys reaching that level.
        keys: KeyPath,
        /// Key of the row being modified.
        key: ItemKey,
        /// Property being written.
        property: String,
        /// New value; `None` deletes the property (absent aggregate).
        value: Option<Value>,
    },
}

impl TreeOp {
    /// The segment path this operation targets.
    #[must_use]
    pub fn path(&self) -> &SegPath {
        match self {
            Self::Add { path, .. } | Self::Remove { path, .. } | Self::Modify { path, .. } => path,
        }
    }
}

/// Errors raised by tree transforms. All variants are contract violations by
/// the step graph, not recoverable data conditions.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TreeError {
    /// An `Add` targeted a parent key path that does not exist.
    #[error("path references unknown item: {key} at {path}")]
    UnknownItem {
        /// Level at which the lookup failed.
        path: SegPath,
        /// Key that was not found.
        key: ItemKey,
    },
    /// Segment path and key path lengths differ.
    #[error("segment path {path} carries {keys} parent keys (expected {expected})")]
    PathMismatch {
        /// The mismatched segment path.
        path: SegPath,
        /// Number of keys supplied.
        keys: usize,
        /// Number of keys the path requires.
        expected: usize,
    },
    /// An `Add` reused a key that is already present among its siblings.
    #[error("duplicate item key: {key} at {path}")]
    DuplicateItem {
        /// Level at which the collision occurred.
        path: SegPath,
        /// The colliding key.
        key: ItemKey,
    },
}

/// Applies `ops` to `root` in order, returning the next tree.
///
/// # Errors
///
/// Returns the first contract violation encountered; the returned error
/// leaves no partial-application guarantee (callers treat the batch as
/// poisoned and surface the error to the pipeline owner).
pub fn apply_ops(mut root: KeyedArray, ops: &[TreeOp]) -> Result<KeyedArray, TreeError> {
    for op in ops {
        apply_one(&mut root, op)?;
    }
    Ok(root)
}

fn apply_one(root: &mut KeyedArray, op: &TreeOp) -> Result<(), TreeError> {
    match op {
        TreeOp::Add {
            path,
            keys,
            key,
            props,
        } => {
            let level = match descend(root, path, keys, true)? {
                Some(level) => level,
                None => {
                    // descend() already classified this as a missing parent.
                    return Err(unknown_parent(path, keys));
                }
            };
            if !level.push(key.clone(), props.clone()) {
                return Err(TreeError::DuplicateItem {
                    path: path.clone(),
                    key: key.clone(),
                });
            }
            Ok(())
        }
        TreeOp::Remove { path, keys, key } => {
            match descend(root, path, keys, false)? {
                Some(level) => {
                    if level.remove(key).is_none() {
                        warn!(%path, %key, "remove skipped: row not materialized");
                    }
                }
                None => warn!(%path, %key, "remove skipped: parent not materialized"),
            }
            Ok(())
        }
        TreeOp::Modify {
            path,
            keys,
            key,
            property,
            value,
        } => {
            let row = descend(root, path, keys, false)?.and_then(|level| level.get_mut(key));
            match row {
                Some(row) => {
                    match value {
                        Some(value) => row.props.insert(property.clone(), value.clone()),
                        None => {
                            row.props.remove(property);
                        }
                    }
                }
                None => warn!(%path, %key, property, "modify skipped: row not materialized"),
            }
            Ok(())
        }
    }
}

/// Walks to the array at `path` under the rows named by `keys`.
///
/// With `create_leaf`, the final level's array is materialized lazily (its
/// parent *row* must still exist). Returns `Ok(None)` when a parent row or
/// an intermediate level is missing.
fn descend<'tree>(
    root: &'tree mut KeyedArray,
    path: &SegPath,
    keys: &KeyPath,
    create_leaf: bool,
) -> Result<Option<&'tree mut KeyedArray>, TreeError> {
    if keys.len() != path.len() {
        return Err(TreeError::PathMismatch {
            path: path.clone(),
            keys: keys.len(),
            expected: path.len(),
        });
    }
    let mut level = root;
    for (depth, (segment, parent_key)) in path.segments().iter().zip(keys.keys()).enumerate() {
        let Some(row) = level.get_mut(parent_key) else {
            return Ok(None);
        };
        let last = depth + 1 == path.len();
        level = if create_leaf && last {
            row.children.entry(segment.clone()).or_default()
        } else {
            match row.children.get_mut(segment) {
                Some(child) => child,
                None => return Ok(None),
            }
        };
    }
    Ok(Some(level))
}

fn unknown_parent(path: &SegPath, keys: &KeyPath) -> TreeError {
    // Best-effort attribution: name the innermost key we were asked to find.
    let key = keys
        .keys()
        .last()
        .cloned()
        .unwrap_or_else(|| ItemKey::from("<root>"));
    TreeError::UnknownItem {
        path: path.clone(),
        key,
    }
}

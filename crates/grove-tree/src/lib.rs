// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! grove-tree: keyed-array tree primitives for the grove dataflow engine.
//!
//! This crate is pure data. It defines the vocabulary the engine crate
//! (`grove-core`) speaks — segment paths, key paths, item keys, property
//! maps — plus the materialized tree of ordered keyed arrays and the
//! transform operations that mutate it.
//!
//! # Determinism
//!
//! Identifiers derived from content (group keys, path identifiers) are
//! domain-separated BLAKE3 digests over canonical bytes. Canonical JSON here
//! means sorted object keys, which `serde_json`'s default (BTreeMap-backed)
//! map type already guarantees.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

mod array;
mod ident;
mod path;
mod props;
mod transform;

pub use array::{KeyedArray, KeyedRow};
pub use ident::{canonical_json, make_group_key, Digest, ItemKey, PathHash};
pub use path::{paths_match, KeyPath, SegPath};
pub use props::Props;
pub use transform::{apply_ops, TreeError, TreeOp};

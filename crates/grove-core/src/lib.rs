// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! grove-core: incremental, event-driven dataflow engine for reactive
//! group/aggregate trees.
//!
//! Clients declare a pipeline as a chain of *steps* — group-by,
//! define-property, drop-property, filter, and aggregates (sum, count, min,
//! max, average, pick-by-min/max) — over a stream of record insertions and
//! removals. The engine maintains a materialized tree of keyed arrays
//! (`grove-tree`) such that after every input change the tree reflects the
//! transformation exactly as if recomputed from scratch, produced by O(delta)
//! work.
//!
//! # Architecture
//!
//! ```text
//! add/remove ──▶ InputStep ──▶ step ──▶ … ──▶ step ──▶ OutputBinder
//!                  (events: added / removed / modified, path-addressed)
//!                                                          │ TreeOps
//!                                                   BatchUpdater ──▶ StateSink
//! ```
//!
//! Steps are single-threaded and synchronous: one call to
//! [`Pipeline::add`] re-enters downstream steps inline and returns once every
//! resulting event has been handled. The only buffering in the system is the
//! [`BatchUpdater`](updater::BatchUpdater)'s FIFO of tree operations, which
//! flushes on a size threshold or a time slice and applies operations in
//! enqueue order.
//!
//! # Mutable-property cascade
//!
//! Each step publishes the properties it can re-emit `modified` events for
//! into its [`TypeDescriptor`]'s mutable set; downstream aggregates consult
//! that set at construction to auto-subscribe. This single rule lets
//! aggregates chain through define-property and further aggregates without
//! the caller wiring dependency lists.
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

pub mod aggregate;
mod binder;
mod descriptor;
mod event;
mod pipeline;
mod step;
/// Shape-preserving and shape-changing transparent steps.
pub mod steps;
mod updater;

pub use descriptor::{ArrayDescriptor, ObjectDescriptor, TypeDescriptor};
pub use event::{AddedHandler, ModifiedHandler, RemovedHandler};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineError};
pub use step::{InputStep, Step};
pub use updater::{
    live_updaters, BatchConfig, BatchUpdater, Clock, ManualClock, MonotonicClock, SharedTree,
    StateSink,
};

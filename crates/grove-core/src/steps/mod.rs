// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Transparent steps: group-by, define-property, drop-property, filter.
//!
//! "Transparent" in the sense that their outputs are derived row-for-row from
//! upstream events (as opposed to aggregates, which fold many rows into a
//! parent property — see [`crate::aggregate`]).
mod define_property;
mod drop_property;
mod filter;
mod group_by;

pub use define_property::DefinePropertyStep;
pub use drop_property::DropPropertyStep;
pub use filter::FilterStep;
pub use group_by::GroupByStep;

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Aggregate steps: fold the rows of a nested array into a property of the
//! array's parent.
//!
//! Every aggregate targets a nested array named by its full segment path and
//! publishes one property at the *parent* level. The property is always
//! mutable — its value changes without the parent being removed and re-added
//! — which is exactly what lets aggregates chain: each publishes into the
//! descriptor's mutable set, and the next one auto-subscribes.
//!
//! The shared machinery here owns the per-parent lifecycle (a fold is created
//! lazily on the first child and destroyed with the last) and the emission
//! contract: at most one `modified` per upstream event, carrying the
//! aggregate value from before and after, with equal values suppressed.
//! Concrete folds implement [`AggregateFold`].
mod average;
mod commutative;
mod min_max;
mod pick;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use grove_tree::{ItemKey, KeyPath, PathHash, Props, SegPath};
use serde_json::Value;

use crate::descriptor::TypeDescriptor;
use crate::event::{AddedHandler, Dispatcher, ModifiedHandler, RemovedHandler};
use crate::step::Step;

pub use average::{AverageAggregateStep, AverageFold};
pub use commutative::{
    CommutativeAggregateStep, CommutativeFold, CommutativeOp, CountOp, SumOp,
};
pub use min_max::{MinMaxAggregateStep, MinMaxFold};
pub use pick::{PickByMinMaxStep, PickFold};

/// Which end of the ordering an extremum aggregate chases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Extremum {
    /// Smallest value wins.
    Min,
    /// Largest value wins.
    Max,
}

impl Extremum {
    /// Returns true when `candidate` strictly beats `incumbent`.
    ///
    /// Strict comparison makes ties resolve toward the earlier-discovered
    /// value at every call site that scans in insertion order.
    #[must_use]
    pub fn beats(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::Min => candidate < incumbent,
            Self::Max => candidate > incumbent,
        }
    }
}

/// Per-parent incremental state of one aggregate.
///
/// The machinery snapshots [`value`](Self::value) before and after each
/// `apply_*` call to produce the emitted old/new pair; implementations only
/// maintain their running state.
pub trait AggregateFold {
    /// Current aggregate value, or `None` when it is absent (e.g. no numeric
    /// children yet).
    fn value(&self) -> Option<Value>;

    /// A child row appeared under this parent.
    fn apply_added(&mut self, key: &ItemKey, props: &Props);

    /// A child row disappeared. `props` is the upstream removal payload;
    /// folds that track a mutable property prefer their side table over it.
    fn apply_removed(&mut self, key: &ItemKey, props: &Props);

    /// A tracked property of a child changed.
    fn apply_modified(&mut self, property: &str, key: &ItemKey, old: Option<&Value>, new: Option<&Value>);
}

struct ParentEntry<F> {
    fold: F,
    members: usize,
}

/// Generic aggregate step: subscription wiring, per-parent lifecycle, and
/// emission, parameterized by the fold.
pub struct AggregateStep<F> {
    upstream: Rc<dyn Step>,
    parent_path: SegPath,
    parent_id: PathHash,
    property: String,
    descriptor: TypeDescriptor,
    dispatch: Rc<Dispatcher>,
    // The parents table is owned by the upstream subscriptions; the step
    // itself only routes. Kept here so the type parameter is meaningful.
    _parents: Rc<RefCell<HashMap<PathHash, ParentEntry<F>>>>,
}

impl<F: AggregateFold + 'static> AggregateStep<F> {
    /// Wires an aggregate over `upstream` folding the rows of `child_path`
    /// into `property` at the parent level.
    ///
    /// `tracked` lists the child-level properties whose `modified` events the
    /// fold consumes (auto-detected by the concrete constructors from the
    /// upstream descriptor). `shape` applies any extra descriptor rewrite at
    /// the parent level beyond marking `property` mutable.
    pub(crate) fn wire(
        upstream: Rc<dyn Step>,
        child_path: SegPath,
        property: &str,
        tracked: Vec<String>,
        make_fold: Rc<dyn Fn() -> F>,
        shape: impl FnOnce(&mut TypeDescriptor),
    ) -> Rc<Self> {
        let parent_path = child_path
            .split_last()
            .map(|(parent, _)| parent)
            .unwrap_or_else(SegPath::root);
        let mut descriptor = upstream.type_descriptor();
        if let Some(level) = descriptor.at_path_mut(&parent_path) {
            level.add_mutable(property);
            shape(level);
        }

        let dispatch = Rc::new(Dispatcher::new());
        let parents: Rc<RefCell<HashMap<PathHash, ParentEntry<F>>>> =
            Rc::new(RefCell::new(HashMap::new()));
        let parent_id = parent_path.hash_id();

        upstream.on_added(&child_path, {
            let dispatch = Rc::clone(&dispatch);
            let parents = Rc::clone(&parents);
            let make_fold = Rc::clone(&make_fold);
            let property = property.to_string();
            Rc::new(move |keys, key, props| {
                let (old, new) = {
                    let mut map = parents.borrow_mut();
                    let entry = map.entry(keys.hash_id()).or_insert_with(|| ParentEntry {
                        fold: make_fold(),
                        members: 0,
                    });
                    let old = if entry.members == 0 {
                        None
                    } else {
                        entry.fold.value()
                    };
                    entry.fold.apply_added(key, props);
                    entry.members += 1;
                    (old, entry.fold.value())
                };
                emit(&dispatch, parent_id, &property, keys, old, new);
            })
        });

        upstream.on_removed(&child_path, {
            let dispatch = Rc::clone(&dispatch);
            let parents = Rc::clone(&parents);
            let property = property.to_string();
            Rc::new(move |keys, key, props| {
                let parent_hash = keys.hash_id();
                let (old, new) = {
                    let mut map = parents.borrow_mut();
                    let Some(entry) = map.get_mut(&parent_hash) else {
                        return;
                    };
                    let old = entry.fold.value();
                    entry.fold.apply_removed(key, props);
                    entry.members -= 1;
                    let emptied = entry.members == 0;
                    let new = if emptied { None } else { entry.fold.value() };
                    if emptied {
                        map.remove(&parent_hash);
                    }
                    (old, new)
                };
                emit(&dispatch, parent_id, &property, keys, old, new);
            })
        });

        for tracked_property in tracked {
            let channel = tracked_property.clone();
            upstream.on_modified(&child_path, &channel, {
                let dispatch = Rc::clone(&dispatch);
                let parents = Rc::clone(&parents);
                let property = property.to_string();
                Rc::new(move |keys, key, old_value, new_value| {
                    let (old, new) = {
                        let mut map = parents.borrow_mut();
                        let Some(entry) = map.get_mut(&keys.hash_id()) else {
                            return;
                        };
                        let old = entry.fold.value();
                        entry
                            .fold
                            .apply_modified(&tracked_property, key, old_value, new_value);
                        (old, entry.fold.value())
                    };
                    emit(&dispatch, parent_id, &property, keys, old, new);
                })
            });
        }

        Rc::new(Self {
            upstream,
            parent_path,
            parent_id,
            property: property.to_string(),
            descriptor,
            dispatch,
            _parents: parents,
        })
    }
}

/// Splits the child key path into (grandparent keys, parent key) and emits
/// the parent-level `modified`, suppressing no-op changes.
fn emit(
    dispatch: &Dispatcher,
    parent_id: PathHash,
    property: &str,
    child_keys: &KeyPath,
    old: Option<Value>,
    new: Option<Value>,
) {
    if old == new {
        return;
    }
    let Some((grandparent, parent_key)) = child_keys.split_last() else {
        return;
    };
    dispatch.emit_modified(
        parent_id,
        property,
        &grandparent,
        parent_key,
        old.as_ref(),
        new.as_ref(),
    );
}

impl<F: AggregateFold + 'static> Step for AggregateStep<F> {
    fn on_added(&self, path: &SegPath, handler: AddedHandler) {
        // Aggregates add no rows of their own; row events pass through.
        self.upstream.on_added(path, handler);
    }

    fn on_removed(&self, path: &SegPath, handler: RemovedHandler) {
        self.upstream.on_removed(path, handler);
    }

    fn on_modified(&self, path: &SegPath, property: &str, handler: ModifiedHandler) {
        if *path == self.parent_path && property == self.property {
            self.dispatch
                .register_modified(self.parent_id, property, handler);
        } else {
            self.upstream.on_modified(path, property, handler);
        }
    }

    fn type_descriptor(&self) -> TypeDescriptor {
        self.descriptor.clone()
    }
}

/// The tracked-property list for a value aggregate: the single value
/// property, when the upstream descriptor marks it mutable at the child
/// level.
pub(crate) fn auto_tracked(
    upstream: &Rc<dyn Step>,
    child_path: &SegPath,
    value_property: Option<&str>,
) -> Vec<String> {
    let descriptor = upstream.type_descriptor();
    match (descriptor.at_path(child_path), value_property) {
        (Some(level), Some(property)) if level.is_mutable(property) => {
            vec![property.to_string()]
        }
        _ => Vec::new(),
    }
}

/// All mutable child-level properties (pick aggregates follow every one).
pub(crate) fn all_tracked(upstream: &Rc<dyn Step>, child_path: &SegPath) -> Vec<String> {
    upstream
        .type_descriptor()
        .at_path(child_path)
        .map(|level| level.mutable_properties().iter().cloned().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extremum_comparisons_are_strict() {
        assert!(Extremum::Min.beats(1.0, 2.0));
        assert!(!Extremum::Min.beats(2.0, 2.0));
        assert!(Extremum::Max.beats(3.0, 2.0));
        assert!(!Extremum::Max.beats(2.0, 2.0));
    }
}

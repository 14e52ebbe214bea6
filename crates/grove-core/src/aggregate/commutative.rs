// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Commutative aggregates: sum and count.
//!
//! The operation pair must form an abelian group over the aggregate value
//! under equality: `subtract(add(acc, x), x) == acc` for every `x`, and
//! addition order must not matter. That property is what makes incremental
//! maintenance exact — a removal or modification is folded in as an inverse,
//! never by rescanning the children.
use std::collections::HashMap;
use std::rc::Rc;

use grove_tree::{ItemKey, Props, SegPath};
use serde_json::Value;

use crate::step::Step;

use super::{auto_tracked, AggregateFold, AggregateStep};

/// An abelian fold over child rows.
pub trait CommutativeOp {
    /// The empty-group value.
    fn identity(&self) -> Value;

    /// Folds one child view into the accumulator.
    fn add(&self, acc: &Value, item: &Props) -> Value;

    /// Folds one child view out of the accumulator (the inverse of
    /// [`add`](Self::add)).
    fn subtract(&self, acc: &Value, item: &Props) -> Value;
}

/// Numeric sum over one property. Non-numeric (or absent) values contribute
/// nothing.
pub struct SumOp {
    property: String,
}

impl SumOp {
    /// Sums `property` across child rows.
    #[must_use]
    pub fn new(property: &str) -> Self {
        Self {
            property: property.to_string(),
        }
    }
}

impl CommutativeOp for SumOp {
    fn identity(&self) -> Value {
        Value::from(0.0)
    }

    fn add(&self, acc: &Value, item: &Props) -> Value {
        let acc = acc.as_f64().unwrap_or(0.0);
        Value::from(acc + item.number(&self.property).unwrap_or(0.0))
    }

    fn subtract(&self, acc: &Value, item: &Props) -> Value {
        let acc = acc.as_f64().unwrap_or(0.0);
        Value::from(acc - item.number(&self.property).unwrap_or(0.0))
    }
}

/// Child-row count.
pub struct CountOp;

impl CommutativeOp for CountOp {
    fn identity(&self) -> Value {
        Value::from(0)
    }

    fn add(&self, acc: &Value, _item: &Props) -> Value {
        Value::from(acc.as_i64().unwrap_or(0) + 1)
    }

    fn subtract(&self, acc: &Value, _item: &Props) -> Value {
        Value::from(acc.as_i64().unwrap_or(0) - 1)
    }
}

/// Per-parent state for a commutative aggregate: the running accumulator
/// plus, when the value property is mutable upstream, a side table of each
/// child's current view.
///
/// The side table exists because neither event payload is authoritative for
/// a mutable property: the removal payload may carry the value as originally
/// added, and a `modified` old value is authoritative only within the
/// emitting step.
pub struct CommutativeFold {
    op: Rc<dyn CommutativeOp>,
    acc: Value,
    tracking: bool,
    children: HashMap<ItemKey, Props>,
}

impl AggregateFold for CommutativeFold {
    fn value(&self) -> Option<Value> {
        Some(self.acc.clone())
    }

    fn apply_added(&mut self, key: &ItemKey, props: &Props) {
        if self.tracking {
            self.children.insert(key.clone(), props.clone());
        }
        self.acc = self.op.add(&self.acc, props);
    }

    fn apply_removed(&mut self, key: &ItemKey, props: &Props) {
        let view = if self.tracking {
            self.children.remove(key).unwrap_or_else(|| props.clone())
        } else {
            props.clone()
        };
        self.acc = self.op.subtract(&self.acc, &view);
    }

    fn apply_modified(
        &mut self,
        property: &str,
        key: &ItemKey,
        _old: Option<&Value>,
        new: Option<&Value>,
    ) {
        let Some(view) = self.children.get_mut(key) else {
            return;
        };
        let prior_view = view.clone();
        match new {
            Some(value) => view.insert(property.to_string(), value.clone()),
            None => {
                view.remove(property);
            }
        }
        let next_view = view.clone();
        self.acc = self
            .op
            .add(&self.op.subtract(&self.acc, &prior_view), &next_view);
    }
}

/// Sum/count aggregate step.
pub type CommutativeAggregateStep = AggregateStep<CommutativeFold>;

impl AggregateStep<CommutativeFold> {
    /// Builds a commutative aggregate folding the rows of `array` into
    /// `property` at the parent level.
    ///
    /// `value_property` names the child property the operation reads (used
    /// for mutable auto-detection); pass `None` for operations like count
    /// that read no property.
    pub fn commutative(
        upstream: Rc<dyn Step>,
        array: SegPath,
        property: &str,
        op: Rc<dyn CommutativeOp>,
        value_property: Option<&str>,
    ) -> Rc<Self> {
        let tracked = auto_tracked(&upstream, &array, value_property);
        let tracking = !tracked.is_empty();
        let identity = op.identity();
        let make_fold: Rc<dyn Fn() -> CommutativeFold> = Rc::new(move || CommutativeFold {
            op: Rc::clone(&op),
            acc: identity.clone(),
            tracking,
            children: HashMap::new(),
        });
        Self::wire(upstream, array, property, tracked, make_fold, |_| {})
    }
}

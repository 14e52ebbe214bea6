// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Average aggregate: running `{sum, count}` over a numeric child property.
use std::collections::HashMap;
use std::rc::Rc;

use grove_tree::{ItemKey, Props, SegPath};
use serde_json::Value;

use crate::step::Step;

use super::{auto_tracked, AggregateFold, AggregateStep};

/// Per-parent state: the running sum and the count of numeric children,
/// plus (when the value property is mutable upstream) each child's current
/// numeric value for removal correction.
pub struct AverageFold {
    value_property: String,
    tracking: bool,
    sum: f64,
    count: usize,
    values: HashMap<ItemKey, Option<f64>>,
}

impl AggregateFold for AverageFold {
    fn value(&self) -> Option<Value> {
        // Count here is the numeric-child count: a parent whose children all
        // carry non-numeric values has no average.
        (self.count > 0).then(|| Value::from(self.sum / self.count as f64))
    }

    fn apply_added(&mut self, key: &ItemKey, props: &Props) {
        let value = props.number(&self.value_property);
        if self.tracking {
            self.values.insert(key.clone(), value);
        }
        if let Some(value) = value {
            self.sum += value;
            self.count += 1;
        }
    }

    fn apply_removed(&mut self, key: &ItemKey, props: &Props) {
        let value = if self.tracking {
            self.values.remove(key).flatten()
        } else {
            props.number(&self.value_property)
        };
        if let Some(value) = value {
            self.sum -= value;
            self.count -= 1;
        }
    }

    fn apply_modified(
        &mut self,
        _property: &str,
        key: &ItemKey,
        _old: Option<&Value>,
        new: Option<&Value>,
    ) {
        let prior = self.values.get(key).copied().flatten();
        let next = new.and_then(Value::as_f64);
        self.values.insert(key.clone(), next);
        match (prior, next) {
            (Some(a), Some(b)) => self.sum += b - a,
            (Some(a), None) => {
                self.sum -= a;
                self.count -= 1;
            }
            (None, Some(b)) => {
                self.sum += b;
                self.count += 1;
            }
            (None, None) => {}
        }
    }
}

/// Average aggregate step.
pub type AverageAggregateStep = AggregateStep<AverageFold>;

impl AggregateStep<AverageFold> {
    /// Builds an average over `value_property` of the rows at `array`,
    /// publishing `property` at the parent level.
    pub fn average(
        upstream: Rc<dyn Step>,
        array: SegPath,
        value_property: &str,
        property: &str,
    ) -> Rc<Self> {
        let tracked = auto_tracked(&upstream, &array, Some(value_property));
        let tracking = !tracked.is_empty();
        let value_property = value_property.to_string();
        let make_fold: Rc<dyn Fn() -> AverageFold> = Rc::new(move || AverageFold {
            value_property: value_property.clone(),
            tracking,
            sum: 0.0,
            count: 0,
            values: HashMap::new(),
        });
        Self::wire(upstream, array, property, tracked, make_fold, |_| {})
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::RefCell;

    use grove_tree::KeyPath;
    use serde_json::json;

    use crate::descriptor::TypeDescriptor;
    use crate::step::testing::StubStep;

    use super::*;

    fn props(value: Value) -> Props {
        Props::from_value(&value).unwrap_or_default()
    }

    fn harness() -> (Rc<StubStep>, Rc<RefCell<Vec<Option<Value>>>>) {
        let mut child = TypeDescriptor::leaf();
        child.add_mutable("score");
        let mut root = TypeDescriptor::leaf();
        root.set_array("entries", child);
        let source = StubStep::new(root);
        let step = AggregateStep::average(
            source.clone(),
            SegPath::new(["entries"]),
            "score",
            "avgScore",
        );
        let emissions = Rc::new(RefCell::new(Vec::new()));
        {
            let emissions = Rc::clone(&emissions);
            step.on_modified(
                &SegPath::root(),
                "avgScore",
                Rc::new(move |_, _, _, new| emissions.borrow_mut().push(new.cloned())),
            );
        }
        (source, emissions)
    }

    #[test]
    fn average_tracks_adds_and_removes() {
        let (source, emissions) = harness();
        let entries = SegPath::new(["entries"]);
        let keys = KeyPath::new(["g"]);
        source.added(&entries, &keys, "a", &props(json!({"score": 10})));
        source.added(&entries, &keys, "b", &props(json!({"score": 20})));
        source.removed(&entries, &keys, "a", &props(json!({"score": 10})));
        assert_eq!(
            *emissions.borrow(),
            [Some(json!(10.0)), Some(json!(15.0)), Some(json!(20.0))]
        );
    }

    #[test]
    fn non_numeric_children_do_not_enter_the_average() {
        let (source, emissions) = harness();
        let entries = SegPath::new(["entries"]);
        let keys = KeyPath::new(["g"]);
        source.added(&entries, &keys, "a", &props(json!({"score": "skip"})));
        source.added(&entries, &keys, "b", &props(json!({"score": 30})));
        assert_eq!(*emissions.borrow(), [Some(json!(30.0))]);
    }

    #[test]
    fn modified_corrects_symmetrically_across_numeric_boundaries() {
        let (source, emissions) = harness();
        let entries = SegPath::new(["entries"]);
        let keys = KeyPath::new(["g"]);
        source.added(&entries, &keys, "a", &props(json!({"score": 10})));
        source.added(&entries, &keys, "b", &props(json!({"score": 20})));
        // 20 -> non-numeric: average falls back to a alone.
        source.modified(
            &entries,
            "score",
            &keys,
            "b",
            Some(&json!(20)),
            Some(&json!("n/a")),
        );
        // non-numeric -> 40: re-enters.
        source.modified(
            &entries,
            "score",
            &keys,
            "b",
            Some(&json!("n/a")),
            Some(&json!(40)),
        );
        assert_eq!(
            *emissions.borrow(),
            [
                Some(json!(10.0)),
                Some(json!(15.0)),
                Some(json!(10.0)),
                Some(json!(25.0))
            ]
        );
    }

    #[test]
    fn all_children_non_numeric_means_absent() {
        let (source, emissions) = harness();
        let entries = SegPath::new(["entries"]);
        let keys = KeyPath::new(["g"]);
        source.added(&entries, &keys, "a", &props(json!({"score": 10})));
        source.modified(
            &entries,
            "score",
            &keys,
            "a",
            Some(&json!(10)),
            Some(&json!(null)),
        );
        assert_eq!(*emissions.borrow(), [Some(json!(10.0)), None]);
    }
}

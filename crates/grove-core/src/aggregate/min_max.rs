// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Min/max aggregates over a numeric child property.
use std::rc::Rc;

use grove_tree::{ItemKey, Props, SegPath};
use serde_json::Value;

use crate::step::Step;

use super::{auto_tracked, AggregateFold, AggregateStep, Extremum};

/// Per-parent state: the children's numeric values in discovery order.
///
/// A plain list with a scan extremum; discovery order doubles as the
/// tie-breaker (the strict comparison in [`Extremum::beats`] keeps the
/// earliest). Non-numeric values are not entered at all, so the aggregate is
/// absent until a numeric child appears.
pub struct MinMaxFold {
    extremum: Extremum,
    value_property: String,
    entries: Vec<(ItemKey, f64)>,
}

impl MinMaxFold {
    fn position(&self, key: &ItemKey) -> Option<usize> {
        self.entries.iter().position(|(entry_key, _)| entry_key == key)
    }
}

impl AggregateFold for MinMaxFold {
    fn value(&self) -> Option<Value> {
        let mut best: Option<f64> = None;
        for (_, candidate) in &self.entries {
            best = match best {
                Some(incumbent) if !self.extremum.beats(*candidate, incumbent) => Some(incumbent),
                _ => Some(*candidate),
            };
        }
        best.map(Value::from)
    }

    fn apply_added(&mut self, key: &ItemKey, props: &Props) {
        if let Some(value) = props.number(&self.value_property) {
            self.entries.push((key.clone(), value));
        }
    }

    fn apply_removed(&mut self, key: &ItemKey, _props: &Props) {
        // The entry's own value is authoritative; the removal payload may be
        // stale for a mutable tracked property.
        if let Some(at) = self.position(key) {
            self.entries.remove(at);
        }
    }

    fn apply_modified(
        &mut self,
        _property: &str,
        key: &ItemKey,
        _old: Option<&Value>,
        new: Option<&Value>,
    ) {
        match (self.position(key), new.and_then(Value::as_f64)) {
            (Some(at), Some(value)) => self.entries[at].1 = value,
            (Some(at), None) => {
                self.entries.remove(at);
            }
            (None, Some(value)) => self.entries.push((key.clone(), value)),
            (None, None) => {}
        }
    }
}

/// Min/max aggregate step.
pub type MinMaxAggregateStep = AggregateStep<MinMaxFold>;

impl AggregateStep<MinMaxFold> {
    /// Builds a min/max aggregate over `value_property` of the rows at
    /// `array`, publishing `property` at the parent level.
    pub fn min_max(
        upstream: Rc<dyn Step>,
        array: SegPath,
        value_property: &str,
        property: &str,
        extremum: Extremum,
    ) -> Rc<Self> {
        let tracked = auto_tracked(&upstream, &array, Some(value_property));
        let value_property = value_property.to_string();
        let make_fold: Rc<dyn Fn() -> MinMaxFold> = Rc::new(move || MinMaxFold {
            extremum,
            value_property: value_property.clone(),
            entries: Vec::new(),
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

    fn harness(extremum: Extremum) -> (Rc<StubStep>, Rc<RefCell<Vec<Option<Value>>>>) {
        let mut child = TypeDescriptor::leaf();
        child.add_mutable("value");
        let mut root = TypeDescriptor::leaf();
        root.set_array("items", child);
        let source = StubStep::new(root);
        let step = AggregateStep::min_max(
            source.clone(),
            SegPath::new(["items"]),
            "value",
            "best",
            extremum,
        );
        let emissions = Rc::new(RefCell::new(Vec::new()));
        {
            let emissions = Rc::clone(&emissions);
            step.on_modified(
                &SegPath::root(),
                "best",
                Rc::new(move |_, _, _, new| emissions.borrow_mut().push(new.cloned())),
            );
        }
        (source, emissions)
    }

    #[test]
    fn min_tracks_the_smallest_live_value() {
        let (source, emissions) = harness(Extremum::Min);
        let items = SegPath::new(["items"]);
        let keys = KeyPath::new(["g"]);
        source.added(&items, &keys, "a", &props(json!({"value": 10})));
        source.added(&items, &keys, "b", &props(json!({"value": 20})));
        source.added(&items, &keys, "c", &props(json!({"value": 30})));
        source.removed(&items, &keys, "a", &props(json!({"value": 10})));
        // b=20 and c=30 don't move the min; removing a recomputes it.
        assert_eq!(
            *emissions.borrow(),
            [Some(json!(10.0)), Some(json!(20.0))]
        );
    }

    #[test]
    fn max_ignores_non_numeric_children() {
        let (source, emissions) = harness(Extremum::Max);
        let items = SegPath::new(["items"]);
        let keys = KeyPath::new(["g"]);
        source.added(&items, &keys, "a", &props(json!({"value": "n/a"})));
        assert!(emissions.borrow().is_empty());
        source.added(&items, &keys, "b", &props(json!({"value": 5})));
        assert_eq!(*emissions.borrow(), [Some(json!(5.0))]);
    }

    #[test]
    fn removing_the_last_child_makes_the_aggregate_absent() {
        let (source, emissions) = harness(Extremum::Min);
        let items = SegPath::new(["items"]);
        let keys = KeyPath::new(["g"]);
        let payload = props(json!({"value": 7}));
        source.added(&items, &keys, "a", &payload);
        source.removed(&items, &keys, "a", &payload);
        assert_eq!(*emissions.borrow(), [Some(json!(7.0)), None]);
    }

    #[test]
    fn modified_values_move_the_extremum_both_ways() {
        let (source, emissions) = harness(Extremum::Min);
        let items = SegPath::new(["items"]);
        let keys = KeyPath::new(["g"]);
        source.added(&items, &keys, "a", &props(json!({"value": 10})));
        source.added(&items, &keys, "b", &props(json!({"value": 20})));
        source.modified(&items, "value", &keys, "a", Some(&json!(10)), Some(&json!(25)));
        source.modified(&items, "value", &keys, "b", Some(&json!(20)), Some(&json!(5)));
        assert_eq!(
            *emissions.borrow(),
            [Some(json!(10.0)), Some(json!(20.0)), Some(json!(5.0))]
        );
    }
}

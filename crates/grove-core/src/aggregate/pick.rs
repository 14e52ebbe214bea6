// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pick-by-min/max: publish the extremal child *row* as an object property.
//!
//! Unlike the value aggregates, the pick step's output is the entire composed
//! row (immutable props overlaid with tracked mutable values) of the child
//! whose comparison property is extremal. Any mutable child property can
//! change the output — a new extremum, or a new value on the currently
//! picked row — so the step follows every mutable property at the child
//! level, not just the comparison property.
use std::collections::BTreeMap;
use std::rc::Rc;

use grove_tree::{ItemKey, Props, SegPath};
use serde_json::Value;

use crate::descriptor::TypeDescriptor;
use crate::step::Step;

use super::{all_tracked, AggregateFold, AggregateStep, Extremum};

/// Per-parent state: all children in discovery order with their composed
/// views; the pick is recomputed by scan, ties resolving to the earliest.
pub struct PickFold {
    extremum: Extremum,
    comparison: String,
    tracked: Vec<String>,
    children: Vec<PickChild>,
}

struct PickChild {
    key: ItemKey,
    props: Props,
    mutable_values: BTreeMap<String, Option<Value>>,
}

impl PickChild {
    fn view(&self) -> Props {
        self.props.overlay(&self.mutable_values)
    }
}

impl PickFold {
    fn position(&self, key: &ItemKey) -> Option<usize> {
        self.children.iter().position(|child| &child.key == key)
    }
}

impl AggregateFold for PickFold {
    fn value(&self) -> Option<Value> {
        let mut best: Option<(f64, &PickChild)> = None;
        for child in &self.children {
            let view = child.view();
            let Some(candidate) = view.number(&self.comparison) else {
                continue;
            };
            best = match best {
                Some((incumbent, _)) if !self.extremum.beats(candidate, incumbent) => best,
                _ => Some((candidate, child)),
            };
        }
        best.map(|(_, child)| child.view().to_value())
    }

    fn apply_added(&mut self, key: &ItemKey, props: &Props) {
        let mutable_values = self
            .tracked
            .iter()
            .map(|name| (name.clone(), props.get(name).cloned()))
            .collect();
        self.children.push(PickChild {
            key: key.clone(),
            props: props.clone(),
            mutable_values,
        });
    }

    fn apply_removed(&mut self, key: &ItemKey, _props: &Props) {
        if let Some(at) = self.position(key) {
            self.children.remove(at);
        }
    }

    fn apply_modified(
        &mut self,
        property: &str,
        key: &ItemKey,
        _old: Option<&Value>,
        new: Option<&Value>,
    ) {
        if let Some(at) = self.position(key) {
            self.children[at]
                .mutable_values
                .insert(property.to_string(), new.cloned());
        }
    }
}

/// Pick-by-min/max aggregate step.
pub type PickByMinMaxStep = AggregateStep<PickFold>;

impl AggregateStep<PickFold> {
    /// Builds a pick over the rows at `array`, publishing the row with the
    /// extremal `comparison` value as the object property `property` at the
    /// parent level.
    pub fn pick(
        upstream: Rc<dyn Step>,
        array: SegPath,
        comparison: &str,
        property: &str,
        extremum: Extremum,
    ) -> Rc<Self> {
        let tracked = all_tracked(&upstream, &array);
        let child_ty = upstream
            .type_descriptor()
            .at_path(&array)
            .cloned()
            .unwrap_or_else(TypeDescriptor::leaf);
        let comparison = comparison.to_string();
        let fold_tracked = tracked.clone();
        let make_fold: Rc<dyn Fn() -> PickFold> = Rc::new(move || PickFold {
            extremum,
            comparison: comparison.clone(),
            tracked: fold_tracked.clone(),
            children: Vec::new(),
        });
        let object_name = property.to_string();
        Self::wire(upstream, array, property, tracked, make_fold, move |level| {
            level.set_object(object_name, child_ty);
        })
    }
}

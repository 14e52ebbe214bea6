// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Output binder: project the last step's events onto tree operations.
//!
//! The binder walks the final descriptor and registers, at every array level
//! it exposes, `added` and `removed` handlers plus one `modified` handler per
//! mutable property at that level. Each handler enqueues a [`TreeOp`] into
//! the batched updater, preserving event order — the updater's in-order
//! application is what keeps compound deltas (group add, aggregate modify,
//! member add) consistent.
//!
//! Handlers hold the updater weakly: dropping the pipeline handle reclaims
//! the updater even though the step graph still holds the closures.
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use grove_tree::TreeOp;

use crate::step::Step;
use crate::updater::BatchUpdater;

/// Wires the binder between `last` and `updater`.
pub(crate) fn bind_output(last: &Rc<dyn Step>, updater: &Rc<RefCell<BatchUpdater>>) {
    let descriptor = last.type_descriptor();
    for (path, level) in descriptor.array_levels() {
        {
            let weak: Weak<RefCell<BatchUpdater>> = Rc::downgrade(updater);
            let path = path.clone();
            last.on_added(
                &path.clone(),
                Rc::new(move |keys, key, props| {
                    if let Some(updater) = weak.upgrade() {
                        updater.borrow_mut().enqueue(TreeOp::Add {
                            path: path.clone(),
                            keys: keys.clone(),
                            key: key.clone(),
                            props: props.clone(),
                        });
                    }
                }),
            );
        }
        {
            let weak: Weak<RefCell<BatchUpdater>> = Rc::downgrade(updater);
            let path = path.clone();
            last.on_removed(
                &path.clone(),
                Rc::new(move |keys, key, _props| {
                    if let Some(updater) = weak.upgrade() {
                        updater.borrow_mut().enqueue(TreeOp::Remove {
                            path: path.clone(),
                            keys: keys.clone(),
                            key: key.clone(),
                        });
                    }
                }),
            );
        }
        for property in level.mutable_properties() {
            let weak: Weak<RefCell<BatchUpdater>> = Rc::downgrade(updater);
            let path = path.clone();
            let property = property.clone();
            last.on_modified(
                &path.clone(),
                &property.clone(),
                Rc::new(move |keys, key, _old, new| {
                    if let Some(updater) = weak.upgrade() {
                        updater.borrow_mut().enqueue(TreeOp::Modify {
                            path: path.clone(),
                            keys: keys.clone(),
                            key: key.clone(),
                            property: property.clone(),
                            value: new.cloned(),
                        });
                    }
                }),
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use grove_tree::{KeyPath, Props, SegPath};
    use serde_json::json;

    use crate::descriptor::TypeDescriptor;
    use crate::step::testing::StubStep;
    use crate::step::Step;
    use crate::updater::{BatchConfig, BatchUpdater, ManualClock, SharedTree};

    use super::*;

    #[test]
    fn events_become_ordered_tree_ops() {
        let mut child = TypeDescriptor::leaf();
        child.add_mutable("amount");
        let mut root_ty = TypeDescriptor::leaf();
        root_ty.set_array("orders", child);
        root_ty.add_mutable("total");
        let source = StubStep::new(root_ty);

        let tree = Rc::new(SharedTree::new());
        let clock = Rc::new(ManualClock::new());
        let updater = Rc::new(RefCell::new(BatchUpdater::new(
            tree.clone(),
            BatchConfig::default(),
            clock,
        )));
        let last: Rc<dyn Step> = source.clone();
        bind_output(&last, &updater);

        let root = SegPath::root();
        let orders = SegPath::new(["orders"]);
        let props = Props::from_value(&json!({"cust": "C"})).unwrap();
        source.added(&root, &KeyPath::root(), "c", &props);
        source.modified(&root, "total", &KeyPath::root(), "c", None, Some(&json!(50)));
        source.added(
            &orders,
            &KeyPath::new(["c"]),
            "o1",
            &Props::from_value(&json!({"amount": 50})).unwrap(),
        );

        updater.borrow_mut().force_flush().unwrap();
        assert_eq!(
            tree.render(),
            json!([{"cust": "C", "total": 50, "orders": [{"amount": 50}]}])
        );
    }

    #[test]
    fn dropping_the_updater_detaches_the_binder() {
        let source = StubStep::new(TypeDescriptor::leaf());
        let tree = Rc::new(SharedTree::new());
        let clock = Rc::new(ManualClock::new());
        let updater = Rc::new(RefCell::new(BatchUpdater::new(
            tree,
            BatchConfig::default(),
            clock,
        )));
        let last: Rc<dyn Step> = source.clone();
        bind_output(&last, &updater);
        drop(updater);
        // Handlers are still registered but their weak upgrade fails; the
        // emission must not panic.
        source.added(
            &SegPath::root(),
            &KeyPath::root(),
            "a",
            &Props::new(),
        );
    }
}

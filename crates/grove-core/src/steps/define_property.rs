// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Define-property: synthesize a computed property at a scope level.
//!
//! The compute function is opaque, so its mutable inputs are *declared* by
//! the caller. The step caches each row's base props and the current value of
//! every declared dependency; on a dependency change it recomputes and emits
//! a `modified` for the synthesized property — or nothing, when the computed
//! value did not change.
//!
//! Initial-value convention: a dependency's cached value is read from the
//! `added` payload; a dependency absent there stays *absent* (missing from
//! the composed view) until its first `modified` arrives.
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use grove_tree::{ItemKey, PathHash, Props, SegPath};
use serde_json::Value;

use crate::descriptor::TypeDescriptor;
use crate::event::{AddedHandler, Dispatcher, ModifiedHandler, RemovedHandler};
use crate::step::Step;

/// A pure function from an item's composed view to a property value.
pub type ComputeFn = Rc<dyn Fn(&Props) -> Value>;

/// Synthesizes a property at a scope level from a pure compute function.
pub struct DefinePropertyStep {
    upstream: Rc<dyn Step>,
    scope: SegPath,
    property: String,
    descriptor: TypeDescriptor,
    dispatch: Rc<Dispatcher>,
}

#[derive(Default)]
struct DefineState {
    rows: HashMap<(PathHash, ItemKey), DefineRow>,
}

struct DefineRow {
    props: Props,
    mutable_values: BTreeMap<String, Option<Value>>,
    computed: Value,
}

impl DefinePropertyStep {
    /// Builds a define-property over `upstream` at `scope`.
    ///
    /// `dependencies` names the upstream-mutable properties the compute
    /// function reads; the step re-computes on their `modified` events. When
    /// the list is non-empty the synthesized property is itself mutable.
    pub fn new(
        upstream: Rc<dyn Step>,
        scope: SegPath,
        property: &str,
        dependencies: Vec<String>,
        compute: ComputeFn,
    ) -> Rc<Self> {
        let mut descriptor = upstream.type_descriptor();
        if !dependencies.is_empty() {
            if let Some(level) = descriptor.at_path_mut(&scope) {
                level.add_mutable(property);
            }
        }

        let dispatch = Rc::new(Dispatcher::new());
        let state = Rc::new(RefCell::new(DefineState::default()));
        let scope_id = scope.hash_id();

        upstream.on_added(&scope, {
            let dispatch = Rc::clone(&dispatch);
            let state = Rc::clone(&state);
            let compute = Rc::clone(&compute);
            let dependencies = dependencies.clone();
            let property = property.to_string();
            Rc::new(move |keys, key, props| {
                let mutable_values: BTreeMap<String, Option<Value>> = dependencies
                    .iter()
                    .map(|dep| (dep.clone(), props.get(dep).cloned()))
                    .collect();
                let computed = compute(&props.overlay(&mutable_values));
                state.borrow_mut().rows.insert(
                    (keys.hash_id(), key.clone()),
                    DefineRow {
                        props: props.clone(),
                        mutable_values,
                        computed: computed.clone(),
                    },
                );
                dispatch.emit_added(scope_id, keys, key, &props.with(&property, computed));
            })
        });

        upstream.on_removed(&scope, {
            let dispatch = Rc::clone(&dispatch);
            let state = Rc::clone(&state);
            let property = property.to_string();
            Rc::new(move |keys, key, props| {
                let computed = state
                    .borrow_mut()
                    .rows
                    .remove(&(keys.hash_id(), key.clone()))
                    .map(|row| row.computed);
                let Some(computed) = computed else { return };
                dispatch.emit_removed(scope_id, keys, key, &props.with(&property, computed));
            })
        });

        for dep in &dependencies {
            upstream.on_modified(&scope, dep, {
                let dispatch = Rc::clone(&dispatch);
                let state = Rc::clone(&state);
                let compute = Rc::clone(&compute);
                let dep = dep.clone();
                let property = property.to_string();
                Rc::new(move |keys, key, _old, new| {
                    let change = {
                        let mut st = state.borrow_mut();
                        let Some(row) = st.rows.get_mut(&(keys.hash_id(), key.clone())) else {
                            return;
                        };
                        row.mutable_values.insert(dep.clone(), new.cloned());
                        let next = compute(&row.props.overlay(&row.mutable_values));
                        if next == row.computed {
                            None
                        } else {
                            let prior = std::mem::replace(&mut row.computed, next.clone());
                            Some((prior, next))
                        }
                    };
                    if let Some((prior, next)) = change {
                        dispatch.emit_modified(
                            scope_id,
                            &property,
                            keys,
                            key,
                            Some(&prior),
                            Some(&next),
                        );
                    }
                })
            });
        }

        Rc::new(Self {
            upstream,
            scope,
            property: property.to_string(),
            descriptor,
            dispatch,
        })
    }
}

impl Step for DefinePropertyStep {
    fn on_added(&self, path: &SegPath, handler: AddedHandler) {
        if *path == self.scope {
            self.dispatch.register_added(path.hash_id(), handler);
        } else {
            self.upstream.on_added(path, handler);
        }
    }

    fn on_removed(&self, path: &SegPath, handler: RemovedHandler) {
        if *path == self.scope {
            self.dispatch.register_removed(path.hash_id(), handler);
        } else {
            self.upstream.on_removed(path, handler);
        }
    }

    fn on_modified(&self, path: &SegPath, property: &str, handler: ModifiedHandler) {
        if *path == self.scope && property == self.property {
            self.dispatch
                .register_modified(path.hash_id(), property, handler);
        } else {
            self.upstream.on_modified(path, property, handler);
        }
    }

    fn type_descriptor(&self) -> TypeDescriptor {
        self.descriptor.clone()
    }
}

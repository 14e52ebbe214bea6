// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Filter: gate rows at a scope level behind a predicate.
//!
//! The step keeps state for *every* row it has seen — passing or not —
//! because a dependency change can flip the predicate either way and the
//! step must then emit the row's appearance or disappearance itself.
//!
//! Events at paths *below* the scope are gated on the scope ancestor's pass
//! status. While an ancestor is gated, its descendant rows are recorded in an
//! insertion-ordered registry (adds append, removes cancel, modifies update
//! the recorded props); on a `false → true` transition the registry replays
//! as `added` events, and on `true → false` it unwinds as `removed` events
//! (children first). Forwarding a child of a non-passing ancestor would make
//! the output binder materialize children into parents that do not exist —
//! the "path references unknown item" failure.
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use grove_tree::{ItemKey, KeyPath, PathHash, Props, SegPath};
use serde_json::Value;
use tracing::warn;

use crate::descriptor::TypeDescriptor;
use crate::event::{AddedHandler, Dispatcher, ModifiedHandler, RemovedHandler};
use crate::step::Step;

/// A pure predicate over an item's composed view.
pub type PredicateFn = Rc<dyn Fn(&Props) -> bool>;

/// Gates rows at a scope level behind a predicate.
pub struct FilterStep {
    upstream: Rc<dyn Step>,
    scope: SegPath,
    scope_id: PathHash,
    descriptor: TypeDescriptor,
    dispatch: Rc<Dispatcher>,
    state: Rc<RefCell<FilterState>>,
    bridged_added: RefCell<HashSet<PathHash>>,
    bridged_removed: RefCell<HashSet<PathHash>>,
    bridged_modified: RefCell<HashSet<(PathHash, String)>>,
}

#[derive(Default)]
struct FilterState {
    rows: HashMap<(PathHash, ItemKey), FilterRow>,
}

struct FilterRow {
    props: Props,
    mutable_values: BTreeMap<String, Option<Value>>,
    passed: bool,
    /// Live rows below this one, in insertion order, with props kept current
    /// while gated. Replayed as `added` events when the row starts passing.
    descendants: Vec<Descendant>,
}

impl FilterRow {
    fn view(&self) -> Props {
        self.props.overlay(&self.mutable_values)
    }
}

#[derive(Clone)]
struct Descendant {
    path_id: PathHash,
    keys: KeyPath,
    key: ItemKey,
    props: Props,
}

impl FilterStep {
    /// Builds a filter over `upstream` at `scope`.
    ///
    /// `dependencies` names the upstream-mutable properties the predicate
    /// reads; their `modified` events re-evaluate the row.
    pub fn new(
        upstream: Rc<dyn Step>,
        scope: SegPath,
        dependencies: Vec<String>,
        predicate: PredicateFn,
    ) -> Rc<Self> {
        let descriptor = upstream.type_descriptor();
        let scope_level = descriptor.at_path(&scope).cloned().unwrap_or_default();

        let dispatch = Rc::new(Dispatcher::new());
        let state = Rc::new(RefCell::new(FilterState::default()));
        let scope_id = scope.hash_id();

        upstream.on_added(&scope, {
            let dispatch = Rc::clone(&dispatch);
            let state = Rc::clone(&state);
            let predicate = Rc::clone(&predicate);
            let dependencies = dependencies.clone();
            Rc::new(move |keys, key, props| {
                let mutable_values: BTreeMap<String, Option<Value>> = dependencies
                    .iter()
                    .map(|dep| (dep.clone(), props.get(dep).cloned()))
                    .collect();
                let view = props.overlay(&mutable_values);
                let passed = predicate(&view);
                state.borrow_mut().rows.insert(
                    (keys.hash_id(), key.clone()),
                    FilterRow {
                        props: props.clone(),
                        mutable_values,
                        passed,
                        descendants: Vec::new(),
                    },
                );
                if passed {
                    dispatch.emit_added(scope_id, keys, key, &view);
                }
            })
        });

        upstream.on_removed(&scope, {
            let dispatch = Rc::clone(&dispatch);
            let state = Rc::clone(&state);
            Rc::new(move |keys, key, _props| {
                let row = state.borrow_mut().rows.remove(&(keys.hash_id(), key.clone()));
                let Some(row) = row else { return };
                if row.passed {
                    dispatch.emit_removed(scope_id, keys, key, &row.view());
                }
            })
        });

        // Every mutable scope property is intercepted: dependencies drive
        // re-evaluation, the rest keep the cached props current so that a
        // later transition replays fresh values.
        for property in scope_level.mutable_properties() {
            let is_dependency = dependencies.contains(property);
            upstream.on_modified(&scope, property, {
                let dispatch = Rc::clone(&dispatch);
                let state = Rc::clone(&state);
                let predicate = Rc::clone(&predicate);
                let property = property.clone();
                Rc::new(move |keys, key, old, new| {
                    enum Reaction {
                        Appear(Props, Vec<Descendant>),
                        Disappear(Props, Vec<Descendant>),
                        Forward,
                        Silent,
                    }
                    let reaction = {
                        let mut st = state.borrow_mut();
                        let Some(row) = st.rows.get_mut(&(keys.hash_id(), key.clone())) else {
                            return;
                        };
                        if is_dependency {
                            row.mutable_values.insert(property.clone(), new.cloned());
                            let view = row.view();
                            let now = predicate(&view);
                            let was = std::mem::replace(&mut row.passed, now);
                            match (was, now) {
                                (false, true) => Reaction::Appear(view, row.descendants.clone()),
                                (true, false) => {
                                    Reaction::Disappear(view, row.descendants.clone())
                                }
                                (true, true) => Reaction::Forward,
                                (false, false) => Reaction::Silent,
                            }
                        } else {
                            match new {
                                Some(value) => {
                                    row.props.insert(property.clone(), value.clone());
                                }
                                None => {
                                    row.props.remove(&property);
                                }
                            }
                            if row.passed {
                                Reaction::Forward
                            } else {
                                Reaction::Silent
                            }
                        }
                    };
                    match reaction {
                        Reaction::Appear(view, descendants) => {
                            dispatch.emit_added(scope_id, keys, key, &view);
                            for d in descendants {
                                dispatch.emit_added(d.path_id, &d.keys, &d.key, &d.props);
                            }
                        }
                        Reaction::Disappear(view, descendants) => {
                            // Unwind children before the row so downstream
                            // per-parent state (aggregates past this filter)
                            // stays exact; the rows remain live upstream and
                            // in the registry for a later replay.
                            for d in descendants.iter().rev() {
                                dispatch.emit_removed(d.path_id, &d.keys, &d.key, &d.props);
                            }
                            dispatch.emit_removed(scope_id, keys, key, &view);
                        }
                        Reaction::Forward => {
                            dispatch.emit_modified(scope_id, &property, keys, key, old, new);
                        }
                        Reaction::Silent => {}
                    }
                })
            });
        }

        Rc::new(Self {
            upstream,
            scope,
            scope_id,
            descriptor,
            dispatch,
            state,
            bridged_added: RefCell::new(HashSet::new()),
            bridged_removed: RefCell::new(HashSet::new()),
            bridged_modified: RefCell::new(HashSet::new()),
        })
    }

    /// Locates the gating ancestor row for an event below the scope.
    fn ancestor<'state>(
        st: &'state mut FilterState,
        scope_len: usize,
        keys: &KeyPath,
    ) -> Option<&'state mut FilterRow> {
        let (enclosing, rest) = keys.split_at(scope_len)?;
        let row_key = rest.first()?;
        let row = st.rows.get_mut(&(enclosing.hash_id(), row_key.clone()));
        if row.is_none() {
            warn!(row = %row_key, "filter saw a descendant of an unknown row");
        }
        row
    }

    fn ensure_added_bridge(&self, path: &SegPath) {
        let path_id = path.hash_id();
        if !self.bridged_added.borrow_mut().insert(path_id) {
            return;
        }
        let dispatch = Rc::clone(&self.dispatch);
        let state = Rc::clone(&self.state);
        let scope_len = self.scope.len();
        self.upstream.on_added(
            path,
            Rc::new(move |keys, key, props| {
                let forward = {
                    let mut st = state.borrow_mut();
                    let Some(row) = FilterStep::ancestor(&mut st, scope_len, keys) else {
                        return;
                    };
                    row.descendants.push(Descendant {
                        path_id,
                        keys: keys.clone(),
                        key: key.clone(),
                        props: props.clone(),
                    });
                    row.passed
                };
                if forward {
                    dispatch.emit_added(path_id, keys, key, props);
                }
            }),
        );
    }

    fn ensure_removed_bridge(&self, path: &SegPath) {
        let path_id = path.hash_id();
        if !self.bridged_removed.borrow_mut().insert(path_id) {
            return;
        }
        let dispatch = Rc::clone(&self.dispatch);
        let state = Rc::clone(&self.state);
        let scope_len = self.scope.len();
        self.upstream.on_removed(
            path,
            Rc::new(move |keys, key, props| {
                let forward = {
                    let mut st = state.borrow_mut();
                    let Some(row) = FilterStep::ancestor(&mut st, scope_len, keys) else {
                        return;
                    };
                    if let Some(at) = row
                        .descendants
                        .iter()
                        .position(|d| d.path_id == path_id && d.keys == *keys && d.key == *key)
                    {
                        row.descendants.remove(at);
                    }
                    row.passed
                };
                if forward {
                    dispatch.emit_removed(path_id, keys, key, props);
                }
            }),
        );
    }

    fn ensure_modified_bridge(&self, path: &SegPath, property: &str) {
        let path_id = path.hash_id();
        if !self
            .bridged_modified
            .borrow_mut()
            .insert((path_id, property.to_string()))
        {
            return;
        }
        let dispatch = Rc::clone(&self.dispatch);
        let state = Rc::clone(&self.state);
        let scope_len = self.scope.len();
        let channel = property.to_string();
        let property = channel.clone();
        self.upstream.on_modified(
            path,
            &channel,
            Rc::new(move |keys, key, old, new| {
                let forward = {
                    let mut st = state.borrow_mut();
                    let Some(row) = FilterStep::ancestor(&mut st, scope_len, keys) else {
                        return;
                    };
                    if let Some(d) = row
                        .descendants
                        .iter_mut()
                        .find(|d| d.path_id == path_id && d.keys == *keys && d.key == *key)
                    {
                        match new {
                            Some(value) => d.props.insert(property.clone(), value.clone()),
                            None => {
                                d.props.remove(&property);
                            }
                        }
                    }
                    row.passed
                };
                if forward {
                    dispatch.emit_modified(path_id, &property, keys, key, old, new);
                }
            }),
        );
    }
}

impl Step for FilterStep {
    fn on_added(&self, path: &SegPath, handler: AddedHandler) {
        if *path == self.scope {
            self.dispatch.register_added(self.scope_id, handler);
        } else if path.starts_with(&self.scope) {
            self.ensure_added_bridge(path);
            self.dispatch.register_added(path.hash_id(), handler);
        } else {
            self.upstream.on_added(path, handler);
        }
    }

    fn on_removed(&self, path: &SegPath, handler: RemovedHandler) {
        if *path == self.scope {
            self.dispatch.register_removed(self.scope_id, handler);
        } else if path.starts_with(&self.scope) {
            self.ensure_removed_bridge(path);
            self.dispatch.register_removed(path.hash_id(), handler);
        } else {
            self.upstream.on_removed(path, handler);
        }
    }

    fn on_modified(&self, path: &SegPath, property: &str, handler: ModifiedHandler) {
        if *path == self.scope {
            // All scope channels are intercepted; non-mutable properties
            // simply never fire.
            self.dispatch
                .register_modified(self.scope_id, property, handler);
        } else if path.starts_with(&self.scope) {
            self.ensure_modified_bridge(path, property);
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

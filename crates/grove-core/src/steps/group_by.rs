// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Group-by: partition the rows at a scope level into keyed groups.
//!
//! At the scope level, grouping properties move to an outer shell row (keyed
//! by a canonical-JSON digest of their values) and the remaining properties
//! move into a child array under that shell. Shell rows appear when their
//! first member arrives and disappear with their last.
//!
//! When a grouping property is mutable upstream, a `modified` event can move
//! a member between groups; the emission order is fixed: old-child remove,
//! old-group remove if emptied, new-group add if fresh, new-child add.
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use grove_tree::{make_group_key, ItemKey, KeyPath, PathHash, Props, SegPath};
use tracing::warn;

use crate::descriptor::TypeDescriptor;
use crate::event::{AddedHandler, Dispatcher, ModifiedHandler, RemovedHandler};
use crate::step::Step;

/// Partitions rows at a scope level into groups keyed by a subset of their
/// properties.
pub struct GroupByStep {
    upstream: Rc<dyn Step>,
    scope: SegPath,
    scope_id: PathHash,
    child_path: SegPath,
    child_id: PathHash,
    descriptor: TypeDescriptor,
    dispatch: Rc<Dispatcher>,
    state: Rc<RefCell<GroupByState>>,
    bridged_added: RefCell<HashSet<PathHash>>,
    bridged_removed: RefCell<HashSet<PathHash>>,
    bridged_modified: RefCell<HashSet<(PathHash, String)>>,
}

#[derive(Default)]
struct GroupByState {
    /// Per enclosing parent: group key → group record.
    groups: HashMap<PathHash, HashMap<ItemKey, GroupRecord>>,
    /// Per upstream row: which group it currently sits in, with its current
    /// grouping values and remaining (member) properties.
    rows: HashMap<(PathHash, ItemKey), RowRecord>,
}

struct GroupRecord {
    members: usize,
    /// The grouping properties as emitted on the shell row.
    snapshot: Props,
}

struct RowRecord {
    group_key: ItemKey,
    grouping_values: Props,
    member_props: Props,
}

impl GroupByStep {
    /// Builds a group-by over `upstream` at `scope`, grouping by `grouping`
    /// into a child array named `array_name`.
    pub fn new(
        upstream: Rc<dyn Step>,
        scope: SegPath,
        grouping: Vec<String>,
        array_name: &str,
    ) -> Rc<Self> {
        let upstream_descriptor = upstream.type_descriptor();
        let scope_level = upstream_descriptor
            .at_path(&scope)
            .cloned()
            .unwrap_or_default();

        // Shell rows carry only the grouping properties, none of them
        // mutable; everything else about the item moves to the member type.
        let mut member_ty = scope_level.clone();
        for name in &grouping {
            member_ty.remove_mutable(name);
        }
        let mut shell = TypeDescriptor::leaf();
        shell.set_array(array_name, member_ty);

        let mut descriptor = upstream_descriptor.clone();
        if let Some(level) = descriptor.at_path_mut(&scope) {
            *level = shell;
        }

        let child_path = scope.child(array_name);
        let dispatch = Rc::new(Dispatcher::new());
        let state = Rc::new(RefCell::new(GroupByState::default()));
        let scope_id = scope.hash_id();
        let child_id = child_path.hash_id();

        // One-shot upstream registration for the scope level.
        upstream.on_added(&scope, {
            let dispatch = Rc::clone(&dispatch);
            let state = Rc::clone(&state);
            let grouping = grouping.clone();
            Rc::new(move |keys, key, props| {
                let grouping_values = props.subset(&grouping);
                let group_key = make_group_key(props, &grouping);
                let member_props = props.without(&grouping);
                let parent_id = keys.hash_id();
                let first = {
                    let st = &mut *state.borrow_mut();
                    st.rows.insert(
                        (parent_id, key.clone()),
                        RowRecord {
                            group_key: group_key.clone(),
                            grouping_values: grouping_values.clone(),
                            member_props: member_props.clone(),
                        },
                    );
                    let record = st
                        .groups
                        .entry(parent_id)
                        .or_default()
                        .entry(group_key.clone())
                        .or_insert_with(|| GroupRecord {
                            members: 0,
                            snapshot: grouping_values.clone(),
                        });
                    record.members += 1;
                    record.members == 1
                };
                if first {
                    dispatch.emit_added(scope_id, keys, &group_key, &grouping_values);
                }
                dispatch.emit_added(child_id, &keys.child(group_key), key, &member_props);
            })
        });

        upstream.on_removed(&scope, {
            let dispatch = Rc::clone(&dispatch);
            let state = Rc::clone(&state);
            Rc::new(move |keys, key, _props| {
                let parent_id = keys.hash_id();
                let removal = {
                    let st = &mut *state.borrow_mut();
                    let Some(row) = st.rows.remove(&(parent_id, key.clone())) else {
                        warn!(%key, "group-by removal for unknown row");
                        return;
                    };
                    let mut emptied = None;
                    if let Some(table) = st.groups.get_mut(&parent_id) {
                        if let Some(record) = table.get_mut(&row.group_key) {
                            record.members -= 1;
                            if record.members == 0 {
                                emptied = table
                                    .remove(&row.group_key)
                                    .map(|record| record.snapshot);
                            }
                        }
                        if table.is_empty() {
                            st.groups.remove(&parent_id);
                        }
                    }
                    (row, emptied)
                };
                let (row, emptied) = removal;
                dispatch.emit_removed(
                    child_id,
                    &keys.child(row.group_key.clone()),
                    key,
                    &row.member_props,
                );
                if let Some(snapshot) = emptied {
                    dispatch.emit_removed(scope_id, keys, &row.group_key, &snapshot);
                }
            })
        });

        // Mutable scope properties: grouping ones can move a row between
        // groups, the rest keep the member cache current and re-emit at the
        // member level with the group key spliced into the key path.
        for property in scope_level.mutable_properties() {
            if grouping.contains(property) {
                upstream.on_modified(&scope, property, {
                    let dispatch = Rc::clone(&dispatch);
                    let state = Rc::clone(&state);
                    let grouping = grouping.clone();
                    let property = property.clone();
                    Rc::new(move |keys, key, _old, new| {
                        let parent_id = keys.hash_id();
                        let moved = {
                            let st = &mut *state.borrow_mut();
                            let Some(row) = st.rows.get_mut(&(parent_id, key.clone())) else {
                                return;
                            };
                            match new {
                                Some(value) => {
                                    row.grouping_values.insert(property.clone(), value.clone());
                                }
                                None => {
                                    row.grouping_values.remove(&property);
                                }
                            }
                            let next_key = make_group_key(&row.grouping_values, &grouping);
                            if next_key == row.group_key {
                                None
                            } else {
                                let prior_key =
                                    std::mem::replace(&mut row.group_key, next_key.clone());
                                let member_props = row.member_props.clone();
                                let next_snapshot = row.grouping_values.clone();
                                let table = st.groups.entry(parent_id).or_default();
                                let mut prior_snapshot = None;
                                if let Some(record) = table.get_mut(&prior_key) {
                                    record.members -= 1;
                                    if record.members == 0 {
                                        prior_snapshot = table
                                            .remove(&prior_key)
                                            .map(|record| record.snapshot);
                                    }
                                }
                                let record =
                                    table.entry(next_key.clone()).or_insert_with(|| GroupRecord {
                                        members: 0,
                                        snapshot: next_snapshot.clone(),
                                    });
                                record.members += 1;
                                let fresh = record.members == 1;
                                Some(Move {
                                    prior_key,
                                    prior_snapshot,
                                    next_key,
                                    next_snapshot,
                                    fresh,
                                    member_props,
                                })
                            }
                        };
                        let Some(mv) = moved else { return };
                        dispatch.emit_removed(
                            child_id,
                            &keys.child(mv.prior_key.clone()),
                            key,
                            &mv.member_props,
                        );
                        if let Some(snapshot) = mv.prior_snapshot {
                            dispatch.emit_removed(scope_id, keys, &mv.prior_key, &snapshot);
                        }
                        if mv.fresh {
                            dispatch.emit_added(scope_id, keys, &mv.next_key, &mv.next_snapshot);
                        }
                        dispatch.emit_added(
                            child_id,
                            &keys.child(mv.next_key),
                            key,
                            &mv.member_props,
                        );
                    })
                });
            } else {
                upstream.on_modified(&scope, property, {
                    let dispatch = Rc::clone(&dispatch);
                    let state = Rc::clone(&state);
                    let property = property.clone();
                    Rc::new(move |keys, key, old, new| {
                        let parent_id = keys.hash_id();
                        let group_key = {
                            let st = &mut *state.borrow_mut();
                            let Some(row) = st.rows.get_mut(&(parent_id, key.clone())) else {
                                return;
                            };
                            match new {
                                Some(value) => {
                                    row.member_props.insert(property.clone(), value.clone());
                                }
                                None => {
                                    row.member_props.remove(&property);
                                }
                            }
                            row.group_key.clone()
                        };
                        dispatch.emit_modified(
                            child_id,
                            &property,
                            &keys.child(group_key),
                            key,
                            old,
                            new,
                        );
                    })
                });
            }
        }

        Rc::new(Self {
            upstream,
            scope,
            scope_id,
            child_path,
            child_id,
            descriptor,
            dispatch,
            state,
            bridged_added: RefCell::new(HashSet::new()),
            bridged_removed: RefCell::new(HashSet::new()),
            bridged_modified: RefCell::new(HashSet::new()),
        })
    }

    /// Splices the row's current group key into an upstream key path, mapping
    /// an event below the scope into this step's output key space.
    fn rekey(state: &RefCell<GroupByState>, scope_len: usize, keys: &KeyPath) -> Option<KeyPath> {
        let (enclosing, rest) = keys.split_at(scope_len)?;
        let row_key = rest.first()?;
        let group_key = state
            .borrow()
            .rows
            .get(&(enclosing.hash_id(), row_key.clone()))
            .map(|row| row.group_key.clone());
        let Some(group_key) = group_key else {
            warn!(row = %row_key, "group-by pass-through for unknown row");
            return None;
        };
        keys.splice(scope_len, group_key)
    }

    /// The upstream path an output path below the member level maps to.
    fn upstream_path(&self, path: &SegPath) -> Option<SegPath> {
        let rest = path.strip_prefix(&self.child_path)?;
        (!rest.is_empty()).then(|| self.scope.join(rest))
    }

    fn ensure_added_bridge(&self, path: &SegPath, upstream_path: &SegPath) {
        let path_id = path.hash_id();
        if !self.bridged_added.borrow_mut().insert(path_id) {
            return;
        }
        let dispatch = Rc::clone(&self.dispatch);
        let state = Rc::clone(&self.state);
        let scope_len = self.scope.len();
        self.upstream.on_added(
            upstream_path,
            Rc::new(move |keys, key, props| {
                if let Some(rekeyed) = GroupByStep::rekey(&state, scope_len, keys) {
                    dispatch.emit_added(path_id, &rekeyed, key, props);
                }
            }),
        );
    }

    fn ensure_removed_bridge(&self, path: &SegPath, upstream_path: &SegPath) {
        let path_id = path.hash_id();
        if !self.bridged_removed.borrow_mut().insert(path_id) {
            return;
        }
        let dispatch = Rc::clone(&self.dispatch);
        let state = Rc::clone(&self.state);
        let scope_len = self.scope.len();
        self.upstream.on_removed(
            upstream_path,
            Rc::new(move |keys, key, props| {
                if let Some(rekeyed) = GroupByStep::rekey(&state, scope_len, keys) {
                    dispatch.emit_removed(path_id, &rekeyed, key, props);
                }
            }),
        );
    }

    fn ensure_modified_bridge(&self, path: &SegPath, upstream_path: &SegPath, property: &str) {
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
            upstream_path,
            &channel,
            Rc::new(move |keys, key, old, new| {
                if let Some(rekeyed) = GroupByStep::rekey(&state, scope_len, keys) {
                    dispatch.emit_modified(path_id, &property, &rekeyed, key, old, new);
                }
            }),
        );
    }
}

struct Move {
    prior_key: ItemKey,
    prior_snapshot: Option<Props>,
    next_key: ItemKey,
    next_snapshot: Props,
    fresh: bool,
    member_props: Props,
}

impl Step for GroupByStep {
    fn on_added(&self, path: &SegPath, handler: AddedHandler) {
        if *path == self.scope || *path == self.child_path {
            self.dispatch.register_added(path.hash_id(), handler);
        } else if let Some(upstream_path) = self.upstream_path(path) {
            self.ensure_added_bridge(path, &upstream_path);
            self.dispatch.register_added(path.hash_id(), handler);
        } else {
            self.upstream.on_added(path, handler);
        }
    }

    fn on_removed(&self, path: &SegPath, handler: RemovedHandler) {
        if *path == self.scope || *path == self.child_path {
            self.dispatch.register_removed(path.hash_id(), handler);
        } else if let Some(upstream_path) = self.upstream_path(path) {
            self.ensure_removed_bridge(path, &upstream_path);
            self.dispatch.register_removed(path.hash_id(), handler);
        } else {
            self.upstream.on_removed(path, handler);
        }
    }

    fn on_modified(&self, path: &SegPath, property: &str, handler: ModifiedHandler) {
        if *path == self.scope || *path == self.child_path {
            // Scope channels never fire (shell props are immutable); member
            // channels are fed by the construction-time subscriptions.
            self.dispatch
                .register_modified(path.hash_id(), property, handler);
        } else if let Some(upstream_path) = self.upstream_path(path) {
            self.ensure_modified_bridge(path, &upstream_path, property);
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

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::{json, Value};

    use crate::step::InputStep;

    use super::*;

    fn props(value: Value) -> Props {
        Props::from_value(&value).unwrap_or_default()
    }

    fn collect_events(step: &Rc<GroupByStep>) -> Rc<RefCell<Vec<String>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        for path in [SegPath::root(), SegPath::new(["cities"])] {
            let tag = path.to_string();
            {
                let events = Rc::clone(&events);
                let tag = tag.clone();
                step.on_added(
                    &path,
                    Rc::new(move |keys, key, props| {
                        events.borrow_mut().push(format!(
                            "added {tag} depth={} key={} props={}",
                            keys.len(),
                            &key.as_str()[..4.min(key.as_str().len())],
                            props.to_value()
                        ));
                    }),
                );
            }
            {
                let events = Rc::clone(&events);
                step.on_removed(
                    &path,
                    Rc::new(move |_, key, _| {
                        events.borrow_mut().push(format!(
                            "removed {tag} key={}",
                            &key.as_str()[..4.min(key.as_str().len())]
                        ));
                    }),
                );
            }
        }
        events
    }

    #[test]
    fn first_member_creates_the_group_shell() {
        let input = InputStep::new();
        let step = GroupByStep::new(
            input.clone(),
            SegPath::root(),
            vec!["state".to_string()],
            "cities",
        );
        let events = collect_events(&step);

        input.add(&"c1".into(), &props(json!({"state": "TX", "city": "Dallas"})));
        input.add(&"c2".into(), &props(json!({"state": "TX", "city": "Houston"})));

        let log = events.borrow();
        assert_eq!(log.len(), 3, "shell + two members: {log:?}");
        assert!(log[0].starts_with("added / "));
        assert!(log[0].contains(r#"{"state":"TX"}"#));
        assert!(log[1].contains(r#"{"city":"Dallas"}"#));
        assert!(log[2].contains(r#"{"city":"Houston"}"#));
    }

    #[test]
    fn last_member_removes_the_group_shell() {
        let input = InputStep::new();
        let step = GroupByStep::new(
            input.clone(),
            SegPath::root(),
            vec!["state".to_string()],
            "cities",
        );
        let events = collect_events(&step);

        let dallas = props(json!({"state": "TX", "city": "Dallas"}));
        input.add(&"c1".into(), &dallas);
        input.remove(&"c1".into(), &dallas);

        let log = events.borrow();
        assert_eq!(log.len(), 4);
        assert!(log[2].starts_with("removed /cities"), "{log:?}");
        assert!(log[3].starts_with("removed / "), "{log:?}");
    }

    #[test]
    fn distinct_grouping_values_make_distinct_groups() {
        let input = InputStep::new();
        let step = GroupByStep::new(
            input.clone(),
            SegPath::root(),
            vec!["state".to_string()],
            "cities",
        );
        let events = collect_events(&step);

        input.add(&"c1".into(), &props(json!({"state": "TX", "city": "Dallas"})));
        input.add(&"c2".into(), &props(json!({"state": "CA", "city": "Fresno"})));

        let log = events.borrow();
        // Two shells, two members.
        assert_eq!(log.iter().filter(|e| e.starts_with("added / ")).count(), 2);
        assert_eq!(
            log.iter().filter(|e| e.starts_with("added /cities")).count(),
            2
        );
    }

    #[test]
    fn mutable_grouping_moves_the_row_in_spec_order() {
        use crate::step::testing::StubStep;

        let mut descriptor = TypeDescriptor::leaf();
        descriptor.add_mutable("bucket");
        let source = StubStep::new(descriptor);
        let step = GroupByStep::new(
            source.clone(),
            SegPath::root(),
            vec!["bucket".to_string()],
            "items",
        );
        let log = Rc::new(RefCell::new(Vec::new()));
        for path in [SegPath::root(), SegPath::new(["items"])] {
            let tag = if path.is_root() { "group" } else { "item" };
            {
                let log = Rc::clone(&log);
                step.on_added(
                    &path,
                    Rc::new(move |_, _, props| {
                        log.borrow_mut().push(format!("+{tag} {}", props.to_value()));
                    }),
                );
            }
            {
                let log = Rc::clone(&log);
                step.on_removed(
                    &path,
                    Rc::new(move |_, _, props| {
                        log.borrow_mut().push(format!("-{tag} {}", props.to_value()));
                    }),
                );
            }
        }

        let root = SegPath::root();
        let keys = grove_tree::KeyPath::root();
        source.added(&root, &keys, "r1", &props(json!({"bucket": "low", "n": 1})));
        source.modified(
            &root,
            "bucket",
            &keys,
            "r1",
            Some(&json!("low")),
            Some(&json!("med")),
        );

        assert_eq!(
            *log.borrow(),
            [
                "+group {\"bucket\":\"low\"}".to_string(),
                "+item {\"n\":1}".to_string(),
                "-item {\"n\":1}".to_string(),
                "-group {\"bucket\":\"low\"}".to_string(),
                "+group {\"bucket\":\"med\"}".to_string(),
                "+item {\"n\":1}".to_string(),
            ]
        );
    }

    #[test]
    fn unchanged_group_key_is_a_silent_regroup() {
        use crate::step::testing::StubStep;

        let mut descriptor = TypeDescriptor::leaf();
        descriptor.add_mutable("bucket");
        let source = StubStep::new(descriptor);
        let step = GroupByStep::new(
            source.clone(),
            SegPath::root(),
            vec!["bucket".to_string()],
            "items",
        );
        let hits = Rc::new(RefCell::new(0));
        {
            let hits = Rc::clone(&hits);
            step.on_removed(
                &SegPath::new(["items"]),
                Rc::new(move |_, _, _| *hits.borrow_mut() += 1),
            );
        }
        let root = SegPath::root();
        let keys = grove_tree::KeyPath::root();
        source.added(&root, &keys, "r1", &props(json!({"bucket": "low"})));
        source.modified(
            &root,
            "bucket",
            &keys,
            "r1",
            Some(&json!("low")),
            Some(&json!("low")),
        );
        assert_eq!(*hits.borrow(), 0);
    }

    #[test]
    fn deep_subscriptions_are_rekeyed_through_the_group() {
        use crate::step::testing::StubStep;

        let source = StubStep::new(TypeDescriptor::leaf());
        let step = GroupByStep::new(
            source.clone(),
            SegPath::root(),
            vec!["g".to_string()],
            "items",
        );
        let shell_key = Rc::new(RefCell::new(None));
        {
            let shell_key = Rc::clone(&shell_key);
            step.on_added(
                &SegPath::root(),
                Rc::new(move |_, key, _| {
                    *shell_key.borrow_mut() = Some(key.clone());
                }),
            );
        }
        let deep_keys = Rc::new(RefCell::new(None));
        {
            let deep_keys = Rc::clone(&deep_keys);
            step.on_added(
                &SegPath::new(["items", "subs"]),
                Rc::new(move |keys, key, _| {
                    *deep_keys.borrow_mut() = Some((keys.clone(), key.clone()));
                }),
            );
        }

        source.added(
            &SegPath::root(),
            &grove_tree::KeyPath::root(),
            "r1",
            &props(json!({"g": "G", "x": 1})),
        );
        source.added(
            &SegPath::new(["subs"]),
            &grove_tree::KeyPath::new(["r1"]),
            "s1",
            &props(json!({"v": 2})),
        );

        let shell_key = shell_key.borrow().clone().unwrap();
        let (keys, key) = deep_keys.borrow().clone().unwrap();
        assert_eq!(key, ItemKey::from("s1"));
        assert_eq!(keys, KeyPath::new([shell_key.as_str(), "r1"]));
    }

    #[test]
    fn descriptor_moves_remaining_properties_into_the_member_type() {
        let input = InputStep::new();
        let step = GroupByStep::new(
            input.clone(),
            SegPath::root(),
            vec!["state".to_string()],
            "cities",
        );
        let descriptor = step.type_descriptor();
        assert!(descriptor.mutable_properties().is_empty());
        assert!(descriptor.array("cities").is_some());
        assert_eq!(descriptor.arrays().len(), 1);
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Drop-property: remove a property from a scope level's payloads.
//!
//! Stateless projection: `added`/`removed` at the scope re-emit without the
//! named property, and `modified` subscriptions for it are absorbed (the
//! channel goes quiet downstream). Everything else passes through untouched.
use std::rc::Rc;

use grove_tree::{PathHash, SegPath};

use crate::descriptor::TypeDescriptor;
use crate::event::{AddedHandler, Dispatcher, ModifiedHandler, RemovedHandler};
use crate::step::Step;

/// Removes one property from rows at a scope level.
pub struct DropPropertyStep {
    upstream: Rc<dyn Step>,
    scope: SegPath,
    scope_id: PathHash,
    property: String,
    descriptor: TypeDescriptor,
    dispatch: Rc<Dispatcher>,
}

impl DropPropertyStep {
    /// Builds a drop-property over `upstream` at `scope`.
    pub fn new(upstream: Rc<dyn Step>, scope: SegPath, property: &str) -> Rc<Self> {
        let mut descriptor = upstream.type_descriptor();
        if let Some(level) = descriptor.at_path_mut(&scope) {
            level.remove_mutable(property);
        }

        let dispatch = Rc::new(Dispatcher::new());
        let scope_id = scope.hash_id();
        let dropped = vec![property.to_string()];

        upstream.on_added(&scope, {
            let dispatch = Rc::clone(&dispatch);
            let dropped = dropped.clone();
            Rc::new(move |keys, key, props| {
                dispatch.emit_added(scope_id, keys, key, &props.without(&dropped));
            })
        });

        upstream.on_removed(&scope, {
            let dispatch = Rc::clone(&dispatch);
            Rc::new(move |keys, key, props| {
                dispatch.emit_removed(scope_id, keys, key, &props.without(&dropped));
            })
        });

        Rc::new(Self {
            upstream,
            scope,
            scope_id,
            property: property.to_string(),
            descriptor,
            dispatch,
        })
    }
}

impl Step for DropPropertyStep {
    fn on_added(&self, path: &SegPath, handler: AddedHandler) {
        if *path == self.scope {
            self.dispatch.register_added(self.scope_id, handler);
        } else {
            self.upstream.on_added(path, handler);
        }
    }

    fn on_removed(&self, path: &SegPath, handler: RemovedHandler) {
        if *path == self.scope {
            self.dispatch.register_removed(self.scope_id, handler);
        } else {
            self.upstream.on_removed(path, handler);
        }
    }

    fn on_modified(&self, path: &SegPath, property: &str, handler: ModifiedHandler) {
        if *path == self.scope && property == self.property {
            // Absorbed: the property no longer exists downstream.
            return;
        }
        self.upstream.on_modified(path, property, handler);
    }

    fn type_descriptor(&self) -> TypeDescriptor {
        self.descriptor.clone()
    }
}

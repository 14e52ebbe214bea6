// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Event handler types and the per-step dispatcher.
//!
//! A step registers with its upstream once per segment path (at construction
//! or lazily on first downstream subscription) and multiplexes downstream
//! handlers through its own [`Dispatcher`]. Emission is synchronous: handlers
//! run inline, in registration order, before `emit_*` returns. Steps mutate
//! their own state *before* emitting, so a downstream failure cannot corrupt
//! the emitting step.
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use grove_tree::{ItemKey, KeyPath, PathHash, Props};
use serde_json::Value;

/// Handler for row-appeared events: `(key path, row key, row props)`.
pub type AddedHandler = Rc<dyn Fn(&KeyPath, &ItemKey, &Props)>;

/// Handler for row-disappeared events: `(key path, row key, row props)`.
pub type RemovedHandler = Rc<dyn Fn(&KeyPath, &ItemKey, &Props)>;

/// Handler for property-changed events:
/// `(key path, row key, old value, new value)`.
///
/// `None` encodes the *absent* state — an aggregate over an empty parent, or
/// a property that has never been set. The binder maps absent to property
/// deletion when materializing.
pub type ModifiedHandler = Rc<dyn Fn(&KeyPath, &ItemKey, Option<&Value>, Option<&Value>)>;

/// Path-keyed handler lists for one step's own output channels.
#[derive(Default)]
pub(crate) struct Dispatcher {
    added: RefCell<HashMap<PathHash, Vec<AddedHandler>>>,
    removed: RefCell<HashMap<PathHash, Vec<RemovedHandler>>>,
    modified: RefCell<HashMap<PathHash, HashMap<String, Vec<ModifiedHandler>>>>,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register_added(&self, path: PathHash, handler: AddedHandler) {
        self.added.borrow_mut().entry(path).or_default().push(handler);
    }

    pub(crate) fn register_removed(&self, path: PathHash, handler: RemovedHandler) {
        self.removed
            .borrow_mut()
            .entry(path)
            .or_default()
            .push(handler);
    }

    pub(crate) fn register_modified(&self, path: PathHash, property: &str, handler: ModifiedHandler) {
        self.modified
            .borrow_mut()
            .entry(path)
            .or_default()
            .entry(property.to_string())
            .or_default()
            .push(handler);
    }

    pub(crate) fn emit_added(&self, path: PathHash, keys: &KeyPath, key: &ItemKey, props: &Props) {
        // Clone the handler list out of the borrow: a handler may cascade
        // back into this dispatcher on another channel.
        let handlers: Vec<AddedHandler> = match self.added.borrow().get(&path) {
            Some(handlers) => handlers.clone(),
            None => return,
        };
        for handler in handlers {
            handler(keys, key, props);
        }
    }

    pub(crate) fn emit_removed(&self, path: PathHash, keys: &KeyPath, key: &ItemKey, props: &Props) {
        let handlers: Vec<RemovedHandler> = match self.removed.borrow().get(&path) {
            Some(handlers) => handlers.clone(),
            None => return,
        };
        for handler in handlers {
            handler(keys, key, props);
        }
    }

    pub(crate) fn emit_modified(
        &self,
        path: PathHash,
        property: &str,
        keys: &KeyPath,
        key: &ItemKey,
        old: Option<&Value>,
        new: Option<&Value>,
    ) {
        let handlers: Vec<ModifiedHandler> = match self
            .modified
            .borrow()
            .get(&path)
            .and_then(|channels| channels.get(property))
        {
            Some(handlers) => handlers.clone(),
            None => return,
        };
        for handler in handlers {
            handler(keys, key, old, new);
        }
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The step contract and the root input step.
use std::rc::Rc;

use grove_tree::{ItemKey, KeyPath, PathHash, Props, SegPath};

use crate::descriptor::TypeDescriptor;
use crate::event::{AddedHandler, Dispatcher, ModifiedHandler, RemovedHandler};

/// A node in the step graph.
///
/// Every step subscribes to exactly one upstream step and publishes to any
/// number of downstream subscribers through the three registration
/// operations. Registration requests for `(path, property)` channels a step
/// does not itself intercept are forwarded to its upstream untouched, so a
/// sink can subscribe at levels above (or unrelated to) the step's scope.
pub trait Step {
    /// Registers for row-appeared events at `path`.
    fn on_added(&self, path: &SegPath, handler: AddedHandler);

    /// Registers for row-disappeared events at `path`.
    fn on_removed(&self, path: &SegPath, handler: RemovedHandler);

    /// Registers for changes of `property` on rows at `path`.
    fn on_modified(&self, path: &SegPath, property: &str, handler: ModifiedHandler);

    /// The shape of this step's output. Pure: identical trees across calls.
    fn type_descriptor(&self) -> TypeDescriptor;
}

/// The root of every pipeline: re-emits caller-injected records as `added` /
/// `removed` events at the root segment path.
///
/// The input step emits exactly one `added` per [`add`](Self::add) and one
/// `removed` per [`remove`](Self::remove); it never emits `modified` (input
/// records are immutable — changes to derived values arrive from steps
/// downstream).
pub struct InputStep {
    dispatch: Dispatcher,
    root_id: PathHash,
}

impl InputStep {
    /// Creates the input step.
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            dispatch: Dispatcher::new(),
            root_id: SegPath::root().hash_id(),
        })
    }

    /// Injects a record at the root level.
    pub fn add(&self, key: &ItemKey, props: &Props) {
        self.dispatch
            .emit_added(self.root_id, &KeyPath::root(), key, props);
    }

    /// Retracts a record. `props` must structurally match the props
    /// originally added — aggregates read values from the removed payload.
    pub fn remove(&self, key: &ItemKey, props: &Props) {
        self.dispatch
            .emit_removed(self.root_id, &KeyPath::root(), key, props);
    }
}

impl Step for InputStep {
    fn on_added(&self, path: &SegPath, handler: AddedHandler) {
        self.dispatch.register_added(path.hash_id(), handler);
    }

    fn on_removed(&self, path: &SegPath, handler: RemovedHandler) {
        self.dispatch.register_removed(path.hash_id(), handler);
    }

    fn on_modified(&self, path: &SegPath, property: &str, handler: ModifiedHandler) {
        // Never emitted for input records; the channel stays quiet.
        self.dispatch
            .register_modified(path.hash_id(), property, handler);
    }

    fn type_descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::leaf()
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fluent pipeline construction and the public entry points.
//!
//! [`PipelineBuilder`] accumulates step configurations, validates each
//! against the descriptor synthesized so far, and materializes the chain:
//! input step, declared steps in order, then the output binder and batched
//! updater. [`Pipeline`] is the handle the caller keeps: `add`, `remove`,
//! `force_flush`, `dispose`.
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use grove_tree::{ItemKey, Props, SegPath, TreeError};
use serde_json::Value;
use thiserror::Error;

use crate::aggregate::{
    AggregateStep, CommutativeOp, CountOp, Extremum, SumOp,
};
use crate::binder::bind_output;
use crate::descriptor::TypeDescriptor;
use crate::step::{InputStep, Step};
use crate::steps::{DefinePropertyStep, DropPropertyStep, FilterStep, GroupByStep};
use crate::updater::{
    register_updater, unregister_updater, BatchConfig, BatchUpdater, Clock, MonotonicClock,
    SharedTree, StateSink,
};

/// Errors raised while building or driving a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A transform hit a step-graph contract violation (see
    /// [`TreeError`]).
    #[error(transparent)]
    Tree(#[from] TreeError),
    /// A step named a segment path the upstream descriptor does not expose.
    #[error("unknown segment path: {path}")]
    UnknownPath {
        /// The unresolved path.
        path: SegPath,
    },
    /// An aggregate targeted the root level (aggregates fold a nested array
    /// into its parent).
    #[error("aggregate target must be a nested array, not the root")]
    AggregateAtRoot,
    /// A group-by introduced no new grouping properties.
    #[error("group-by needs at least one new grouping property")]
    EmptyGrouping,
    /// The handle was used after [`Pipeline::dispose`].
    #[error("pipeline already disposed")]
    Disposed,
}

enum StepSpec {
    GroupBy {
        scope: SegPath,
        grouping: Vec<String>,
        array_name: String,
    },
    Define {
        scope: SegPath,
        property: String,
        dependencies: Vec<String>,
        compute: Rc<dyn Fn(&Props) -> Value>,
    },
    Drop {
        scope: SegPath,
        property: String,
    },
    Filter {
        scope: SegPath,
        dependencies: Vec<String>,
        predicate: Rc<dyn Fn(&Props) -> bool>,
    },
    Commutative {
        array: SegPath,
        property: String,
        op: Rc<dyn CommutativeOp>,
        value_property: Option<String>,
    },
    MinMax {
        array: SegPath,
        value_property: String,
        property: String,
        extremum: Extremum,
    },
    Average {
        array: SegPath,
        value_property: String,
        property: String,
    },
    Pick {
        array: SegPath,
        comparison: String,
        property: String,
        extremum: Extremum,
    },
}

/// Declarative pipeline construction.
///
/// `group_by` uses cumulative key semantics: each call names the *full* set
/// of grouping keys so far, and the builder derives the scope (the innermost
/// grouped level) and the new keys from the difference — `group_by(["state"])`
/// then `group_by(["state", "city"])` nests cities under states. Explicit
/// `*_at` variants take the scope directly.
#[derive(Default)]
pub struct PipelineBuilder {
    steps: Vec<StepSpec>,
    group_chain: Vec<GroupLevel>,
}

struct GroupLevel {
    introduced: Vec<String>,
    array_path: SegPath,
}

impl PipelineBuilder {
    /// Starts an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Groups by the cumulative key set `keys` into `array_name` (see the
    /// type-level docs for the cumulative convention).
    #[must_use]
    pub fn group_by(self, keys: &[&str], array_name: &str) -> Self {
        let known: Vec<&str> = self
            .group_chain
            .iter()
            .flat_map(|level| level.introduced.iter().map(String::as_str))
            .collect();
        let grouping: Vec<String> = keys
            .iter()
            .filter(|key| !known.contains(*key))
            .map(|key| (*key).to_string())
            .collect();
        let scope = self
            .group_chain
            .last()
            .map(|level| level.array_path.clone())
            .unwrap_or_else(SegPath::root);
        self.push_group(scope, grouping, array_name)
    }

    /// Groups the rows at `scope` by `keys` into `array_name`.
    #[must_use]
    pub fn group_by_at(self, scope: &[&str], keys: &[&str], array_name: &str) -> Self {
        let scope = SegPath::new(scope.iter().copied());
        let grouping = keys.iter().map(|key| (*key).to_string()).collect();
        self.push_group(scope, grouping, array_name)
    }

    fn push_group(mut self, scope: SegPath, grouping: Vec<String>, array_name: &str) -> Self {
        let array_path = scope.child(array_name);
        self.group_chain.push(GroupLevel {
            introduced: grouping.clone(),
            array_path,
        });
        self.steps.push(StepSpec::GroupBy {
            scope,
            grouping,
            array_name: array_name.to_string(),
        });
        self
    }

    /// Synthesizes `property` at the root level.
    #[must_use]
    pub fn define_property(
        self,
        property: &str,
        dependencies: &[&str],
        compute: impl Fn(&Props) -> Value + 'static,
    ) -> Self {
        self.define_property_at(&[], property, dependencies, compute)
    }

    /// Synthesizes `property` at `scope`.
    #[must_use]
    pub fn define_property_at(
        mut self,
        scope: &[&str],
        property: &str,
        dependencies: &[&str],
        compute: impl Fn(&Props) -> Value + 'static,
    ) -> Self {
        self.steps.push(StepSpec::Define {
            scope: SegPath::new(scope.iter().copied()),
            property: property.to_string(),
            dependencies: dependencies.iter().map(|dep| (*dep).to_string()).collect(),
            compute: Rc::new(compute),
        });
        self
    }

    /// Removes `property` from payloads at the root level.
    #[must_use]
    pub fn drop_property(self, property: &str) -> Self {
        self.drop_property_at(&[], property)
    }

    /// Removes `property` from payloads at `scope`.
    #[must_use]
    pub fn drop_property_at(mut self, scope: &[&str], property: &str) -> Self {
        self.steps.push(StepSpec::Drop {
            scope: SegPath::new(scope.iter().copied()),
            property: property.to_string(),
        });
        self
    }

    /// Gates root-level rows behind `predicate`.
    #[must_use]
    pub fn filter(
        self,
        dependencies: &[&str],
        predicate: impl Fn(&Props) -> bool + 'static,
    ) -> Self {
        self.filter_at(&[], dependencies, predicate)
    }

    /// Gates the rows at `scope` behind `predicate`.
    #[must_use]
    pub fn filter_at(
        mut self,
        scope: &[&str],
        dependencies: &[&str],
        predicate: impl Fn(&Props) -> bool + 'static,
    ) -> Self {
        self.steps.push(StepSpec::Filter {
            scope: SegPath::new(scope.iter().copied()),
            dependencies: dependencies.iter().map(|dep| (*dep).to_string()).collect(),
            predicate: Rc::new(predicate),
        });
        self
    }

    /// Sums `value_property` across the rows of `array` into `property` at
    /// the parent level.
    #[must_use]
    pub fn sum(mut self, array: &[&str], value_property: &str, property: &str) -> Self {
        self.steps.push(StepSpec::Commutative {
            array: SegPath::new(array.iter().copied()),
            property: property.to_string(),
            op: Rc::new(SumOp::new(value_property)),
            value_property: Some(value_property.to_string()),
        });
        self
    }

    /// Counts the rows of `array` into `property` at the parent level.
    #[must_use]
    pub fn count(mut self, array: &[&str], property: &str) -> Self {
        self.steps.push(StepSpec::Commutative {
            array: SegPath::new(array.iter().copied()),
            property: property.to_string(),
            op: Rc::new(CountOp),
            value_property: None,
        });
        self
    }

    /// Folds a caller-supplied abelian operation across the rows of `array`.
    #[must_use]
    pub fn aggregate(
        mut self,
        array: &[&str],
        property: &str,
        op: Rc<dyn CommutativeOp>,
        value_property: Option<&str>,
    ) -> Self {
        self.steps.push(StepSpec::Commutative {
            array: SegPath::new(array.iter().copied()),
            property: property.to_string(),
            op,
            value_property: value_property.map(str::to_string),
        });
        self
    }

    /// Minimum of `value_property` across the rows of `array`.
    #[must_use]
    pub fn min(self, array: &[&str], value_property: &str, property: &str) -> Self {
        self.extremum(array, value_property, property, Extremum::Min)
    }

    /// Maximum of `value_property` across the rows of `array`.
    #[must_use]
    pub fn max(self, array: &[&str], value_property: &str, property: &str) -> Self {
        self.extremum(array, value_property, property, Extremum::Max)
    }

    fn extremum(
        mut self,
        array: &[&str],
        value_property: &str,
        property: &str,
        extremum: Extremum,
    ) -> Self {
        self.steps.push(StepSpec::MinMax {
            array: SegPath::new(array.iter().copied()),
            value_property: value_property.to_string(),
            property: property.to_string(),
            extremum,
        });
        self
    }

    /// Average of `value_property` across the rows of `array`.
    #[must_use]
    pub fn average(mut self, array: &[&str], value_property: &str, property: &str) -> Self {
        self.steps.push(StepSpec::Average {
            array: SegPath::new(array.iter().copied()),
            value_property: value_property.to_string(),
            property: property.to_string(),
        });
        self
    }

    /// Publishes the row of `array` with the smallest `comparison` value as
    /// the object property `property`.
    #[must_use]
    pub fn pick_by_min(self, array: &[&str], comparison: &str, property: &str) -> Self {
        self.pick(array, comparison, property, Extremum::Min)
    }

    /// Publishes the row of `array` with the largest `comparison` value as
    /// the object property `property`.
    #[must_use]
    pub fn pick_by_max(self, array: &[&str], comparison: &str, property: &str) -> Self {
        self.pick(array, comparison, property, Extremum::Max)
    }

    fn pick(
        mut self,
        array: &[&str],
        comparison: &str,
        property: &str,
        extremum: Extremum,
    ) -> Self {
        self.steps.push(StepSpec::Pick {
            array: SegPath::new(array.iter().copied()),
            comparison: comparison.to_string(),
            property: property.to_string(),
            extremum,
        });
        self
    }

    /// Builds the pipeline against an in-process [`SharedTree`] sink with
    /// default batching.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure (unknown path, empty grouping,
    /// aggregate at root).
    pub fn build(self) -> Result<(Pipeline, Rc<SharedTree>), PipelineError> {
        let tree = Rc::new(SharedTree::new());
        let pipeline = self.build_with_sink(
            tree.clone(),
            BatchConfig::default(),
            Rc::new(MonotonicClock),
        )?;
        Ok((pipeline, tree))
    }

    /// Builds the pipeline against an arbitrary sink, batching config, and
    /// clock.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure (unknown path, empty grouping,
    /// aggregate at root).
    pub fn build_with_sink(
        self,
        sink: Rc<dyn StateSink>,
        config: BatchConfig,
        clock: Rc<dyn Clock>,
    ) -> Result<Pipeline, PipelineError> {
        let input = InputStep::new();
        let mut last: Rc<dyn Step> = input.clone();

        for spec in self.steps {
            let descriptor = last.type_descriptor();
            last = match spec {
                StepSpec::GroupBy {
                    scope,
                    grouping,
                    array_name,
                } => {
                    require_path(&descriptor, &scope)?;
                    if grouping.is_empty() {
                        return Err(PipelineError::EmptyGrouping);
                    }
                    GroupByStep::new(last, scope, grouping, &array_name)
                }
                StepSpec::Define {
                    scope,
                    property,
                    dependencies,
                    compute,
                } => {
                    require_path(&descriptor, &scope)?;
                    DefinePropertyStep::new(last, scope, &property, dependencies, compute)
                }
                StepSpec::Drop { scope, property } => {
                    require_path(&descriptor, &scope)?;
                    DropPropertyStep::new(last, scope, &property)
                }
                StepSpec::Filter {
                    scope,
                    dependencies,
                    predicate,
                } => {
                    require_path(&descriptor, &scope)?;
                    FilterStep::new(last, scope, dependencies, predicate)
                }
                StepSpec::Commutative {
                    array,
                    property,
                    op,
                    value_property,
                } => {
                    require_aggregate_target(&descriptor, &array)?;
                    AggregateStep::commutative(
                        last,
                        array,
                        &property,
                        op,
                        value_property.as_deref(),
                    )
                }
                StepSpec::MinMax {
                    array,
                    value_property,
                    property,
                    extremum,
                } => {
                    require_aggregate_target(&descriptor, &array)?;
                    AggregateStep::min_max(last, array, &value_property, &property, extremum)
                }
                StepSpec::Average {
                    array,
                    value_property,
                    property,
                } => {
                    require_aggregate_target(&descriptor, &array)?;
                    AggregateStep::average(last, array, &value_property, &property)
                }
                StepSpec::Pick {
                    array,
                    comparison,
                    property,
                    extremum,
                } => {
                    require_aggregate_target(&descriptor, &array)?;
                    AggregateStep::pick(last, array, &comparison, &property, extremum)
                }
            };
        }

        let updater = Rc::new(RefCell::new(BatchUpdater::new(sink, config, clock)));
        bind_output(&last, &updater);
        let registry_id = register_updater(&updater);

        Ok(Pipeline {
            input,
            last,
            updater,
            registry_id,
            disposed: Cell::new(false),
        })
    }
}

fn require_path(descriptor: &TypeDescriptor, path: &SegPath) -> Result<(), PipelineError> {
    descriptor
        .at_path(path)
        .map(|_| ())
        .ok_or_else(|| PipelineError::UnknownPath { path: path.clone() })
}

fn require_aggregate_target(
    descriptor: &TypeDescriptor,
    array: &SegPath,
) -> Result<(), PipelineError> {
    if array.is_root() {
        return Err(PipelineError::AggregateAtRoot);
    }
    require_path(descriptor, array)
}

/// A built pipeline: the caller's handle for feeding records and draining
/// output.
pub struct Pipeline {
    input: Rc<InputStep>,
    last: Rc<dyn Step>,
    updater: Rc<RefCell<BatchUpdater>>,
    registry_id: u64,
    disposed: Cell<bool>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("registry_id", &self.registry_id)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Injects a record at the root level. All resulting step events fire
    /// before this returns; resulting tree operations wait in the batch.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Disposed`] after disposal, or a deferred contract
    /// violation surfaced from an intervening flush.
    pub fn add(&self, key: impl Into<ItemKey>, props: &Props) -> Result<(), PipelineError> {
        self.ensure_live()?;
        self.input.add(&key.into(), props);
        self.updater.borrow_mut().poll().map_err(Into::into)
    }

    /// Retracts a record added earlier. `props` must structurally match the
    /// added props.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Disposed`] after disposal, or a deferred contract
    /// violation surfaced from an intervening flush.
    pub fn remove(&self, key: impl Into<ItemKey>, props: &Props) -> Result<(), PipelineError> {
        self.ensure_live()?;
        self.input.remove(&key.into(), props);
        self.updater.borrow_mut().poll().map_err(Into::into)
    }

    /// Drains pending tree operations into the sink.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Disposed`] after disposal, or the first contract
    /// violation hit while applying.
    pub fn force_flush(&self) -> Result<(), PipelineError> {
        self.ensure_live()?;
        self.updater.borrow_mut().force_flush().map_err(Into::into)
    }

    /// The final output descriptor.
    #[must_use]
    pub fn type_descriptor(&self) -> TypeDescriptor {
        self.last.type_descriptor()
    }

    /// Cancels the updater (pending operations are dropped, the deadline is
    /// disarmed) and releases the registry entry. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        self.updater.borrow_mut().cancel();
        unregister_updater(self.registry_id);
    }

    fn ensure_live(&self) -> Result<(), PipelineError> {
        if self.disposed.get() {
            return Err(PipelineError::Disposed);
        }
        Ok(())
    }
}

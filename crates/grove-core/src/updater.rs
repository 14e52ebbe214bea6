// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Batched state updater: order-preserving FIFO between the binder and the
//! outer state container.
//!
//! Operations flush as one `set_state` call when the queue reaches
//! [`BatchConfig::max_ops`] or when the time slice armed at the most recent
//! enqueue has elapsed (observed at the next enqueue or [`poll`]). A flush
//! applies every queued operation in enqueue order — grouping adds before
//! removes would break compound deltas (§ the binder's ordering note).
//!
//! Time is read through [`Clock`] so tests drive the slice deterministically;
//! no thread or timer callback is involved, matching the engine's
//! single-threaded model.
//!
//! [`poll`]: BatchUpdater::poll
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use grove_tree::{apply_ops, KeyedArray, TreeError, TreeOp};
use serde_json::Value;
use tracing::{debug, warn};

/// Flush tuning for the batched updater.
#[derive(Clone, Copy, Debug)]
pub struct BatchConfig {
    /// Queue length that forces an immediate flush.
    pub max_ops: usize,
    /// Quiet period after the most recent enqueue before a flush is due.
    pub time_slice: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_ops: 256,
            time_slice: Duration::from_millis(20),
        }
    }
}

/// Monotonic time source for the updater's deadline.
pub trait Clock {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// The real clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A hand-driven clock for deterministic tests.
pub struct ManualClock {
    origin: Instant,
    offset: Cell<Duration>,
}

impl ManualClock {
    /// Creates a clock pinned at an arbitrary origin.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Cell::new(Duration::ZERO),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        self.offset.set(self.offset.get() + by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.offset.get()
    }
}

/// The outer state container's single hook: apply a pure transform to the
/// materialized tree.
pub trait StateSink {
    /// Replaces the current tree with `transform(current)`.
    ///
    /// # Errors
    ///
    /// Propagates the transform's contract-violation error; on error the
    /// prior tree must be retained.
    fn set_state(
        &self,
        transform: &mut dyn FnMut(KeyedArray) -> Result<KeyedArray, TreeError>,
    ) -> Result<(), TreeError>;
}

/// In-process reference sink: the materialized tree behind a `RefCell`.
#[derive(Debug, Default)]
pub struct SharedTree {
    tree: RefCell<KeyedArray>,
}

impl SharedTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A deep copy of the current tree.
    #[must_use]
    pub fn snapshot(&self) -> KeyedArray {
        self.tree.borrow().clone()
    }

    /// The current tree rendered as JSON.
    #[must_use]
    pub fn render(&self) -> Value {
        self.tree.borrow().to_value()
    }
}

impl StateSink for SharedTree {
    fn set_state(
        &self,
        transform: &mut dyn FnMut(KeyedArray) -> Result<KeyedArray, TreeError>,
    ) -> Result<(), TreeError> {
        // The transform consumes its input, so feed it a copy; the prior
        // tree survives a failed batch.
        let next = transform(self.tree.borrow().clone())?;
        *self.tree.borrow_mut() = next;
        Ok(())
    }
}

/// Order-preserving operation queue in front of a [`StateSink`].
pub struct BatchUpdater {
    queue: Vec<TreeOp>,
    deadline: Option<Instant>,
    config: BatchConfig,
    clock: Rc<dyn Clock>,
    sink: Rc<dyn StateSink>,
    cancelled: bool,
    error: Option<TreeError>,
}

impl BatchUpdater {
    /// Creates an updater in front of `sink`.
    pub fn new(sink: Rc<dyn StateSink>, config: BatchConfig, clock: Rc<dyn Clock>) -> Self {
        Self {
            queue: Vec::new(),
            deadline: None,
            config,
            clock,
            sink,
            cancelled: false,
            error: None,
        }
    }

    /// Appends an operation, flushing when the batch threshold is reached.
    /// Re-arms the time slice otherwise.
    pub fn enqueue(&mut self, op: TreeOp) {
        if self.cancelled {
            warn!(path = %op.path(), "operation dropped: updater cancelled");
            return;
        }
        if self.error.is_some() {
            // A poisoned batch drops follow-on work until the owner observes
            // the error.
            return;
        }
        let now = self.clock.now();
        if self.deadline.is_some_and(|deadline| now >= deadline) {
            self.flush();
        }
        self.queue.push(op);
        if self.queue.len() >= self.config.max_ops {
            self.flush();
        } else {
            self.deadline = Some(now + self.config.time_slice);
        }
    }

    /// Flushes when the armed time slice has elapsed.
    ///
    /// # Errors
    ///
    /// Surfaces any pending contract-violation error from an earlier flush.
    pub fn poll(&mut self) -> Result<(), TreeError> {
        if self
            .deadline
            .is_some_and(|deadline| self.clock.now() >= deadline)
        {
            self.flush();
        }
        self.take_error()
    }

    /// Drains the queue synchronously.
    ///
    /// # Errors
    ///
    /// Surfaces the first contract violation hit while applying.
    pub fn force_flush(&mut self) -> Result<(), TreeError> {
        self.flush();
        self.take_error()
    }

    /// Drops pending operations and refuses further work.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.queue.clear();
        self.deadline = None;
    }

    /// Number of operations waiting for the next flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Returns true once [`cancel`](Self::cancel) has run.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    fn flush(&mut self) {
        self.deadline = None;
        if self.queue.is_empty() || self.error.is_some() {
            return;
        }
        let ops = std::mem::take(&mut self.queue);
        debug!(ops = ops.len(), "flushing batched tree operations");
        if let Err(error) = self.sink.set_state(&mut |tree| apply_ops(tree, &ops)) {
            warn!(%error, "batch apply failed; batch poisoned");
            self.error = Some(error);
        }
    }

    fn take_error(&mut self) -> Result<(), TreeError> {
        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

thread_local! {
    static UPDATERS: RefCell<HashMap<u64, Weak<RefCell<BatchUpdater>>>> =
        RefCell::new(HashMap::new());
    static NEXT_UPDATER_ID: Cell<u64> = const { Cell::new(0) };
}

/// Registers a pipeline's updater; the registry holds it weakly so dropping
/// the pipeline handle reclaims the updater and its pending operations.
pub(crate) fn register_updater(updater: &Rc<RefCell<BatchUpdater>>) -> u64 {
    let id = NEXT_UPDATER_ID.with(|next| {
        let id = next.get();
        next.set(id + 1);
        id
    });
    UPDATERS.with(|updaters| {
        updaters.borrow_mut().insert(id, Rc::downgrade(updater));
    });
    id
}

/// Releases a registry entry at disposal time.
pub(crate) fn unregister_updater(id: u64) {
    UPDATERS.with(|updaters| {
        updaters.borrow_mut().remove(&id);
    });
}

/// Number of registered updaters still alive (dead weak entries are pruned).
/// Diagnostic surface for leak tests.
#[must_use]
pub fn live_updaters() -> usize {
    UPDATERS.with(|updaters| {
        let mut updaters = updaters.borrow_mut();
        updaters.retain(|_, weak| weak.strong_count() > 0);
        updaters.len()
    })
}

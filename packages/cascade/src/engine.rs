//! Cascade Engine - the tick scheduler that owns every node.
//!
//! The Engine is the only place scheduling logic runs:
//!
//! ```text
//! emit / set / run ──► pure queue ──► drain (reducers, wires) ──┐
//!        ▲                                                      │
//!        │                 dirty cells ◄────────────────────────┘
//!        │                     │
//!        │                     ▼ notify (watchers, companion signals)
//!        │                effect queue ──► drain (watchers, effect handlers)
//!        │                     │
//!        └─────────────────────┘  (until every queue is empty)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use cascade::Engine;
//!
//! let engine = Engine::builder().label("checkout").build();
//!
//! let add = engine.signal::<u32>()?;
//! let total = engine.store(0_u32)?;
//! total.on(&add, |total, n| Some(total + n))?;
//! total.watch(|t| println!("total = {t}"));
//!
//! add.emit(5); // flushes before returning: prints "total = 5"
//!
//! // Group mutations into one tick
//! engine.batch(|| {
//!     add.emit(1);
//!     add.emit(2);
//! }); // prints "total = 8" once
//! ```
//!
//! # Guarantees
//!
//! - **Pure before effects**: all reducer work queued so far is drained before
//!   any watcher or effect handler runs.
//! - **Snapshot passes**: thunks queued while a pass runs go to the next pass.
//! - **One notification per round**: a cell changed by N reducers notifies its
//!   watchers once, with the merged value.
//! - **No re-entrant flush**: mutations made during a flush only enqueue.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexSet;
use tracing::{debug, debug_span, error, trace, warn};

use crate::arena::{ArenaKey, TickArena};
use crate::effect::Effect;
use crate::error::{ReactiveError, Result};
use crate::queue::{Thunk, ThunkQueue};
use crate::signal::Signal;
use crate::store::Store;
use crate::tick::{EngineId, Phase, TickId};

// =============================================================================
// Node Traits
// =============================================================================

/// A node the engine notifies during the effects phase.
pub(crate) trait DirtyNode {
    /// Run watchers if the node changed since its last notification.
    ///
    /// Returns `true` if the node was dirty.
    fn notify_if_dirty(&self) -> bool;
}

/// A node owned by the engine and torn down with it.
pub(crate) trait OwnedNode {
    /// Release subscriptions and captured closures.
    fn teardown(&self);

    /// Short node kind for logs.
    fn kind(&self) -> &'static str;
}

// =============================================================================
// Configuration
// =============================================================================

/// Resolved engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct EngineConfig {
    /// Initial capacity of the pure queue.
    pub pure_capacity: usize,
    /// Initial capacity of the effect queue.
    pub effect_capacity: usize,
    /// Initial number of payload slots in the tick arena.
    pub arena_capacity: usize,
    /// Upper bound on scheduler passes per tick. `None` means unbounded.
    pub max_passes: Option<usize>,
    /// Name recorded on every tick span.
    pub label: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pure_capacity: 64,
            effect_capacity: 64,
            arena_capacity: 64,
            max_passes: None,
            label: None,
        }
    }
}

/// Builder for [`Engine`].
///
/// # Example
///
/// ```ignore
/// let engine = EngineBuilder::new()
///     .max_passes(1_000)
///     .label("ui")
///     .build();
/// ```
#[derive(Debug, Default, Clone)]
pub struct EngineBuilder {
    config: EngineConfig,
}

impl EngineBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Initial capacity of the pure queue.
    pub fn pure_capacity(mut self, capacity: usize) -> Self {
        self.config.pure_capacity = capacity;
        self
    }

    /// Initial capacity of the effect queue.
    pub fn effect_capacity(mut self, capacity: usize) -> Self {
        self.config.effect_capacity = capacity;
        self
    }

    /// Initial number of payload slots in the tick arena.
    pub fn arena_capacity(mut self, capacity: usize) -> Self {
        self.config.arena_capacity = capacity;
        self
    }

    /// Abandon a tick after `passes` scheduler passes.
    ///
    /// A graph with a feedback loop (a watcher that keeps changing the cell
    /// it watches) never settles; this is the backstop for such graphs.
    pub fn max_passes(mut self, passes: usize) -> Self {
        self.config.max_passes = Some(passes.max(1));
        self
    }

    /// Name shown on tick spans.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.config.label = Some(label.into());
        self
    }

    /// Build the engine.
    pub fn build(self) -> Engine {
        Engine {
            core: Rc::new(EngineCore::new(self.config)),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Counters describing what an engine has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct EngineStats {
    /// Completed ticks, aborted ones included.
    pub ticks: u64,
    /// Thunks executed across both queues.
    pub thunks_run: u64,
    /// Dirty-cell notifications delivered.
    pub notifications: u64,
    /// Thunks or payloads dropped because a queue or the arena could not grow.
    pub dropped_thunks: u64,
    /// Ticks abandoned by the pass limit or by an unwinding callback.
    pub aborted_ticks: u64,
    /// Most payloads held by the arena in a single tick.
    pub arena_high_water: usize,
    /// Current payload capacity of the arena.
    pub arena_capacity: usize,
    /// Nodes currently owned by the engine.
    pub owned_nodes: usize,
    /// Cells registered for dirty notification.
    pub registered_cells: usize,
    /// Thunks waiting in either queue. Non-zero outside a flush only after
    /// `schedule_pure`/`schedule_effect` without a flush.
    pub queued_thunks: usize,
}

// =============================================================================
// Engine Core
// =============================================================================

/// Shared scheduler state. Nodes hold a `Weak` reference to it.
pub(crate) struct EngineCore {
    id: EngineId,
    config: EngineConfig,
    tick: Cell<TickId>,
    phase: Cell<Phase>,
    batch_depth: Cell<usize>,
    torn_down: Cell<bool>,
    pure: ThunkQueue,
    effects: ThunkQueue,
    arena: RefCell<TickArena>,
    dirty_registry: RefCell<Vec<Weak<dyn DirtyNode>>>,
    dirty: RefCell<IndexSet<usize>>,
    dirty_spare: RefCell<IndexSet<usize>>,
    owned: RefCell<Vec<Rc<dyn OwnedNode>>>,
    ticks: Cell<u64>,
    thunks_run: Cell<u64>,
    notifications: Cell<u64>,
    dropped: Cell<u64>,
    aborted: Cell<u64>,
}

impl EngineCore {
    fn new(config: EngineConfig) -> Self {
        Self {
            id: EngineId::new(),
            tick: Cell::new(TickId::FIRST),
            phase: Cell::new(Phase::Idle),
            batch_depth: Cell::new(0),
            torn_down: Cell::new(false),
            pure: ThunkQueue::with_capacity("pure", config.pure_capacity),
            effects: ThunkQueue::with_capacity("effects", config.effect_capacity),
            arena: RefCell::new(TickArena::with_capacity(
                config.arena_capacity,
                TickId::FIRST,
            )),
            dirty_registry: RefCell::new(Vec::new()),
            dirty: RefCell::new(IndexSet::new()),
            dirty_spare: RefCell::new(IndexSet::new()),
            owned: RefCell::new(Vec::new()),
            ticks: Cell::new(0),
            thunks_run: Cell::new(0),
            notifications: Cell::new(0),
            dropped: Cell::new(0),
            aborted: Cell::new(0),
            config,
        }
    }

    pub(crate) fn id(&self) -> EngineId {
        self.id
    }

    pub(crate) fn tick(&self) -> TickId {
        self.tick.get()
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase.get()
    }

    pub(crate) fn is_torn_down(&self) -> bool {
        self.torn_down.get()
    }

    /// Fail with `ForeignEngine` unless `other` is this engine.
    pub(crate) fn ensure_same(&self, other: EngineId) -> Result<()> {
        if other == self.id {
            Ok(())
        } else {
            Err(ReactiveError::ForeignEngine {
                expected: self.id,
                found: other,
            })
        }
    }

    /// Take ownership of a dynamically created node.
    pub(crate) fn adopt(&self, node: Rc<dyn OwnedNode>) -> Result<()> {
        if self.is_torn_down() {
            return Err(ReactiveError::EngineDropped);
        }
        let mut owned = self.owned.borrow_mut();
        owned
            .try_reserve(1)
            .map_err(ReactiveError::alloc("registering a node"))?;
        trace!(engine = %self.id, kind = node.kind(), "node created");
        owned.push(node);
        Ok(())
    }

    /// Assign a stable dirty-registry index. Indices are never reused.
    pub(crate) fn register_dirty(&self, node: Weak<dyn DirtyNode>) -> usize {
        let mut registry = self.dirty_registry.borrow_mut();
        registry.push(node);
        registry.len() - 1
    }

    /// Idempotent insert into the dirty set.
    pub(crate) fn mark_dirty(&self, index: usize) {
        self.dirty.borrow_mut().insert(index);
    }

    pub(crate) fn schedule_pure(&self, thunk: Thunk) {
        self.schedule(&self.pure, thunk);
    }

    pub(crate) fn schedule_effect(&self, thunk: Thunk) {
        self.schedule(&self.effects, thunk);
    }

    fn schedule(&self, queue: &ThunkQueue, thunk: Thunk) {
        if queue.push(thunk).is_err() {
            self.dropped.set(self.dropped.get() + 1);
            error!(engine = %self.id, queue = queue.name(), "queue could not grow, thunk dropped");
        }
    }

    /// Move a payload into the tick arena.
    pub(crate) fn alloc_payload<T: 'static>(&self, value: T) -> Option<ArenaKey<T>> {
        match self.arena.borrow_mut().alloc(value) {
            Ok(key) => Some(key),
            Err(_) => {
                self.dropped.set(self.dropped.get() + 1);
                error!(engine = %self.id, "tick arena could not grow, payload dropped");
                None
            }
        }
    }

    pub(crate) fn payload<T: 'static>(&self, key: ArenaKey<T>) -> Option<Rc<T>> {
        self.arena.borrow().get(key)
    }

    /// Flush now if this is a top-level mutation.
    pub(crate) fn request_flush(&self) {
        if self.phase.get() == Phase::Idle && self.batch_depth.get() == 0 && !self.is_torn_down()
        {
            self.flush();
        }
    }

    /// Run one full tick. No-op when a flush is already running.
    pub(crate) fn flush(&self) {
        if self.phase.get() != Phase::Idle {
            return;
        }

        let tick = self.tick.get();
        let span = debug_span!(
            "tick",
            engine = %self.id,
            label = self.config.label.as_deref().unwrap_or(""),
            tick = tick.get(),
        );
        let _enter = span.enter();

        let mut guard = TickGuard {
            core: self,
            finished: false,
        };
        let mut passes = 0usize;
        let mut ran = 0usize;
        let mut notified = 0usize;

        loop {
            passes += 1;
            if let Some(limit) = self.config.max_passes {
                if passes > limit {
                    let dropped = self.discard_pending();
                    self.aborted.set(self.aborted.get() + 1);
                    error!(limit, dropped, "tick did not settle within the pass limit, abandoning");
                    break;
                }
            }

            self.phase.set(Phase::Pure);
            loop {
                let n = self.pure.drain_pass();
                if n == 0 {
                    break;
                }
                ran += n;
                trace!(thunks = n, "pure pass");
            }

            self.phase.set(Phase::Effects);
            let n = self.notify_dirty();
            if n > 0 {
                notified += n;
                continue;
            }

            let n = self.effects.drain_pass();
            if n == 0 {
                break;
            }
            ran += n;
            trace!(thunks = n, "effect pass");
        }

        guard.finished = true;
        self.thunks_run.set(self.thunks_run.get() + ran as u64);
        self.notifications
            .set(self.notifications.get() + notified as u64);
        debug!(passes, thunks = ran, notified, "tick settled");
    }

    /// Notify every cell marked dirty so far. Returns how many were dirty.
    fn notify_dirty(&self) -> usize {
        let mut batch = {
            let mut dirty = self.dirty.borrow_mut();
            if dirty.is_empty() {
                return 0;
            }
            let spare = std::mem::take(&mut *self.dirty_spare.borrow_mut());
            std::mem::replace(&mut *dirty, spare)
        };

        let mut notified = 0;
        for &index in batch.iter() {
            let node = self
                .dirty_registry
                .borrow()
                .get(index)
                .and_then(Weak::upgrade);
            if let Some(node) = node {
                if node.notify_if_dirty() {
                    notified += 1;
                }
            }
        }
        trace!(cells = batch.len(), notified, "dirty cells notified");

        batch.clear();
        *self.dirty_spare.borrow_mut() = batch;
        notified
    }

    /// Drop all queued work and dirty marks. Returns the number of thunks dropped.
    fn discard_pending(&self) -> usize {
        self.dirty.borrow_mut().clear();
        self.pure.discard() + self.effects.discard()
    }

    fn end_tick(&self) {
        let next = self.tick.get().next();
        self.arena.borrow_mut().reset(next);
        self.tick.set(next);
        self.ticks.set(self.ticks.get() + 1);
        self.phase.set(Phase::Idle);
    }

    fn stats(&self) -> EngineStats {
        let arena = self.arena.borrow();
        EngineStats {
            ticks: self.ticks.get(),
            thunks_run: self.thunks_run.get(),
            notifications: self.notifications.get(),
            dropped_thunks: self.dropped.get(),
            aborted_ticks: self.aborted.get(),
            arena_high_water: arena.high_water(),
            arena_capacity: arena.capacity(),
            owned_nodes: self.owned.borrow().len(),
            registered_cells: self.dirty_registry.borrow().len(),
            queued_thunks: self.pure.len() + self.effects.len(),
        }
    }

    fn teardown(&self) {
        if self.torn_down.replace(true) {
            return;
        }
        let nodes = std::mem::take(&mut *self.owned.borrow_mut());
        let dropped = self.discard_pending();
        self.dirty_registry.borrow_mut().clear();

        for node in nodes.iter().rev() {
            node.teardown();
        }
        debug!(engine = %self.id, nodes = nodes.len(), dropped, "engine torn down");
    }
}

/// Closes a tick on every exit path, including unwinding out of a callback.
struct TickGuard<'a> {
    core: &'a EngineCore,
    finished: bool,
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let dropped = self.core.discard_pending();
            self.core.aborted.set(self.core.aborted.get() + 1);
            error!(dropped, "callback unwound out of a flush, discarding queued work");
        }
        self.core.end_tick();
    }
}

/// Restores the batch depth even if the batch closure unwinds.
struct BatchGuard<'a>(&'a EngineCore);

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.0.batch_depth.set(self.0.batch_depth.get() - 1);
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Owner of a reactive graph.
///
/// Creates nodes, owns them, and runs every tick. Dropping the engine tears
/// the graph down; node handles held elsewhere stay valid but inert.
pub struct Engine {
    core: Rc<EngineCore>,
}

impl Engine {
    /// Create an engine with the default configuration.
    pub fn new() -> Self {
        EngineBuilder::new().build()
    }

    /// Start configuring an engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// This engine's identity.
    pub fn id(&self) -> EngineId {
        self.core.id
    }

    /// The tick the next (or current) flush runs as.
    pub fn tick(&self) -> TickId {
        self.core.tick()
    }

    /// Current scheduler phase. Always `Idle` outside a flush.
    pub fn phase(&self) -> Phase {
        self.core.phase()
    }

    /// Configuration the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    /// Snapshot of the engine's counters.
    pub fn stats(&self) -> EngineStats {
        self.core.stats()
    }

    /// Create an engine-owned signal.
    pub fn signal<T: 'static>(&self) -> Result<Signal<T>> {
        Signal::create(&self.core)
    }

    /// Create an engine-owned state cell holding `initial`.
    pub fn store<T: Clone + 'static>(&self, initial: T) -> Result<Store<T>> {
        Store::create(&self.core, initial)
    }

    /// Create an engine-owned effect around a fallible handler.
    pub fn effect<P, R, E, F>(&self, handler: F) -> Result<Effect<P, R, E>>
    where
        P: Clone + 'static,
        R: Clone + 'static,
        E: 'static,
        F: Fn(P) -> Result<R, E> + 'static,
    {
        Effect::create(&self.core, handler)
    }

    /// Queue work for the pure phase of the current or next tick.
    ///
    /// Does not flush on its own; call [`flush`](Self::flush) or let the next
    /// top-level mutation do it.
    pub fn schedule_pure(&self, thunk: impl FnOnce() + 'static) -> Result<()> {
        self.core
            .pure
            .push(Box::new(thunk))
            .map_err(ReactiveError::alloc("growing the pure queue"))
    }

    /// Queue work for the effects phase of the current or next tick.
    pub fn schedule_effect(&self, thunk: impl FnOnce() + 'static) -> Result<()> {
        self.core
            .effects
            .push(Box::new(thunk))
            .map_err(ReactiveError::alloc("growing the effect queue"))
    }

    /// Run a tick now. No-op while a tick is already running.
    pub fn flush(&self) {
        if self.core.is_torn_down() {
            warn!(engine = %self.core.id, "flush on a torn-down engine ignored");
            return;
        }
        self.core.flush();
    }

    /// Run `f` with auto-flush suspended, then flush once.
    ///
    /// Every emit and set inside `f` lands in the same tick, so watchers see
    /// the combined result exactly once. Batches nest; only the outermost one
    /// flushes.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let core = &*self.core;
        core.batch_depth.set(core.batch_depth.get() + 1);
        let result = {
            let _guard = BatchGuard(core);
            f()
        };
        core.request_flush();
        result
    }

    /// Tear down every owned node. Safe to call more than once.
    pub fn deinit(&self) {
        self.core.teardown();
    }

    /// Whether [`deinit`](Self::deinit) has run.
    pub fn is_torn_down(&self) -> bool {
        self.core.is_torn_down()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.deinit();
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.core.id)
            .field("tick", &self.core.tick())
            .field("phase", &self.core.phase())
            .field("owned_nodes", &self.core.owned.borrow().len())
            .field("arena_payloads", &self.core.arena.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::*;
    use crate::testing::Recorder;

    #[test]
    fn test_new_engine_is_idle_at_first_tick() {
        let engine = Engine::new();
        assert_eq!(engine.phase(), Phase::Idle);
        assert_eq!(engine.tick(), TickId::FIRST);
        assert_eq!(engine.stats(), EngineStats {
            arena_capacity: engine.stats().arena_capacity,
            ..EngineStats::default()
        });
    }

    #[test]
    fn test_builder_applies_config() {
        let engine = Engine::builder()
            .pure_capacity(8)
            .effect_capacity(4)
            .arena_capacity(2)
            .max_passes(0)
            .label("unit")
            .build();

        let config = engine.config();
        assert_eq!(config.pure_capacity, 8);
        assert_eq!(config.effect_capacity, 4);
        assert_eq!(config.arena_capacity, 2);
        assert_eq!(config.max_passes, Some(1));
        assert_eq!(config.label.as_deref(), Some("unit"));

        let copy = EngineBuilder::with_config(config.clone()).build();
        assert_eq!(copy.config(), config);
        assert_ne!(copy.id(), engine.id());
    }

    #[test]
    fn test_emit_flushes_and_advances_tick() {
        let engine = Engine::new();
        let ping = engine.signal::<()>().unwrap();

        ping.emit(());
        assert_eq!(engine.tick(), TickId::FIRST.next());
        assert_eq!(engine.phase(), Phase::Idle);
        assert_eq!(engine.stats().ticks, 1);
    }

    #[test]
    fn test_pure_work_runs_before_effects() {
        let engine = Engine::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = log.clone();
        engine
            .schedule_effect(move || l.borrow_mut().push("effect"))
            .unwrap();
        let l = log.clone();
        engine
            .schedule_pure(move || l.borrow_mut().push("pure"))
            .unwrap();
        assert_eq!(engine.stats().queued_thunks, 2);

        engine.flush();
        assert_eq!(*log.borrow(), vec!["pure", "effect"]);
        assert_eq!(engine.stats().queued_thunks, 0);
    }

    #[test]
    fn test_effect_pass_is_a_snapshot() {
        let engine = Engine::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let nudge = engine.signal::<i32>().unwrap();
        let value = engine.store(0).unwrap();
        value.on(&nudge, |_, n| Some(*n)).unwrap();

        let l = log.clone();
        let nudge2 = nudge.clone();
        engine
            .schedule_effect(move || {
                l.borrow_mut().push("first effect".to_string());
                nudge2.emit(5);
            })
            .unwrap();
        let l = log.clone();
        let v = value.clone();
        engine
            .schedule_effect(move || l.borrow_mut().push(format!("second effect sees {}", v.get())))
            .unwrap();

        engine.flush();
        // Both effects were in the same snapshot pass, so the second one runs
        // before the reducer queued by the first.
        assert_eq!(
            *log.borrow(),
            vec!["first effect".to_string(), "second effect sees 0".to_string()]
        );
        assert_eq!(value.get(), 5);
    }

    #[test]
    fn test_explicit_flush_inside_tick_is_noop() {
        let engine = Rc::new(Engine::new());
        let phases = Rc::new(RefCell::new(Vec::new()));

        let e = Rc::downgrade(&engine);
        let p = phases.clone();
        engine
            .schedule_pure(move || {
                let engine = e.upgrade().unwrap();
                p.borrow_mut().push(engine.phase());
                engine.flush();
                p.borrow_mut().push(engine.phase());
            })
            .unwrap();

        engine.flush();
        assert_eq!(*phases.borrow(), vec![Phase::Pure, Phase::Pure]);
        assert_eq!(engine.stats().ticks, 1);
    }

    #[test]
    fn test_batch_groups_mutations_into_one_tick() {
        let engine = Engine::new();
        let add = engine.signal::<i32>().unwrap();
        let total = engine.store(0).unwrap();
        total.on(&add, |t, n| Some(t + n)).unwrap();
        let seen = Recorder::new();
        seen.watch_store(&total);

        let out = engine.batch(|| {
            add.emit(1);
            add.emit(2);
            engine.batch(|| add.emit(3));
            assert_eq!(total.get(), 0, "nothing flushes inside a batch");
            "done"
        });

        assert_eq!(out, "done");
        assert_eq!(total.get(), 6);
        assert_eq!(seen.values(), vec![6]);
        assert_eq!(engine.stats().ticks, 1);
    }

    #[test]
    fn test_pass_limit_abandons_feedback_loop() {
        let engine = Engine::builder().max_passes(16).build();
        let counter = engine.store(0_u64).unwrap();

        let c = counter.clone();
        counter.watch(move |v| c.set(v + 1));
        counter.set(1);

        let stats = engine.stats();
        assert_eq!(stats.aborted_ticks, 1);
        assert_eq!(engine.phase(), Phase::Idle);
        assert!(counter.get() > 1);

        // The engine keeps working after an abandoned tick.
        let ping = engine.signal::<()>().unwrap();
        let hits = Recorder::new();
        hits.watch_signal(&ping);
        ping.emit(());
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_cell_from_abandoned_tick_notifies_again() {
        let engine = Engine::builder().max_passes(16).build();
        let counter = engine.store(0_u64).unwrap();
        let looping = Rc::new(Cell::new(true));

        let c = counter.clone();
        let l = looping.clone();
        counter.watch(move |v| {
            if l.get() {
                c.set(v + 1);
            }
        });
        let seen = Recorder::new();
        seen.watch_store(&counter);

        counter.set(1);
        assert_eq!(engine.stats().aborted_ticks, 1);
        // The last write of the abandoned tick left the cell dirty.
        assert!(counter.is_dirty());
        seen.take();

        looping.set(false);
        counter.set(100);
        assert_eq!(seen.values(), vec![100]);
        assert!(!counter.is_dirty());
        assert_eq!(engine.stats().aborted_ticks, 1);
    }

    #[test]
    fn test_panicking_reducer_leaves_engine_usable() {
        let engine = Engine::new();
        let boom = engine.signal::<i32>().unwrap();
        let total = engine.store(0).unwrap();
        total.on(&boom, |t, n| Some(t + n)).unwrap();
        let strict = engine.store(0).unwrap();
        strict
            .on(&boom, |_, n| {
                if *n == 13 {
                    panic!("unlucky");
                }
                Some(*n)
            })
            .unwrap();
        let seen = Recorder::new();
        seen.watch_store(&total);

        // `total` is written before the panic, then its notification is lost.
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| boom.emit(13)));
        assert!(result.is_err());
        assert_eq!(engine.phase(), Phase::Idle);
        assert_eq!(engine.stats().aborted_ticks, 1);
        assert_eq!(engine.stats().queued_thunks, 0);
        assert!(seen.is_empty());

        boom.emit(2);
        assert_eq!(total.get(), 15);
        assert_eq!(strict.get(), 2);
        assert_eq!(seen.values(), vec![15]);
        assert_eq!(engine.stats().aborted_ticks, 1);
    }

    #[test]
    fn test_panicking_watcher_leaves_engine_usable() {
        let engine = Engine::new();
        let boom = engine.signal::<i32>().unwrap();
        boom.watch(|n| {
            if *n == 13 {
                panic!("unlucky");
            }
        });
        let seen = Recorder::new();
        seen.watch_signal(&boom);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| boom.emit(13)));
        assert!(result.is_err());
        assert_eq!(engine.phase(), Phase::Idle);
        assert_eq!(engine.stats().aborted_ticks, 1);

        boom.emit(1);
        assert_eq!(seen.values(), vec![1]);
    }

    #[test]
    fn test_deinit_is_idempotent_and_rejects_construction() {
        let engine = Engine::new();
        let sig = engine.signal::<i32>().unwrap();
        let _cell = engine.store(0).unwrap();
        assert_eq!(engine.stats().owned_nodes, 2);

        engine.deinit();
        engine.deinit();

        assert!(engine.is_torn_down());
        assert_eq!(engine.stats().owned_nodes, 0);
        assert_eq!(
            engine.signal::<i32>().unwrap_err(),
            ReactiveError::EngineDropped
        );
        // Handles outlive the engine's graph but do nothing.
        sig.emit(1);
        assert_eq!(engine.stats().ticks, 0);
    }

    #[test]
    fn test_handles_survive_engine_drop() {
        let engine = Engine::new();
        let sig = engine.signal::<i32>().unwrap();
        let cell = engine.store(3).unwrap();
        drop(engine);

        sig.emit(1);
        cell.set(9);
        assert_eq!(cell.get(), 3);
    }

    #[test]
    fn test_engines_are_independent() {
        let a = Engine::new();
        let b = Engine::new();
        let sa = a.signal::<i32>().unwrap();
        let sb = b.signal::<i32>().unwrap();

        sa.emit(1);
        sa.emit(2);
        sb.emit(1);

        assert_ne!(a.id(), b.id());
        assert_eq!(a.stats().ticks, 2);
        assert_eq!(b.stats().ticks, 1);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_stats_and_config_serialize() {
        let engine = Engine::builder().label("json").max_passes(8).build();
        let ping = engine.signal::<()>().unwrap();
        ping.emit(());

        let stats = serde_json::to_value(engine.stats()).unwrap();
        assert_eq!(stats["ticks"], 1);
        let config = serde_json::to_value(engine.config()).unwrap();
        assert_eq!(config["label"], "json");
        assert_eq!(config["max_passes"], 8);
        let id = serde_json::to_value(engine.id()).unwrap();
        assert!(id.is_string());
    }

    #[test]
    fn test_debug_impl() {
        let engine = Engine::builder().label("dbg").build();
        let debug = format!("{:?}", engine);
        assert!(debug.contains("Engine"));
        assert!(debug.contains("owned_nodes"));
    }
}

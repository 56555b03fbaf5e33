//! Derived operators: `sample`, `guard`, `forward` and `restore`.
//!
//! Every operator builds a *wire*: a node owned by the engine that connects
//!
//! ```text
//! trigger ──► read source ──► filter? ──► transform ──► deliver to target
//! (signal)    (payload,        (predicate   (map)         (emit on a signal
//!              store or         or Store                   or set a store)
//!              snapshot)        <bool>)
//! ```
//!
//! Nothing runs at construction. The wire fires from the pure phase each
//! time its trigger signal fires, so a wire that emits or sets only enqueues
//! more work for the same tick.
//!
//! # Builders
//!
//! ```ignore
//! use cascade::{Sample, Guard};
//!
//! // sample(clock = inc, source = count, transform = x * 2, target = doubled)
//! Sample::new(&inc, &count).map(|x| x * 2).target(&doubled).build()?;
//!
//! // guard(clock = inc, source = count, filter = x > 5) into a fresh signal
//! let big: Signal<i32> = Guard::new(&inc, &count).filter(|x| *x > 5).to_signal()?;
//!
//! // trigger on the source's own updates
//! let labels = Sample::source(&count).map(|n| format!("#{n}")).to_signal()?;
//! ```
//!
//! A builder always has a trigger or a source by construction. Misuse that
//! the types cannot rule out is reported by `build`:
//!
//! | Condition                                  | Error             |
//! |--------------------------------------------|-------------------|
//! | `Guard` without `filter`/`filter_by`       | `MissingFilter`   |
//! | source without updates and no clock        | `MissingTrigger`  |
//! | `to_signal`, or `map` after `target`       | `TargetConflict`  |
//! | operands from different engines            | `ForeignEngine`   |

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;
use tracing::trace;

use crate::engine::OwnedNode;
use crate::error::{ReactiveError, Result};
use crate::signal::{Reducer, Signal, WeakSignal};
use crate::store::{Store, WeakStore};
use crate::tick::EngineId;

// =============================================================================
// Sources
// =============================================================================

/// Anything a wire can read a value from when its trigger fires.
///
/// Composite snapshots of several stores plug into the operators by
/// implementing this trait; the read must be synchronous.
pub trait Source<V> {
    /// Current value.
    fn read(&self) -> V;

    /// Signal that fires whenever the value changes, if there is one.
    fn updates(&self) -> Option<Signal<V>> {
        None
    }

    /// Engine the source belongs to, if it belongs to one.
    fn engine_id(&self) -> Option<EngineId> {
        None
    }
}

impl<T: Clone + 'static> Source<T> for Store<T> {
    fn read(&self) -> T {
        self.get()
    }

    fn updates(&self) -> Option<Signal<T>> {
        Some(Store::updates(self))
    }

    fn engine_id(&self) -> Option<EngineId> {
        Some(Store::engine_id(self))
    }
}

/// Closure-backed [`Source`].
///
/// # Example
///
/// ```ignore
/// let (w, h) = (width.clone(), height.clone());
/// let area = Snapshot::new(move || w.get() * h.get()).with_updates(&resized);
/// let areas = Sample::source(&area).to_signal()?;
/// ```
pub struct Snapshot<V> {
    read: Rc<dyn Fn() -> V>,
    updates: Option<Signal<V>>,
}

impl<V: 'static> Snapshot<V> {
    /// A source that calls `read` each time its wire fires. Without
    /// [`with_updates`](Self::with_updates) it needs an explicit clock.
    pub fn new(read: impl Fn() -> V + 'static) -> Self {
        Self {
            read: Rc::new(read),
            updates: None,
        }
    }

    /// Use `signal` as this snapshot's update notification.
    pub fn with_updates(mut self, signal: &Signal<V>) -> Self {
        self.updates = Some(signal.clone());
        self
    }
}

impl<V> Clone for Snapshot<V> {
    fn clone(&self) -> Self {
        Self {
            read: self.read.clone(),
            updates: self.updates.clone(),
        }
    }
}

impl<V: 'static> Source<V> for Snapshot<V> {
    fn read(&self) -> V {
        (self.read)()
    }

    fn updates(&self) -> Option<Signal<V>> {
        self.updates.clone()
    }

    fn engine_id(&self) -> Option<EngineId> {
        self.updates.as_ref().map(Signal::engine_id)
    }
}

// =============================================================================
// Units
// =============================================================================

/// A delivery target: a signal or a store.
pub enum Unit<T> {
    /// Values are emitted.
    Signal(Signal<T>),
    /// Values are set.
    Store(Store<T>),
}

impl<T: Clone + 'static> Unit<T> {
    /// Emit on the signal or set the store.
    pub fn deliver(&self, value: T) {
        match self {
            Unit::Signal(signal) => signal.emit(value),
            Unit::Store(store) => store.set(value),
        }
    }

    /// Id of the engine the unit belongs to.
    pub fn engine_id(&self) -> EngineId {
        match self {
            Unit::Signal(signal) => signal.engine_id(),
            Unit::Store(store) => store.engine_id(),
        }
    }

    /// The signal, unless this is a store.
    pub fn as_signal(&self) -> Option<&Signal<T>> {
        match self {
            Unit::Signal(signal) => Some(signal),
            Unit::Store(_) => None,
        }
    }

    /// The store, unless this is a signal.
    pub fn as_store(&self) -> Option<&Store<T>> {
        match self {
            Unit::Store(store) => Some(store),
            Unit::Signal(_) => None,
        }
    }

    /// Unwrap into the signal, or `None` for a store.
    pub fn into_signal(self) -> Option<Signal<T>> {
        match self {
            Unit::Signal(signal) => Some(signal),
            Unit::Store(_) => None,
        }
    }

    /// Unwrap into the store, or `None` for a signal.
    pub fn into_store(self) -> Option<Store<T>> {
        match self {
            Unit::Store(store) => Some(store),
            Unit::Signal(_) => None,
        }
    }

    fn downgrade(&self) -> WeakUnit<T> {
        match self {
            Unit::Signal(signal) => WeakUnit::Signal(signal.downgrade()),
            Unit::Store(store) => WeakUnit::Store(store.downgrade()),
        }
    }
}

impl<T> Clone for Unit<T> {
    fn clone(&self) -> Self {
        match self {
            Unit::Signal(signal) => Unit::Signal(signal.clone()),
            Unit::Store(store) => Unit::Store(store.clone()),
        }
    }
}

impl<T> fmt::Debug for Unit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Signal(signal) => f.debug_tuple("Unit::Signal").field(signal).finish(),
            Unit::Store(_) => f.write_str("Unit::Store(..)"),
        }
    }
}

impl<T> From<Signal<T>> for Unit<T> {
    fn from(signal: Signal<T>) -> Self {
        Unit::Signal(signal)
    }
}

impl<T> From<&Signal<T>> for Unit<T> {
    fn from(signal: &Signal<T>) -> Self {
        Unit::Signal(signal.clone())
    }
}

impl<T> From<Store<T>> for Unit<T> {
    fn from(store: Store<T>) -> Self {
        Unit::Store(store)
    }
}

impl<T> From<&Store<T>> for Unit<T> {
    fn from(store: &Store<T>) -> Self {
        Unit::Store(store.clone())
    }
}

enum WeakUnit<T> {
    Signal(WeakSignal<T>),
    Store(WeakStore<T>),
}

impl<T> WeakUnit<T> {
    fn upgrade(&self) -> Option<Unit<T>> {
        match self {
            WeakUnit::Signal(signal) => signal.upgrade().map(Unit::Signal),
            WeakUnit::Store(store) => store.upgrade().map(Unit::Store),
        }
    }
}

// =============================================================================
// Builders
// =============================================================================

type TriggerFn<C> = Rc<dyn Fn() -> Option<Signal<C>>>;
type ReadFn<C, V> = Rc<dyn Fn(&C) -> V>;
type FilterFn<V> = Rc<dyn Fn(&V) -> bool>;
type TransformFn<V, R> = Rc<dyn Fn(V) -> R>;

/// Entry point for `sample` wires.
pub struct Sample;

/// Entry point for `guard` wires. Identical to [`Sample`] except that a
/// filter is mandatory.
pub struct Guard;

macro_rules! wire_constructors {
    ($entry:ident, $guard:expr) => {
        impl $entry {
            /// Fire on every payload of `clock`, reading the payload itself.
            pub fn clock<T: Clone + 'static>(clock: &Signal<T>) -> WireBuilder<T, T, T> {
                let trigger = clock.clone();
                WireBuilder::start(
                    $guard,
                    Rc::new(move || Some(trigger.clone())),
                    Some(clock.engine_id()),
                    Rc::new(|payload: &T| payload.clone()),
                    None,
                )
            }

            /// Fire whenever `source` changes, reading `source`.
            pub fn source<V, S>(source: &S) -> WireBuilder<V, V, V>
            where
                V: Clone + 'static,
                S: Source<V> + Clone + 'static,
            {
                // Looking up `updates` may register the source, so it waits
                // until `build` has validated everything else.
                let lookup = source.clone();
                let src = source.clone();
                WireBuilder::start(
                    $guard,
                    Rc::new(move || lookup.updates()),
                    source.engine_id(),
                    Rc::new(move |_: &V| src.read()),
                    source.engine_id(),
                )
            }

            /// Fire on every payload of `clock`, reading `source`.
            pub fn new<C, V, S>(clock: &Signal<C>, source: &S) -> WireBuilder<C, V, V>
            where
                C: 'static,
                V: Clone + 'static,
                S: Source<V> + Clone + 'static,
            {
                let trigger = clock.clone();
                let src = source.clone();
                WireBuilder::start(
                    $guard,
                    Rc::new(move || Some(trigger.clone())),
                    Some(clock.engine_id()),
                    Rc::new(move |_: &C| src.read()),
                    source.engine_id(),
                )
            }
        }
    };
}

wire_constructors!(Sample, false);
wire_constructors!(Guard, true);

/// Options of one wire, produced by [`Sample`] or [`Guard`].
#[must_use = "a wire does nothing until `build` or `to_signal` is called"]
pub struct WireBuilder<C, V, R> {
    guard: bool,
    trigger: TriggerFn<C>,
    trigger_engine: Option<EngineId>,
    read: ReadFn<C, V>,
    filter: Option<FilterFn<V>>,
    transform: TransformFn<V, R>,
    target: Option<Unit<R>>,
    operands: SmallVec<[EngineId; 4]>,
    conflict: bool,
}

impl<C: 'static, V: 'static> WireBuilder<C, V, V> {
    fn start(
        guard: bool,
        trigger: TriggerFn<C>,
        trigger_engine: Option<EngineId>,
        read: ReadFn<C, V>,
        source_engine: Option<EngineId>,
    ) -> Self {
        Self {
            guard,
            trigger,
            trigger_engine,
            read,
            filter: None,
            transform: Rc::new(|value: V| value),
            target: None,
            operands: source_engine.into_iter().collect(),
            conflict: false,
        }
    }
}

impl<C: 'static, V: 'static, R: Clone + 'static> WireBuilder<C, V, R> {
    /// Only fire when `predicate` accepts the value read from the source.
    pub fn filter(mut self, predicate: impl Fn(&V) -> bool + 'static) -> Self {
        self.filter = Some(Rc::new(predicate));
        self
    }

    /// Only fire while `gate` holds `true`.
    pub fn filter_by(mut self, gate: &Store<bool>) -> Self {
        let gate_engine = gate.engine_id();
        let gate = gate.clone();
        self.filter = Some(Rc::new(move |_: &V| gate.get()));
        self.operands.push(gate_engine);
        self
    }

    /// Transform the value before delivery. Composes with earlier `map`s.
    ///
    /// Call before [`target`](Self::target); a target set earlier has the
    /// wrong type and makes `build` fail with `TargetConflict`.
    pub fn map<U: Clone + 'static>(self, f: impl Fn(R) -> U + 'static) -> WireBuilder<C, V, U> {
        let previous = self.transform;
        WireBuilder {
            guard: self.guard,
            trigger: self.trigger,
            trigger_engine: self.trigger_engine,
            read: self.read,
            filter: self.filter,
            transform: Rc::new(move |value: V| f(previous(value))),
            target: None,
            operands: self.operands,
            conflict: self.conflict || self.target.is_some(),
        }
    }

    /// Deliver into an existing signal or store.
    pub fn target(mut self, target: impl Into<Unit<R>>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Connect the wire. Returns the target, or a new engine-owned signal
    /// when no target was given.
    pub fn build(self) -> Result<Unit<R>> {
        if self.guard && self.filter.is_none() {
            return Err(ReactiveError::MissingFilter);
        }
        if self.conflict {
            return Err(ReactiveError::TargetConflict);
        }
        if let Some(expected) = self.trigger_engine {
            let target_engine = self.target.as_ref().map(Unit::engine_id);
            for found in self.operands.iter().copied().chain(target_engine) {
                if found != expected {
                    return Err(ReactiveError::ForeignEngine { expected, found });
                }
            }
        }

        let trigger = (self.trigger)().ok_or(ReactiveError::MissingTrigger)?;
        let core = trigger.core()?;
        for &engine in &self.operands {
            core.ensure_same(engine)?;
        }

        let target = match self.target {
            Some(target) => {
                core.ensure_same(target.engine_id())?;
                target
            }
            None => Unit::Signal(Signal::create(&core)?),
        };

        let wire = Rc::new(WireInner {
            guard: self.guard,
            parts: RefCell::new(Some(WireParts {
                read: self.read,
                filter: self.filter,
                transform: self.transform,
                target: target.downgrade(),
            })),
            trigger: RefCell::new(None),
        });
        core.adopt(wire.clone())?;

        let weak: Weak<WireInner<C, V, R>> = Rc::downgrade(&wire);
        let fire: Rc<Reducer<C>> = Rc::new(move |payload: &C| {
            if let Some(wire) = weak.upgrade() {
                wire.fire(payload);
            }
        });
        trigger.subscribe(&fire);
        *wire.trigger.borrow_mut() = Some(fire);

        trace!(guard = wire.guard, "wire connected");
        Ok(target)
    }

    /// Connect the wire into a new signal.
    pub fn to_signal(self) -> Result<Signal<R>> {
        if self.target.is_some() {
            return Err(ReactiveError::TargetConflict);
        }
        self.build()?
            .into_signal()
            .ok_or(ReactiveError::TargetConflict)
    }
}

// =============================================================================
// Wire
// =============================================================================

struct WireParts<C, V, R> {
    read: ReadFn<C, V>,
    filter: Option<FilterFn<V>>,
    transform: TransformFn<V, R>,
    target: WeakUnit<R>,
}

struct WireInner<C, V, R> {
    guard: bool,
    parts: RefCell<Option<WireParts<C, V, R>>>,
    /// Strong side of the reducer installed on the trigger signal.
    trigger: RefCell<Option<Rc<Reducer<C>>>>,
}

impl<C, V, R: Clone + 'static> WireInner<C, V, R> {
    fn fire(&self, payload: &C) {
        let (read, filter, transform, target) = {
            let parts = self.parts.borrow();
            let Some(parts) = parts.as_ref() else {
                return;
            };
            let Some(target) = parts.target.upgrade() else {
                return;
            };
            (
                parts.read.clone(),
                parts.filter.clone(),
                parts.transform.clone(),
                target,
            )
        };

        let value = read(payload);
        if let Some(filter) = filter {
            if !filter(&value) {
                trace!(guard = self.guard, "wire filtered");
                return;
            }
        }
        target.deliver(transform(value));
    }
}

impl<C, V, R> OwnedNode for WireInner<C, V, R> {
    fn teardown(&self) {
        self.parts.borrow_mut().take();
        self.trigger.borrow_mut().take();
    }

    fn kind(&self) -> &'static str {
        if self.guard {
            "guard"
        } else {
            "sample"
        }
    }
}

// =============================================================================
// Shorthands
// =============================================================================

/// Pass every payload of `from` unchanged to `to`.
pub fn forward<T: Clone + 'static>(from: &Signal<T>, to: impl Into<Unit<T>>) -> Result<Unit<T>> {
    Sample::clock(from).target(to).build()
}

/// A new store holding the latest payload of `signal`, starting at `initial`.
pub fn restore<T: Clone + 'static>(signal: &Signal<T>, initial: T) -> Result<Store<T>> {
    let core = signal.core()?;
    let store = Store::create(&core, initial)?;
    store.on(signal, |_, payload| Some(payload.clone()))?;
    Ok(store)
}

//! Signals - discrete events carrying a payload.
//!
//! A [`Signal`] has two kinds of subscribers:
//!
//! | Subscriber | Installed by                     | Runs in        | May mutate? |
//! |------------|----------------------------------|----------------|-------------|
//! | Reducer    | `Store::on`, operators, `map`... | pure phase     | graph state |
//! | Watcher    | `watch`                          | effects phase  | anything    |
//!
//! # Emit
//!
//! `emit` moves the payload into the tick arena once, schedules one pure
//! thunk per live reducer, and one effect thunk for all watchers. The watcher
//! thunk reads the watcher slots when it runs, so a watcher removed before
//! then is not called.
//!
//! # Ownership
//!
//! A signal holds its reducers weakly. Whoever installs a reducer (a store, a
//! wire, a derived signal) owns the closure; when that owner is torn down the
//! reducer disappears from every signal it was installed on.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;
use tracing::{trace, warn};

use crate::engine::{EngineCore, OwnedNode};
use crate::error::{ReactiveError, Result};
use crate::slots::{call_each, next_owner, Slots, Subscription};
use crate::tick::EngineId;

/// Reducer trigger installed on a signal.
pub(crate) type Reducer<T> = dyn Fn(&T);

pub(crate) struct SignalInner<T> {
    engine: Weak<EngineCore>,
    engine_id: EngineId,
    /// Owner token stamped on every subscription this node issues.
    owner: u64,
    watchers: RefCell<Slots<dyn Fn(&T)>>,
    reducers: RefCell<Vec<Weak<Reducer<T>>>>,
    /// Closures this signal installed on upstream signals (derived signals only).
    upstream: RefCell<Vec<Box<dyn Any>>>,
}

impl<T: 'static> SignalInner<T> {
    fn live_engine(&self, op: &'static str) -> Option<Rc<EngineCore>> {
        match self.engine.upgrade() {
            Some(core) if !core.is_torn_down() => Some(core),
            _ => {
                warn!(op, "signal belongs to a torn-down engine, ignoring");
                None
            }
        }
    }

    fn live_reducers(&self) -> SmallVec<[Rc<Reducer<T>>; 4]> {
        let mut live = SmallVec::new();
        self.reducers
            .borrow_mut()
            .retain(|weak| match weak.upgrade() {
                Some(reducer) => {
                    live.push(reducer);
                    true
                }
                None => false,
            });
        live
    }

    fn enqueue(self: &Rc<Self>, core: &Rc<EngineCore>, payload: T) {
        let reducers = self.live_reducers();
        let has_watchers = self.watchers.borrow().live() > 0;
        if reducers.is_empty() && !has_watchers {
            trace!("emit without subscribers");
            return;
        }

        let Some(key) = core.alloc_payload(payload) else {
            return;
        };
        let engine = Rc::downgrade(core);

        for reducer in reducers {
            let engine = engine.clone();
            core.schedule_pure(Box::new(move || {
                if let Some(payload) = engine.upgrade().and_then(|core| core.payload(key)) {
                    reducer(&*payload);
                }
            }));
        }

        if has_watchers {
            let node = Rc::downgrade(self);
            core.schedule_effect(Box::new(move || {
                let Some(node) = node.upgrade() else {
                    return;
                };
                if let Some(payload) = engine.upgrade().and_then(|core| core.payload(key)) {
                    call_each(&node.watchers, &*payload);
                }
            }));
        }
    }
}

impl<T> OwnedNode for SignalInner<T> {
    fn teardown(&self) {
        self.watchers.borrow_mut().clear();
        self.reducers.borrow_mut().clear();
        self.upstream.borrow_mut().clear();
    }

    fn kind(&self) -> &'static str {
        "signal"
    }
}

/// A discrete event carrying a payload of type `T`.
///
/// Handles are cheap to clone; every clone refers to the same node.
///
/// # Example
///
/// ```ignore
/// let clicked = engine.signal::<(i32, i32)>()?;
/// let sub = clicked.watch(|(x, y)| println!("click at {x},{y}"));
/// clicked.emit((3, 4));
/// clicked.unwatch(sub);
/// ```
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> Signal<T> {
    /// Create a signal owned by the engine.
    pub(crate) fn create(core: &Rc<EngineCore>) -> Result<Self> {
        let signal = Self::detached(Rc::downgrade(core), core.id());
        core.adopt(signal.inner.clone())?;
        Ok(signal)
    }

    /// Create a signal owned by another node (companions, effect outputs).
    pub(crate) fn detached(engine: Weak<EngineCore>, engine_id: EngineId) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                engine,
                engine_id,
                owner: next_owner(),
                watchers: RefCell::new(Slots::new()),
                reducers: RefCell::new(Vec::new()),
                upstream: RefCell::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn core(&self) -> Result<Rc<EngineCore>> {
        match self.inner.engine.upgrade() {
            Some(core) if !core.is_torn_down() => Ok(core),
            _ => Err(ReactiveError::EngineDropped),
        }
    }

    pub(crate) fn teardown(&self) {
        self.inner.teardown();
    }

    /// Id of the engine this signal belongs to.
    pub fn engine_id(&self) -> EngineId {
        self.inner.engine_id
    }

    /// Fire the signal.
    ///
    /// At top level this runs a full tick before returning. Inside a tick it
    /// only enqueues.
    pub fn emit(&self, payload: T) {
        let Some(core) = self.inner.live_engine("emit") else {
            return;
        };
        self.inner.enqueue(&core, payload);
        core.request_flush();
    }

    /// Call `watcher` with every payload, in the effects phase.
    pub fn watch(&self, watcher: impl Fn(&T) + 'static) -> Subscription {
        let index = self.inner.watchers.borrow_mut().insert(Rc::new(watcher));
        Subscription::new(self.token(), index)
    }

    /// Remove a watcher. Returns `false` if the subscription was already
    /// removed or was issued by another node.
    pub fn unwatch(&self, subscription: Subscription) -> bool {
        if subscription.owner() != self.token() {
            warn!("subscription belongs to another node, ignoring unwatch");
            return false;
        }
        self.inner.watchers.borrow_mut().remove(subscription.index())
    }

    /// Install a reducer owned by the caller.
    pub(crate) fn subscribe(&self, reducer: &Rc<Reducer<T>>) {
        self.inner
            .reducers
            .borrow_mut()
            .push(Rc::downgrade(reducer));
    }

    /// A new signal that fires `f(payload)` for every payload of this one.
    pub fn map<U: 'static>(&self, f: impl Fn(&T) -> U + 'static) -> Result<Signal<U>> {
        self.derive(move |payload| Some(f(payload)))
    }

    /// A new signal that fires `f(payload)` whenever it returns `Some`.
    pub fn filter_map<U: 'static>(
        &self,
        f: impl Fn(&T) -> Option<U> + 'static,
    ) -> Result<Signal<U>> {
        self.derive(f)
    }

    /// A new signal that fires the payloads accepted by `predicate`.
    pub fn filter(&self, predicate: impl Fn(&T) -> bool + 'static) -> Result<Signal<T>>
    where
        T: Clone,
    {
        self.derive(move |payload| predicate(payload).then(|| payload.clone()))
    }

    fn derive<U: 'static>(&self, step: impl Fn(&T) -> Option<U> + 'static) -> Result<Signal<U>> {
        let core = self.core()?;
        let derived = Signal::<U>::create(&core)?;

        let target = derived.downgrade();
        let reducer: Rc<Reducer<T>> = Rc::new(move |payload: &T| {
            if let (Some(target), Some(value)) = (target.upgrade(), step(payload)) {
                target.emit(value);
            }
        });
        self.subscribe(&reducer);
        derived.inner.upstream.borrow_mut().push(Box::new(reducer));
        Ok(derived)
    }

    /// Number of live watchers.
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.borrow().live()
    }

    /// Number of live reducers installed on this signal.
    pub fn reducer_count(&self) -> usize {
        self.inner
            .reducers
            .borrow()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Non-owning handle to this signal.
    pub fn downgrade(&self) -> WeakSignal<T> {
        WeakSignal {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Whether two handles refer to the same signal.
    pub fn ptr_eq(&self, other: &Signal<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn token(&self) -> u64 {
        self.inner.owner
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("engine", &self.inner.engine_id)
            .field("watchers", &self.inner.watchers.borrow().live())
            .field("reducers", &self.inner.reducers.borrow().len())
            .finish()
    }
}

/// Non-owning reference to a [`Signal`].
pub struct WeakSignal<T> {
    inner: Weak<SignalInner<T>>,
}

impl<T> WeakSignal<T> {
    /// The signal, if it is still alive.
    pub fn upgrade(&self) -> Option<Signal<T>> {
        self.inner.upgrade().map(|inner| Signal { inner })
    }
}

impl<T> Clone for WeakSignal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

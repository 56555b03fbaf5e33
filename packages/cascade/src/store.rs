//! State cells.
//!
//! A [`Store`] holds a current, previous and initial value. Reducers installed
//! with [`Store::on`] update it during the pure phase; watchers see the merged
//! result once per notification round, in the effects phase.
//!
//! # Dirty tracking
//!
//! ```text
//! set / reducer ──► value changed ──► already pending this tick? ──yes──► done
//!                                            │ no
//!                                            ▼
//!                                  engine.mark_dirty(index)
//!                                            │
//!                     effects phase ◄────────┘
//!                          │
//!                          ▼
//!   notify_if_dirty: clear flag ──► watchers ──► companion `updates` signal
//! ```
//!
//! A cell only gets a dirty-registry index once something observes it
//! (`watch` or `updates`). Unobserved cells still track their value but
//! never cost a notification.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{trace, warn};

use crate::engine::{DirtyNode, EngineCore, OwnedNode};
use crate::error::{ReactiveError, Result};
use crate::signal::{Reducer, Signal};
use crate::slots::{call_each, next_owner, Slots, Subscription};
use crate::tick::{EngineId, TickId};

struct CellState<T> {
    value: T,
    prev: T,
    initial: T,
    dirty: bool,
    last_dirty_tick: TickId,
}

pub(crate) struct StoreInner<T> {
    engine: Weak<EngineCore>,
    engine_id: EngineId,
    /// Owner token stamped on every subscription this node issues.
    owner: u64,
    state: RefCell<CellState<T>>,
    dirty_index: Cell<Option<usize>>,
    watchers: RefCell<Slots<dyn Fn(&T)>>,
    updates: RefCell<Option<Signal<T>>>,
    /// Reducer closures this cell installed on signals. Dropping them
    /// unsubscribes the cell everywhere.
    reducers: RefCell<Vec<Box<dyn Any>>>,
}

impl<T: Clone + 'static> StoreInner<T> {
    fn live_engine(&self, op: &'static str) -> Option<Rc<EngineCore>> {
        match self.engine.upgrade() {
            Some(core) if !core.is_torn_down() => Some(core),
            _ => {
                warn!(op, "store belongs to a torn-down engine, ignoring");
                None
            }
        }
    }

    /// Replace the value and mark the cell dirty.
    fn write(&self, core: &EngineCore, value: T) {
        let tick = core.tick();
        let already_pending = {
            let mut state = self.state.borrow_mut();
            state.prev = std::mem::replace(&mut state.value, value);
            let already = state.dirty && state.last_dirty_tick == tick;
            state.dirty = true;
            state.last_dirty_tick = tick;
            already
        };

        match self.dirty_index.get() {
            Some(index) if !already_pending => core.mark_dirty(index),
            Some(_) => trace!(%tick, "cell already pending this tick"),
            None => {}
        }
    }

    /// Apply a reducer result from inside a pure thunk.
    fn apply(&self, value: T) {
        if let Some(core) = self.engine.upgrade() {
            self.write(&core, value);
        }
    }

    fn ensure_registered(self: &Rc<Self>) {
        if self.dirty_index.get().is_some() {
            return;
        }
        let Some(core) = self.live_engine("register") else {
            return;
        };
        let node: Weak<dyn DirtyNode> = Rc::downgrade(self) as Weak<dyn DirtyNode>;
        let index = core.register_dirty(node);
        self.dirty_index.set(Some(index));
        // Changes made before anyone was looking are not notified.
        self.state.borrow_mut().dirty = false;
        trace!(index, "cell registered for dirty notification");
    }

    fn own_reducer(&self, reducer: Box<dyn Any>) -> Result<()> {
        let mut reducers = self.reducers.borrow_mut();
        reducers
            .try_reserve(1)
            .map_err(ReactiveError::alloc("installing a reducer"))?;
        reducers.push(reducer);
        Ok(())
    }
}

impl<T: Clone + 'static> DirtyNode for StoreInner<T> {
    fn notify_if_dirty(&self) -> bool {
        let value = {
            let mut state = self.state.borrow_mut();
            if !state.dirty {
                return false;
            }
            state.dirty = false;
            state.value.clone()
        };

        call_each(&self.watchers, &value);

        let companion = self.updates.borrow().clone();
        if let Some(companion) = companion {
            companion.emit(value);
        }
        true
    }
}

impl<T: 'static> OwnedNode for StoreInner<T> {
    fn teardown(&self) {
        self.watchers.borrow_mut().clear();
        self.reducers.borrow_mut().clear();
        if let Some(companion) = self.updates.borrow_mut().take() {
            companion.teardown();
        }
    }

    fn kind(&self) -> &'static str {
        "store"
    }
}

/// A state cell holding a value of type `T`.
///
/// Handles are cheap to clone; every clone refers to the same cell.
pub struct Store<T> {
    inner: Rc<StoreInner<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> Store<T> {
    /// Create a cell owned by the engine.
    pub(crate) fn create(core: &Rc<EngineCore>, initial: T) -> Result<Self> {
        let store = Self::detached(Rc::downgrade(core), core.id(), initial);
        core.adopt(store.inner.clone())?;
        Ok(store)
    }

    /// Create a cell owned by another node.
    pub(crate) fn detached(engine: Weak<EngineCore>, engine_id: EngineId, initial: T) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                engine,
                engine_id,
                owner: next_owner(),
                state: RefCell::new(CellState {
                    value: initial.clone(),
                    prev: initial.clone(),
                    initial,
                    dirty: false,
                    last_dirty_tick: TickId::NEVER,
                }),
                dirty_index: Cell::new(None),
                watchers: RefCell::new(Slots::new()),
                updates: RefCell::new(None),
                reducers: RefCell::new(Vec::new()),
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

    /// Id of the engine this cell belongs to.
    pub fn engine_id(&self) -> EngineId {
        self.inner.engine_id
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.inner.state.borrow().value.clone()
    }

    /// Value before the most recent change.
    pub fn prev(&self) -> T {
        self.inner.state.borrow().prev.clone()
    }

    /// Value the cell was created with.
    pub fn initial(&self) -> T {
        self.inner.state.borrow().initial.clone()
    }

    /// Replace the value.
    ///
    /// Always marks the cell dirty, even when `value` equals the current one.
    pub fn set(&self, value: T) {
        let Some(core) = self.inner.live_engine("set") else {
            return;
        };
        self.inner.write(&core, value);
        core.request_flush();
    }

    /// Restore the initial value.
    pub fn reinit(&self) {
        self.set(self.initial());
    }

    /// Update the cell whenever `signal` fires.
    ///
    /// `reduce` receives the current value and the payload. Returning `None`
    /// skips the update entirely: the value stays and no watcher runs.
    pub fn on<P: 'static>(
        &self,
        signal: &Signal<P>,
        reduce: impl Fn(&T, &P) -> Option<T> + 'static,
    ) -> Result<&Self> {
        self.install(signal, move |cell, payload| {
            let current = cell.state.borrow().value.clone();
            reduce(&current, payload)
        })
    }

    /// Restore the initial value whenever `signal` fires. The payload is
    /// ignored and the cell is always marked dirty.
    pub fn reset<P: 'static>(&self, signal: &Signal<P>) -> Result<&Self> {
        self.install(signal, |cell, _| Some(cell.state.borrow().initial.clone()))
    }

    fn install<P: 'static>(
        &self,
        signal: &Signal<P>,
        step: impl Fn(&StoreInner<T>, &P) -> Option<T> + 'static,
    ) -> Result<&Self> {
        let core = self.core()?;
        core.ensure_same(signal.engine_id())?;

        let cell = Rc::downgrade(&self.inner);
        let reducer: Rc<Reducer<P>> = Rc::new(move |payload: &P| {
            let Some(cell) = cell.upgrade() else {
                return;
            };
            if let Some(next) = step(&cell, payload) {
                cell.apply(next);
            }
        });
        self.inner.own_reducer(Box::new(reducer.clone()))?;
        signal.subscribe(&reducer);
        Ok(self)
    }

    /// Companion signal firing the new value after every notification.
    ///
    /// Created on first use.
    pub fn updates(&self) -> Signal<T> {
        if let Some(existing) = self.inner.updates.borrow().as_ref() {
            return existing.clone();
        }
        let companion = Signal::detached(self.inner.engine.clone(), self.inner.engine_id);
        *self.inner.updates.borrow_mut() = Some(companion.clone());
        self.inner.ensure_registered();
        companion
    }

    /// Call `watcher` with the value after each notification round in which
    /// the cell changed.
    pub fn watch(&self, watcher: impl Fn(&T) + 'static) -> Subscription {
        self.inner.ensure_registered();
        let index = self.inner.watchers.borrow_mut().insert(Rc::new(watcher));
        Subscription::new(self.token(), index)
    }

    /// Remove a watcher. Returns `false` if it was already removed or was
    /// issued by another node.
    pub fn unwatch(&self, subscription: Subscription) -> bool {
        if subscription.owner() != self.token() {
            warn!("subscription belongs to another node, ignoring unwatch");
            return false;
        }
        self.inner.watchers.borrow_mut().remove(subscription.index())
    }

    /// A derived cell holding `f(value)`, kept up to date through
    /// [`updates`](Self::updates).
    pub fn map<U: Clone + 'static>(&self, f: impl Fn(&T) -> U + 'static) -> Result<Store<U>> {
        let core = self.core()?;
        let derived = Store::create(&core, f(&self.get()))?;
        derived.on(&self.updates(), move |_, value| Some(f(value)))?;
        Ok(derived)
    }

    /// Number of live watchers.
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.borrow().live()
    }

    /// Whether the cell changed since its last notification.
    pub fn is_dirty(&self) -> bool {
        self.inner.state.borrow().dirty
    }

    /// Non-owning handle to this cell.
    pub fn downgrade(&self) -> WeakStore<T> {
        WeakStore {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Whether two handles refer to the same cell.
    pub fn ptr_eq(&self, other: &Store<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn token(&self) -> u64 {
        self.inner.owner
    }
}

impl<T: fmt::Debug> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Store")
            .field("engine", &self.inner.engine_id)
            .field("value", &state.value)
            .field("dirty", &state.dirty)
            .field("watchers", &self.inner.watchers.borrow().live())
            .finish()
    }
}

/// Non-owning reference to a [`Store`].
pub struct WeakStore<T> {
    inner: Weak<StoreInner<T>>,
}

impl<T> WeakStore<T> {
    /// The cell, if it is still alive.
    pub fn upgrade(&self) -> Option<Store<T>> {
        self.inner.upgrade().map(|inner| Store { inner })
    }
}

impl<T> Clone for WeakStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

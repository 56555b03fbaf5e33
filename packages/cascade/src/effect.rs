//! Effects - fallible handlers wired into the graph.
//!
//! An [`Effect`] wraps a handler `Fn(P) -> Result<R, E>` and exposes its
//! outcome as graph nodes:
//!
//! ```text
//! run(p) ──► pure:    in_flight += 1, pending = true
//!        └─► effects: handler(p)
//!                        │
//!                        ├─ in_flight -= 1, pending = in_flight > 0
//!                        │
//!                        ├─ Ok(r)  ──► done(Done { p, r })  ──► settled(Settled::Done)
//!                        └─ Err(e) ──► fail(Fail { p, e })  ──► settled(Settled::Fail)
//! ```
//!
//! # Error Boundary
//!
//! Handler errors are payloads on `fail` and `settled`. The engine never
//! inspects them.
//!
//! # Pending
//!
//! `pending` drops back to `false` *before* `done`/`fail` fire, so a watcher
//! on `done` already observes the effect as idle when no other run is in
//! flight. Overlapping runs are independent; `pending` stays `true` until the
//! last of them finishes.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::engine::{EngineCore, OwnedNode};
use crate::error::Result;
use crate::signal::Signal;
use crate::store::Store;
use crate::tick::EngineId;

/// Payload of an effect's `done` signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Done<P, R> {
    /// Params the run was started with.
    pub params: P,
    /// Value the handler returned.
    pub result: R,
}

/// Payload of an effect's `fail` signal.
///
/// The error is shared so that every subscriber sees the same value without
/// requiring `E: Clone`.
#[derive(Debug)]
pub struct Fail<P, E> {
    /// Params the run was started with.
    pub params: P,
    /// Error the handler returned.
    pub error: Rc<E>,
}

impl<P: Clone, E> Clone for Fail<P, E> {
    fn clone(&self) -> Self {
        Self {
            params: self.params.clone(),
            error: self.error.clone(),
        }
    }
}

/// Payload of an effect's `settled` signal: either outcome.
#[derive(Debug)]
pub enum Settled<P, R, E> {
    /// The handler returned `Ok`.
    Done(Done<P, R>),
    /// The handler returned `Err`.
    Fail(Fail<P, E>),
}

impl<P: Clone, R: Clone, E> Clone for Settled<P, R, E> {
    fn clone(&self) -> Self {
        match self {
            Settled::Done(done) => Settled::Done(done.clone()),
            Settled::Fail(fail) => Settled::Fail(fail.clone()),
        }
    }
}

impl<P, R, E> Settled<P, R, E> {
    /// Params of the run, whichever way it ended.
    pub fn params(&self) -> &P {
        match self {
            Settled::Done(done) => &done.params,
            Settled::Fail(fail) => &fail.params,
        }
    }

    /// Whether the run succeeded.
    pub fn is_done(&self) -> bool {
        matches!(self, Settled::Done(_))
    }
}

type Handler<P, R, E> = Rc<dyn Fn(P) -> Result<R, E>>;

struct EffectInner<P, R, E> {
    engine: Weak<EngineCore>,
    engine_id: EngineId,
    handler: RefCell<Option<Handler<P, R, E>>>,
    done: Signal<Done<P, R>>,
    fail: Signal<Fail<P, E>>,
    settled: Signal<Settled<P, R, E>>,
    pending: Store<bool>,
    in_flight: Store<usize>,
    runs: Cell<u64>,
}

impl<P, R, E> EffectInner<P, R, E>
where
    P: Clone + 'static,
    R: Clone + 'static,
    E: 'static,
{
    fn begin(&self) {
        self.in_flight.set(self.in_flight.get() + 1);
        self.pending.set(true);
    }

    fn execute(&self, params: P) {
        let Some(handler) = self.handler.borrow().clone() else {
            return;
        };
        let outcome = handler(params.clone());

        let remaining = self.in_flight.get().saturating_sub(1);
        self.in_flight.set(remaining);
        self.pending.set(remaining > 0);

        match outcome {
            Ok(result) => {
                debug!(remaining, "effect done");
                let done = Done { params, result };
                self.done.emit(done.clone());
                self.settled.emit(Settled::Done(done));
            }
            Err(error) => {
                debug!(remaining, "effect failed");
                let fail = Fail {
                    params,
                    error: Rc::new(error),
                };
                self.fail.emit(fail.clone());
                self.settled.emit(Settled::Fail(fail));
            }
        }
    }
}

impl<P, R, E> OwnedNode for EffectInner<P, R, E>
where
    P: Clone + 'static,
    R: Clone + 'static,
    E: 'static,
{
    fn teardown(&self) {
        self.handler.borrow_mut().take();
        self.done.teardown();
        self.fail.teardown();
        self.settled.teardown();
        self.pending.teardown();
        self.in_flight.teardown();
    }

    fn kind(&self) -> &'static str {
        "effect"
    }
}

/// A fallible handler whose outcome is published on signals.
///
/// # Example
///
/// ```ignore
/// let fetch = engine.effect(|id: u32| -> anyhow::Result<String> {
///     lookup(id).context("lookup failed")
/// })?;
///
/// fetch.done().watch(|d| println!("{} => {}", d.params, d.result));
/// fetch.fail().watch(|f| eprintln!("{} failed: {}", f.params, f.error));
/// fetch.run(7);
/// ```
pub struct Effect<P, R, E> {
    inner: Rc<EffectInner<P, R, E>>,
}

impl<P, R, E> Clone for Effect<P, R, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P, R, E> Effect<P, R, E>
where
    P: Clone + 'static,
    R: Clone + 'static,
    E: 'static,
{
    pub(crate) fn create<F>(core: &Rc<EngineCore>, handler: F) -> crate::error::Result<Self>
    where
        F: Fn(P) -> Result<R, E> + 'static,
    {
        let engine = Rc::downgrade(core);
        let id = core.id();
        let handler: Handler<P, R, E> = Rc::new(handler);
        let inner = Rc::new(EffectInner {
            handler: RefCell::new(Some(handler)),
            done: Signal::detached(engine.clone(), id),
            fail: Signal::detached(engine.clone(), id),
            settled: Signal::detached(engine.clone(), id),
            pending: Store::detached(engine.clone(), id, false),
            in_flight: Store::detached(engine.clone(), id, 0),
            runs: Cell::new(0),
            engine,
            engine_id: id,
        });
        core.adopt(inner.clone())?;
        Ok(Self { inner })
    }

    /// Invoke the handler with `params` in the effects phase.
    ///
    /// Runs a full tick when called at top level. Calling `run` again before
    /// the first call settles starts a second, independent invocation.
    pub fn run(&self, params: P) {
        let core = match self.inner.engine.upgrade() {
            Some(core) if !core.is_torn_down() => core,
            _ => {
                warn!("effect belongs to a torn-down engine, ignoring run");
                return;
            }
        };
        self.inner.runs.set(self.inner.runs.get() + 1);

        let node = Rc::downgrade(&self.inner);
        core.schedule_pure(Box::new({
            let node = node.clone();
            move || {
                if let Some(node) = node.upgrade() {
                    node.begin();
                }
            }
        }));
        core.schedule_effect(Box::new(move || {
            if let Some(node) = node.upgrade() {
                node.execute(params);
            }
        }));
        core.request_flush();
    }

    /// Fires with params and result after every successful run.
    pub fn done(&self) -> Signal<Done<P, R>> {
        self.inner.done.clone()
    }

    /// Fires with params and error after every failed run.
    pub fn fail(&self) -> Signal<Fail<P, E>> {
        self.inner.fail.clone()
    }

    /// Fires after `done` or `fail`, for every run.
    pub fn settled(&self) -> Signal<Settled<P, R, E>> {
        self.inner.settled.clone()
    }

    /// `true` while at least one run has not finished.
    pub fn pending(&self) -> Store<bool> {
        self.inner.pending.clone()
    }

    /// Number of runs started but not finished.
    pub fn in_flight(&self) -> Store<usize> {
        self.inner.in_flight.clone()
    }

    /// Total number of accepted `run` calls.
    pub fn runs(&self) -> u64 {
        self.inner.runs.get()
    }

    /// Id of the engine this effect belongs to.
    pub fn engine_id(&self) -> EngineId {
        self.inner.engine_id
    }
}

impl<P, R, E> fmt::Debug for Effect<P, R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("engine", &self.inner.engine_id)
            .field("runs", &self.inner.runs.get())
            .finish_non_exhaustive()
    }
}

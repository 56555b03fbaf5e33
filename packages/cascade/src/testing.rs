//! Testing utilities for reactive graphs.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! cascade = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Quick Start
//!
//! ## Recording what watchers see
//!
//! ```ignore
//! use cascade::testing::Recorder;
//!
//! let seen = Recorder::new();
//! seen.watch_store(&total);
//!
//! add.emit(2);
//! add.emit(3);
//!
//! assert_eq!(seen.values(), vec![2, 5]);
//! ```
//!
//! ## Using `assert_recorded!`
//!
//! ```ignore
//! assert_recorded!(seen,
//!     add.emit(2) => [2],
//!     add.emit(3) => [5],
//!     clear.emit(()) => [0],
//! );
//! ```
//!
//! ## Counting calls
//!
//! ```ignore
//! use cascade::testing::CallLatch;
//!
//! let latch = CallLatch::new(2);
//! effect.settled().watch({
//!     let latch = latch.clone();
//!     move |_| latch.dec()
//! });
//! effect.run(1);
//! effect.run(2);
//! assert!(latch.is_complete());
//! ```

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::signal::Signal;
use crate::slots::Subscription;
use crate::store::Store;

/// Asserts what a [`Recorder`] captures for each step.
///
/// Each step runs an expression, then checks the values recorded since the
/// previous step.
///
/// # Panics
///
/// Panics if any step records something other than the expected values.
#[macro_export]
macro_rules! assert_recorded {
    ($recorder:expr, $($step:expr => [$($expected:expr),* $(,)?]),+ $(,)?) => {
        $(
            $step;
            let actual = $recorder.take();
            let expected = vec![$($expected),*];
            assert_eq!(
                actual, expected,
                "Unexpected values after `{}`\n  expected: {:?}\n  actual: {:?}",
                stringify!($step), expected, actual
            );
        )+
    };
}

pub use crate::assert_recorded;

/// Collects every value a watcher receives.
///
/// Clones share the same buffer.
#[derive(Debug)]
pub struct Recorder<T> {
    values: Rc<RefCell<Vec<T>>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            values: self.values.clone(),
        }
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            values: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl<T: Clone + 'static> Recorder<T> {
    /// An empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback that appends its argument to this recorder.
    pub fn callback(&self) -> impl Fn(&T) + 'static {
        let values = self.values.clone();
        move |value: &T| values.borrow_mut().push(value.clone())
    }

    /// Record every payload of `signal`.
    pub fn watch_signal(&self, signal: &Signal<T>) -> Subscription {
        signal.watch(self.callback())
    }

    /// Record every notified value of `store`.
    pub fn watch_store(&self, store: &Store<T>) -> Subscription {
        store.watch(self.callback())
    }

    /// Everything recorded so far.
    pub fn values(&self) -> Vec<T> {
        self.values.borrow().clone()
    }

    /// Everything recorded so far, clearing the buffer.
    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.values.borrow_mut())
    }

    /// Most recent value, if any.
    pub fn last(&self) -> Option<T> {
        self.values.borrow().last().cloned()
    }

    /// Number of values recorded.
    pub fn len(&self) -> usize {
        self.values.borrow().len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.values.borrow().is_empty()
    }
}

/// Countdown of expected callback invocations.
///
/// Everything runs synchronously, so there is nothing to wait for: assert
/// [`is_complete`](Self::is_complete) after the triggering call returns.
/// Clones share the same counter.
#[derive(Debug, Clone)]
pub struct CallLatch {
    remaining: Rc<Cell<usize>>,
}

impl CallLatch {
    /// Create a latch expecting `expected` calls.
    pub fn new(expected: usize) -> Self {
        Self {
            remaining: Rc::new(Cell::new(expected)),
        }
    }

    /// Record one call.
    ///
    /// # Panics
    ///
    /// Panics if called more times than expected.
    pub fn dec(&self) {
        let prev = self.remaining.get();
        if prev == 0 {
            panic!("CallLatch decremented below zero - more calls than expected");
        }
        self.remaining.set(prev - 1);
    }

    pub fn remaining(&self) -> usize {
        self.remaining.get()
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }
}

//! Index-stable watcher storage.
//!
//! Watchers live in a vector of optional entries. Unwatching clears a slot
//! instead of shifting the vector, so every outstanding [`Subscription`]
//! keeps pointing at the same callback.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Identity for a node that issues subscriptions. Never handed out twice in
/// one process, so a subscription outliving its node matches no other node.
pub(crate) fn next_owner() -> u64 {
    NEXT_OWNER.fetch_add(1, Ordering::Relaxed)
}

/// Handle returned by `watch`, used to `unwatch` later.
///
/// A subscription remembers which node issued it; passing it to a different
/// node's `unwatch` is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    owner: u64,
    index: usize,
}

impl Subscription {
    pub(crate) fn new(owner: u64, index: usize) -> Self {
        Self { owner, index }
    }

    /// Slot index of this subscription within its node.
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn owner(&self) -> u64 {
        self.owner
    }
}

/// Sparse, append-only list of callbacks.
pub(crate) struct Slots<F: ?Sized> {
    entries: Vec<Option<Rc<F>>>,
    live: usize,
}

impl<F: ?Sized> Slots<F> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            live: 0,
        }
    }

    pub(crate) fn insert(&mut self, callback: Rc<F>) -> usize {
        self.entries.push(Some(callback));
        self.live += 1;
        self.entries.len() - 1
    }

    /// Clear a slot. Returns `false` if it was already empty or never existed.
    pub(crate) fn remove(&mut self, index: usize) -> bool {
        match self.entries.get_mut(index) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                self.live -= 1;
                true
            }
            _ => false,
        }
    }

    /// Callback currently in `index`, if any.
    pub(crate) fn get(&self, index: usize) -> Option<Rc<F>> {
        self.entries.get(index)?.clone()
    }

    /// Number of slots ever handed out, including cleared ones.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn live(&self) -> usize {
        self.live
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.live = 0;
    }
}

/// Invoke every watcher present at call time with `value`.
///
/// Slots are read one at a time, so a watcher removed by an earlier watcher
/// in the same round is skipped. Watchers added during the round wait for the
/// next one.
pub(crate) fn call_each<T: ?Sized>(slots: &RefCell<Slots<dyn Fn(&T)>>, value: &T) {
    let len = slots.borrow().len();
    for index in 0..len {
        let watcher = slots.borrow().get(index);
        if let Some(watcher) = watcher {
            watcher(value);
        }
    }
}

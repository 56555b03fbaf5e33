//! Deferred work queues drained by the engine.

use std::cell::RefCell;
use std::collections::TryReserveError;

/// A unit of deferred work.
pub type Thunk = Box<dyn FnOnce()>;

/// FIFO of thunks drained in snapshot passes.
///
/// A pass takes everything queued so far and runs exactly that; thunks
/// pushed while the pass runs land in the next pass. Two buffers are swapped
/// back and forth so the queue stops allocating once it has seen its peak.
pub(crate) struct ThunkQueue {
    name: &'static str,
    pending: RefCell<Vec<Thunk>>,
    spare: RefCell<Vec<Thunk>>,
}

impl ThunkQueue {
    pub(crate) fn with_capacity(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            pending: RefCell::new(Vec::with_capacity(capacity)),
            spare: RefCell::new(Vec::with_capacity(capacity)),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn push(&self, thunk: Thunk) -> Result<(), TryReserveError> {
        let mut pending = self.pending.borrow_mut();
        pending.try_reserve(1)?;
        pending.push(thunk);
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Run one snapshot pass. Returns how many thunks ran.
    pub(crate) fn drain_pass(&self) -> usize {
        let mut batch = std::mem::take(&mut *self.spare.borrow_mut());
        std::mem::swap(&mut batch, &mut *self.pending.borrow_mut());

        let ran = batch.len();
        for thunk in batch.drain(..) {
            thunk();
        }

        let mut spare = self.spare.borrow_mut();
        if batch.capacity() > spare.capacity() {
            *spare = batch;
        }
        ran
    }

    /// Drop everything queued without running it. Returns how many were dropped.
    pub(crate) fn discard(&self) -> usize {
        let dropped: Vec<Thunk> = self.pending.borrow_mut().drain(..).collect();
        dropped.len()
    }
}

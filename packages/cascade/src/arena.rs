//! Per-tick payload storage.
//!
//! Every emitted payload that has to outlive the `emit` call (because
//! reducers and watchers run later, from the engine's queues) is moved into
//! the [`TickArena`] once and handed to scheduled thunks as an [`ArenaKey`].
//!
//! # Invariants
//!
//! 1. A key is only readable during the tick that created it. Reading a key
//!    from an earlier tick yields `None`.
//! 2. `reset` drops every payload but keeps the slot capacity, so a steady
//!    stream of emits settles at a fixed footprint.

use std::any::Any;
use std::collections::TryReserveError;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::tick::TickId;

/// Typed handle to a payload stored in the tick arena.
pub(crate) struct ArenaKey<T> {
    tick: TickId,
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ArenaKey<T> {
    /// Tick the payload was stored in.
    pub(crate) fn tick(&self) -> TickId {
        self.tick
    }
}

impl<T> Clone for ArenaKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ArenaKey<T> {}

impl<T> fmt::Debug for ArenaKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaKey")
            .field("tick", &self.tick)
            .field("index", &self.index)
            .finish()
    }
}

/// Transient payload region, reset at the end of every flush.
pub(crate) struct TickArena {
    tick: TickId,
    slots: Vec<Rc<dyn Any>>,
    high_water: usize,
}

impl TickArena {
    pub(crate) fn with_capacity(capacity: usize, tick: TickId) -> Self {
        Self {
            tick,
            slots: Vec::with_capacity(capacity),
            high_water: 0,
        }
    }

    pub(crate) fn alloc<T: 'static>(&mut self, value: T) -> Result<ArenaKey<T>, TryReserveError> {
        self.slots.try_reserve(1)?;
        let index = self.slots.len();
        self.slots.push(Rc::new(value));
        Ok(ArenaKey {
            tick: self.tick,
            index,
            _marker: PhantomData,
        })
    }

    pub(crate) fn get<T: 'static>(&self, key: ArenaKey<T>) -> Option<Rc<T>> {
        if key.tick() != self.tick {
            return None;
        }
        self.slots.get(key.index)?.clone().downcast::<T>().ok()
    }

    /// Drop every payload and start accepting payloads for `next`.
    pub(crate) fn reset(&mut self, next: TickId) {
        self.high_water = self.high_water.max(self.slots.len());
        self.slots.clear();
        self.tick = next;
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Largest number of payloads held by a single tick so far.
    pub(crate) fn high_water(&self) -> usize {
        self.high_water.max(self.slots.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_read_back() {
        let mut arena = TickArena::with_capacity(4, TickId::FIRST);
        let a = arena.alloc(7_i32).unwrap();
        let b = arena.alloc(String::from("seven")).unwrap();

        assert_eq!(*arena.get(a).unwrap(), 7);
        assert_eq!(arena.get(b).unwrap().as_str(), "seven");
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_key_from_previous_tick_is_unreadable() {
        let mut arena = TickArena::with_capacity(4, TickId::FIRST);
        let key = arena.alloc(1_u8).unwrap();
        assert_eq!(key.tick(), TickId::FIRST);
        arena.reset(TickId::FIRST.next());

        assert!(arena.get(key).is_none());
        // A new payload in the reused slot must not leak through the old key.
        let _ = arena.alloc(2_u8).unwrap();
        assert!(arena.get(key).is_none());
    }

    #[test]
    fn test_reset_keeps_capacity_and_tracks_high_water() {
        let mut arena = TickArena::with_capacity(0, TickId::FIRST);
        for i in 0..100 {
            arena.alloc(i).unwrap();
        }
        let capacity = arena.capacity();
        arena.reset(TickId::FIRST.next());

        assert_eq!(arena.len(), 0);
        assert_eq!(arena.capacity(), capacity);
        assert_eq!(arena.high_water(), 100);
    }

    #[test]
    fn test_payload_dropped_on_reset() {
        let payload = Rc::new(());
        let mut arena = TickArena::with_capacity(1, TickId::FIRST);
        arena.alloc(payload.clone()).unwrap();
        assert_eq!(Rc::strong_count(&payload), 2);

        arena.reset(TickId::FIRST.next());
        assert_eq!(Rc::strong_count(&payload), 1);
    }
}

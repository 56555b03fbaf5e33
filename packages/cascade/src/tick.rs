//! Tick counter, engine phase and engine identity.

use std::fmt;

use uuid::Uuid;

/// Identifier of one flush round.
///
/// Advances with wrapping arithmetic and never lands on [`TickId::NEVER`],
/// which state cells use as their "never dirtied" marker.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TickId(u32);

impl TickId {
    /// Reserved sentinel. No tick ever carries this id.
    pub const NEVER: TickId = TickId(u32::MAX);

    /// The tick a fresh engine starts in.
    pub const FIRST: TickId = TickId(0);

    #[cfg(test)]
    pub(crate) const fn from_raw(raw: u32) -> Self {
        TickId(raw)
    }

    /// Raw counter value.
    pub fn get(self) -> u32 {
        self.0
    }

    /// The id following this one, skipping the sentinel.
    pub fn next(self) -> TickId {
        let next = self.0.wrapping_add(1);
        if next == Self::NEVER.0 {
            TickId(next.wrapping_add(1))
        } else {
            TickId(next)
        }
    }
}

impl fmt::Debug for TickId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::NEVER {
            write!(f, "TickId(NEVER)")
        } else {
            write!(f, "TickId({})", self.0)
        }
    }
}

impl fmt::Display for TickId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tick#{}", self.0)
    }
}

/// Scheduler phase.
///
/// Transitions are driven by [`Engine::flush`](crate::Engine::flush) only.
/// Code outside a flush always observes [`Phase::Idle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Phase {
    /// No flush in progress.
    Idle,
    /// Reducer-driven state transitions are running.
    Pure,
    /// Dirty-cell notifications, watchers and effect handlers are running.
    Effects,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Pure => write!(f, "pure"),
            Phase::Effects => write!(f, "effects"),
        }
    }
}

/// Unique identity of an engine instance.
///
/// Every node records the id of the engine it was built in, so operators can
/// reject wiring nodes of two engines together.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct EngineId(Uuid);

impl EngineId {
    /// Generate a new random engine id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EngineId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

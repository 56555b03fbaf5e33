//! # Cascade
//!
//! A single-threaded reactive dataflow runtime: signals fire, stores hold
//! state, pure reducers connect them, and watchers only ever observe a fully
//! settled graph.
//!
//! ## Core Concepts
//!
//! - [`Signal`] = an event carrying a payload
//! - [`Store`] = a state cell updated by reducers
//! - [`Effect`] = a fallible handler publishing `done` / `fail` / `settled`
//! - [`Sample`], [`Guard`], [`forward`], [`restore`] = operators wiring new
//!   nodes into the graph
//!
//! ## Architecture
//!
//! ```text
//! emit() / set() / run()
//!     │
//!     ▼
//! Engine (idle?) ──► flush
//!     │
//!     ├─► pure phase ── reducers, wires, derived signals
//!     │        │
//!     │        ▼ stores changed
//!     ├─► effects phase ── notify dirty stores (watchers, updates signals)
//!     │        │
//!     │        └─► effect queue (signal watchers, effect handlers)
//!     │                 │
//!     └─────────────────┘  until nothing is queued, then tick += 1
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Reducers are pure** - they return the next value (or `None`) and
//!    never run side effects
//! 2. **Watchers see settled state** - every reducer queued so far has run
//!    before any watcher is called
//! 3. **One notification per change round** - a store changed N times before
//!    its watchers run notifies them once
//! 4. **No re-entrant flush** - mutations inside a tick only enqueue
//! 5. **The engine owns the graph** - dropping it tears every node down
//!
//! ## Example
//!
//! ```ignore
//! use cascade::{Engine, Sample, restore};
//!
//! let engine = Engine::new();
//!
//! let inc = engine.signal::<i32>()?;
//! let count = engine.store(1)?;
//! count.on(&inc, |c, n| Some(c + n))?;
//!
//! let doubled = engine.store(0)?;
//! Sample::new(&inc, &count).map(|x| x * 2).target(&doubled).build()?;
//!
//! inc.emit(3);
//! assert_eq!(count.get(), 4);
//! assert_eq!(doubled.get(), 8);
//!
//! let save = engine.effect(|n: i32| -> anyhow::Result<()> { persist(n) })?;
//! count.watch(move |n| save.run(*n));
//! ```

mod arena;
mod effect;
mod engine;
mod error;
mod operators;
mod queue;
mod signal;
mod slots;
mod store;
mod tick;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Stress tests (test-only)
#[cfg(test)]
mod stress_tests;

// Re-export engine types (primary entry point)
pub use engine::{Engine, EngineBuilder, EngineConfig, EngineStats};

// Re-export node types
pub use signal::{Signal, WeakSignal};
pub use slots::Subscription;
pub use store::{Store, WeakStore};

// Re-export operators
pub use operators::{forward, restore, Guard, Sample, Snapshot, Source, Unit, WireBuilder};

// Re-export effect types
pub use effect::{Done, Effect, Fail, Settled};

// Re-export error types
pub use error::{ReactiveError, Result};

// Re-export scheduling types
pub use queue::Thunk;
pub use tick::{EngineId, Phase, TickId};

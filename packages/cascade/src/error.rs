//! Structured error type for graph construction.
//!
//! `ReactiveError` provides pattern-matchable errors instead of panics or
//! generic boxed errors. Only graph *construction* is fallible: building a
//! node, installing a reducer or wiring an operator.
//!
//! # The Error Boundary Rule
//!
//! > **Handler failures are data, not engine errors.**
//!
//! - An [`Effect`](crate::Effect) handler that returns `Err` produces a
//!   [`Fail`](crate::Fail) payload on the effect's `fail` and `settled`
//!   signals. The engine routes it and never inspects it.
//! - `ReactiveError` is reserved for misconfigured graphs and resource
//!   exhaustion, surfaced at the call that builds the graph.
//!
//! # Example
//!
//! ```ignore
//! use cascade::{Engine, Guard, ReactiveError};
//!
//! let engine = Engine::new();
//! let inc = engine.signal::<i32>()?;
//!
//! match Guard::clock(&inc).build() {
//!     Err(ReactiveError::MissingFilter) => eprintln!("guard needs a filter"),
//!     Err(other) => eprintln!("wiring failed: {other}"),
//!     Ok(_) => unreachable!(),
//! }
//! ```

use std::collections::TryReserveError;

use thiserror::Error;

use crate::tick::EngineId;

/// Result alias used by every fallible construction call.
///
/// The second parameter defaults to [`ReactiveError`] but can be overridden,
/// which is how effect handlers spell `Result<R, E>` with their own error.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Errors raised while building or extending a reactive graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A node or queue could not grow.
    #[error("allocation failed while {context}")]
    Alloc {
        /// What the engine was trying to allocate.
        context: &'static str,
    },

    /// The owning engine was dropped or torn down.
    #[error("engine has been torn down")]
    EngineDropped,

    /// Two operands of one operator belong to different engines.
    #[error("cannot wire nodes of engine {found} into engine {expected}")]
    ForeignEngine {
        /// Engine that owns the trigger of the wire.
        expected: EngineId,
        /// Engine that owns the offending operand.
        found: EngineId,
    },

    /// A guard was built without a filter.
    #[error("guard requires a filter")]
    MissingFilter,

    /// No clock was given and the source exposes no updates signal.
    #[error("sample needs a clock or a source with an updates signal")]
    MissingTrigger,

    /// `to_signal` was called on a builder that already has a target.
    #[error("builder already delivers to an explicit target")]
    TargetConflict,
}

impl ReactiveError {
    pub(crate) fn alloc(context: &'static str) -> impl FnOnce(TryReserveError) -> Self {
        move |_| ReactiveError::Alloc { context }
    }

    /// Returns `true` for errors caused by graph misconfiguration rather than
    /// by the engine's lifecycle or resources.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ReactiveError::ForeignEngine { .. }
                | ReactiveError::MissingFilter
                | ReactiveError::MissingTrigger
                | ReactiveError::TargetConflict
        )
    }
}

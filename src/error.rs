//! Runtime errors surfaced by the engine.

use crate::core::StateId;
use crate::registry::BuildError;
use crate::store::StoreError;
use thiserror::Error;

/// Errors raised by resolution, transitions, authorization, dispatch and
/// boot-time validation.
///
/// Authorization and lookup failures never mutate stored state. A logging
/// failure propagates through [`FsmError`] only after the transition that
/// produced it has committed.
#[derive(Debug, Error)]
pub enum FsmError {
    /// The transition target is not one of the context's declared states.
    #[error("state [{state}] is not a valid state for [{context}]")]
    StateNotFound { state: StateId, context: StateId },

    /// No definition is registered under this identifier.
    #[error("state [{state}] is not registered")]
    UnknownState { state: StateId },

    /// A context operation was invoked on a plain state definition.
    #[error("[{state}] is not a context")]
    NotAContext { state: StateId },

    /// A linear path operation was invoked on a non-linear context.
    #[error("[{context}] does not declare a linear path")]
    NotLinear { context: StateId },

    /// `transition_to_next` was called after the end state was reached.
    #[error("linear flow of [{context}] is already finished")]
    AlreadyFinished { context: StateId },

    /// The context has no bound record; there is nothing to transition.
    #[error("context [{context}] has no bound record")]
    UnboundRecord { context: StateId },

    /// `create_record` was called while a record is already bound.
    #[error("state [{state}] already owns a record")]
    RecordAlreadyExists { state: StateId },

    /// A record operation was invoked on a state with no dedicated model.
    #[error("state [{state}] declares no dedicated model")]
    NoDedicatedModel { state: StateId },

    /// The dispatched edge does not exist on the resolved container.
    #[error("edge [{edge}] is not defined on [{target}]")]
    EdgeNotFound { edge: String, target: StateId },

    /// A route parameter could not be parsed into a record identifier.
    #[error("[{value}] is not a valid record identifier")]
    InvalidRecordId { value: String },

    /// The authorization predicate failed. The status code is chosen by
    /// explicit argument, context configuration, then process configuration.
    #[error("access denied with status {status}")]
    AccessDenied { status: u16 },

    /// Boot-time metadata validation failed. Fatal: the offending context
    /// must not finish booting.
    #[error("{0}")]
    ConflictDetected(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Build(#[from] BuildError),
}

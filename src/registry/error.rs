//! Build errors for state, context and engine builders.

use crate::core::StateId;
use thiserror::Error;

/// Errors raised while assembling definitions or the engine.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("edge [{edge}] has no handler. Call .handler(f) before .build()")]
    MissingHandler { edge: String },

    #[error("edge [{edge}] is declared twice on [{state}]")]
    DuplicateEdge { state: StateId, edge: String },

    #[error("state [{state}] is registered twice")]
    DuplicateState { state: StateId },

    #[error("alias [{alias}] is mapped to both [{first}] and [{second}]")]
    DuplicateAlias {
        alias: String,
        first: StateId,
        second: StateId,
    },

    #[error("context [{context}] declares unregistered state [{state}]")]
    UnknownState { context: StateId, state: StateId },

    #[error("linear path of [{context}] contains undeclared state [{state}]")]
    PathStateNotDeclared { context: StateId, state: StateId },

    #[error("end state [{state}] of [{context}] is not a declared state")]
    EndStateNotDeclared { context: StateId, state: StateId },

    #[error("no registry supplied. Call .registry(registry) before .build()")]
    MissingRegistry,

    #[error("no record store supplied. Call .store(store) before .build()")]
    MissingStore,
}

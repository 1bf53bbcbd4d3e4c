//! Boot-time consistency checking.
//!
//! Edge metadata forms a constraint graph across a context tree that the
//! type system cannot check: markers that only make sense on states, markers
//! that require route exposure, and override declarations that must trace
//! back to an exposed ancestor edge. The [`Debugger`] walks a context's
//! declared tree once at boot and reports every violation it finds; the
//! engine fails the boot on the first one.

use crate::core::StateId;
use crate::error::FsmError;
use crate::registry::{EdgeDef, StateRegistry};
use std::collections::HashSet;
use std::fmt;

/// A single metadata violation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Conflict {
    /// A state-only marker was declared on a context edge.
    StateMarkerOnContext {
        marker: &'static str,
        context: StateId,
        edge: String,
    },

    /// A marker requiring route exposure was declared on an unexposed edge.
    RequiresApi {
        marker: &'static str,
        owner: StateId,
        edge: String,
    },

    /// A context-only marker was declared on a state, either at class level
    /// (`edge` is `None`) or on one of its edges.
    ContextMarkerOnState {
        marker: &'static str,
        state: StateId,
        edge: Option<String>,
    },

    /// An exposed edge is also marked as an override; the two are mutually
    /// exclusive.
    ApiWithOverride { state: StateId, edge: String },

    /// An override edge could not be traced to a same-named, exposed,
    /// non-override ancestor edge. `failed_at` is the class where the
    /// resolution broke down.
    OverrideWithoutTarget {
        state: StateId,
        edge: String,
        failed_at: StateId,
    },
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::StateMarkerOnContext {
                marker,
                context,
                edge,
            } => write!(
                f,
                "marker [{marker}] can't be used on the context, on [{context}::{edge}]"
            ),
            Conflict::RequiresApi {
                marker,
                owner,
                edge,
            } => write!(
                f,
                "marker [{marker}] can't be used without [api] on [{owner}::{edge}]"
            ),
            Conflict::ContextMarkerOnState {
                marker,
                state,
                edge: Some(edge),
            } => write!(
                f,
                "marker [{marker}] can't be used on a state, on [{state}::{edge}]"
            ),
            Conflict::ContextMarkerOnState {
                marker,
                state,
                edge: None,
            } => write!(f, "marker [{marker}] can't be used on state [{state}]"),
            Conflict::ApiWithOverride { state, edge } => write!(
                f,
                "marker [override_api] can't be used with [api] on [{state}::{edge}]"
            ),
            Conflict::OverrideWithoutTarget {
                state,
                edge,
                failed_at,
            } => write!(
                f,
                "failed to override api [{edge}] on [{state}]: [{failed_at}] does not expose it"
            ),
        }
    }
}

/// Walks one context's declared tree and validates its edge metadata.
pub struct Debugger<'a> {
    registry: &'a StateRegistry,
    context: StateId,
}

impl<'a> Debugger<'a> {
    pub fn new(registry: &'a StateRegistry, context: StateId) -> Self {
        Debugger { registry, context }
    }

    /// Fail with `ConflictDetected` on the first violation.
    pub fn run(&self) -> Result<(), FsmError> {
        match self.check()?.into_iter().next() {
            Some(conflict) => Err(FsmError::ConflictDetected(conflict.to_string())),
            None => Ok(()),
        }
    }

    /// Collect every violation in the tree.
    pub fn check(&self) -> Result<Vec<Conflict>, FsmError> {
        let mut conflicts = Vec::new();
        let root = self.registry.get(self.context)?;

        for edge in root.edges() {
            if edge.override_api() {
                conflicts.push(Conflict::StateMarkerOnContext {
                    marker: "override_api",
                    context: self.context,
                    edge: edge.name().to_string(),
                });
            }
            if edge.without_authorize() {
                conflicts.push(Conflict::StateMarkerOnContext {
                    marker: "without_authorize",
                    context: self.context,
                    edge: edge.name().to_string(),
                });
            }
            self.check_requires_api(edge, self.context, true, &mut conflicts);
        }

        if let Some(context_def) = root.context() {
            let mut visited = HashSet::from([self.context]);
            self.check_states(
                context_def.states(),
                &[self.context],
                &mut visited,
                &mut conflicts,
            )?;
        }

        Ok(conflicts)
    }

    fn check_requires_api(
        &self,
        edge: &EdgeDef,
        owner: StateId,
        allow_without_record: bool,
        conflicts: &mut Vec<Conflict>,
    ) {
        if edge.api().is_some() {
            return;
        }
        if edge.transaction().is_some() {
            conflicts.push(Conflict::RequiresApi {
                marker: "transaction",
                owner,
                edge: edge.name().to_string(),
            });
        }
        if !edge.on_states().is_empty() {
            conflicts.push(Conflict::RequiresApi {
                marker: "on_states",
                owner,
                edge: edge.name().to_string(),
            });
        }
        if !edge.middlewares().is_empty() {
            conflicts.push(Conflict::RequiresApi {
                marker: "middleware",
                owner,
                edge: edge.name().to_string(),
            });
        }
        if allow_without_record && edge.without_record() {
            conflicts.push(Conflict::RequiresApi {
                marker: "without_record",
                owner,
                edge: edge.name().to_string(),
            });
        }
    }

    fn check_states(
        &self,
        states: &[StateId],
        parents: &[StateId],
        visited: &mut HashSet<StateId>,
        conflicts: &mut Vec<Conflict>,
    ) -> Result<(), FsmError> {
        for state in states {
            let def = self.registry.get(*state)?;

            if !def.middlewares().is_empty() {
                conflicts.push(Conflict::ContextMarkerOnState {
                    marker: "middleware",
                    state: *state,
                    edge: None,
                });
            }

            for edge in def.edges() {
                if edge.without_record() {
                    conflicts.push(Conflict::ContextMarkerOnState {
                        marker: "without_record",
                        state: *state,
                        edge: Some(edge.name().to_string()),
                    });
                }

                self.check_requires_api(edge, *state, false, conflicts);

                if edge.api().is_some() && edge.override_api() {
                    conflicts.push(Conflict::ApiWithOverride {
                        state: *state,
                        edge: edge.name().to_string(),
                    });
                }

                if edge.override_api() {
                    if let Some(conflict) = self.trace_override(*state, edge.name(), parents) {
                        conflicts.push(conflict);
                    }
                }
            }

            if let Some(nested) = def.context() {
                if visited.insert(*state) {
                    let mut chain = parents.to_vec();
                    chain.push(*state);
                    self.check_states(nested.states(), &chain, visited, conflicts)?;
                }
            }
        }
        Ok(())
    }

    /// Walk ancestors innermost-first. The override is valid once a parent
    /// exposes the same-named edge; a parent carrying its own override is
    /// skipped; anything else is where resolution fails.
    fn trace_override(&self, state: StateId, edge: &str, parents: &[StateId]) -> Option<Conflict> {
        for parent in parents.iter().rev() {
            if let Ok(def) = self.registry.get(*parent) {
                if let Some(parent_edge) = def.edge(edge) {
                    if parent_edge.override_api() {
                        continue;
                    }
                    if parent_edge.api().is_some() {
                        return None;
                    }
                }
            }
            return Some(Conflict::OverrideWithoutTarget {
                state,
                edge: edge.to_string(),
                failed_at: *parent,
            });
        }
        Some(Conflict::OverrideWithoutTarget {
            state,
            edge: edge.to_string(),
            failed_at: parents.first().copied().unwrap_or(self.context),
        })
    }
}

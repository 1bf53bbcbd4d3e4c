//! State registry: definitions, aliases and lookup.
//!
//! All state types are registered up front into a [`StateRegistry`], an
//! explicit initialization phase replacing lazily-booted class statics. The
//! registry owns the alias table and answers every "which definition does
//! this stored identifier mean" question for the engine.

mod aliases;
mod def;
mod error;

pub use def::{
    Api, ApiName, ContextBuilder, ContextDef, EdgeBuilder, EdgeDef, FindRecordFn, LinearDef,
    StateBuilder, StateDef,
};
pub use error::BuildError;

use crate::compare::MatchKind;
use crate::core::StateId;
use crate::error::FsmError;
use aliases::AliasTable;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Immutable set of registered state definitions.
pub struct StateRegistry {
    defs: HashMap<StateId, Arc<StateDef>>,
    aliases: AliasTable,
    roots: Vec<StateId>,
}

impl StateRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Look up a definition, failing with `UnknownState`.
    pub fn get(&self, id: StateId) -> Result<&Arc<StateDef>, FsmError> {
        self.defs
            .get(&id)
            .ok_or(FsmError::UnknownState { state: id })
    }

    pub fn lookup(&self, id: StateId) -> Option<&Arc<StateDef>> {
        self.defs.get(&id)
    }

    /// Resolve a stored identifier: first through the alias table, then as
    /// a literal state name. `None` when nothing is registered under it.
    pub fn resolve(&self, identifier: &str) -> Option<&Arc<StateDef>> {
        if let Some(id) = self.aliases.state_of(identifier) {
            return self.defs.get(&id);
        }
        self.defs
            .iter()
            .find(|(id, _)| id.name() == identifier)
            .map(|(_, def)| def)
    }

    /// The stored form of a state: its alias, or its literal name.
    pub fn alias_of(&self, state: StateId) -> &str {
        self.aliases.alias_of(state)
    }

    /// Context definitions that are not declared as a child of any other
    /// context. These are booted first at engine construction.
    pub fn roots(&self) -> impl Iterator<Item = &Arc<StateDef>> {
        self.roots.iter().filter_map(|id| self.defs.get(id))
    }

    /// Stored identifiers of the declared states of `context` matching
    /// `target` under `kind`. Useful for store-side filtering ("all records
    /// whose state is a Payable").
    pub fn aliases_for(
        &self,
        context: StateId,
        target: StateId,
        kind: MatchKind,
    ) -> Result<Vec<String>, FsmError> {
        let def = self.get(context)?;
        let context_def = def
            .context()
            .ok_or(FsmError::NotAContext { state: context })?;

        let mut aliases = Vec::new();
        for state in context_def.states() {
            let state_def = self.get(*state)?;
            let matched = match kind {
                MatchKind::Exact => state_def.id() == target,
                MatchKind::Subtype => state_def.satisfies(target),
            };
            if matched {
                aliases.push(self.alias_of(*state).to_string());
            }
        }
        Ok(aliases)
    }
}

/// Builder assembling and validating a [`StateRegistry`].
pub struct RegistryBuilder {
    defs: Vec<StateDef>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        RegistryBuilder { defs: Vec::new() }
    }

    pub fn register(mut self, def: StateDef) -> Self {
        self.defs.push(def);
        self
    }

    pub fn build(self) -> Result<StateRegistry, BuildError> {
        let aliases = AliasTable::collect(self.defs.iter())?;

        let mut defs: HashMap<StateId, Arc<StateDef>> = HashMap::new();
        for def in self.defs {
            if defs.contains_key(&def.id()) {
                return Err(BuildError::DuplicateState { state: def.id() });
            }
            defs.insert(def.id(), Arc::new(def));
        }

        let mut children: HashSet<StateId> = HashSet::new();
        for def in defs.values() {
            let Some(context) = def.context() else { continue };
            for state in context.states() {
                if !defs.contains_key(state) {
                    return Err(BuildError::UnknownState {
                        context: def.id(),
                        state: *state,
                    });
                }
                children.insert(*state);
            }
        }

        let mut roots: Vec<StateId> = defs
            .values()
            .filter(|def| def.is_context() && !children.contains(&def.id()))
            .map(|def| def.id())
            .collect();
        roots.sort_by_key(|id| id.name());

        Ok(StateRegistry {
            defs,
            aliases,
            roots,
        })
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

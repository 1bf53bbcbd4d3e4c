//! Alias table: storage identifiers ↔ state ids.
//!
//! Stored state identifiers go through this table so state types can be
//! renamed without migrating stored data. Unmapped identifiers are treated
//! as literal state names.

use crate::core::StateId;
use crate::registry::{BuildError, StateDef};
use std::collections::HashMap;

#[derive(Default)]
pub(crate) struct AliasTable {
    by_alias: HashMap<String, StateId>,
    by_id: HashMap<StateId, String>,
}

impl AliasTable {
    pub(crate) fn collect<'a>(
        defs: impl IntoIterator<Item = &'a StateDef>,
    ) -> Result<Self, BuildError> {
        let mut table = AliasTable::default();
        for def in defs {
            let Some(alias) = def.alias() else { continue };
            if let Some(first) = table.by_alias.get(alias) {
                return Err(BuildError::DuplicateAlias {
                    alias: alias.to_string(),
                    first: *first,
                    second: def.id(),
                });
            }
            table.by_alias.insert(alias.to_string(), def.id());
            table.by_id.insert(def.id(), alias.to_string());
        }
        Ok(table)
    }

    /// The state mapped to `identifier`, if the identifier is an alias.
    pub(crate) fn state_of(&self, identifier: &str) -> Option<StateId> {
        self.by_alias.get(identifier).copied()
    }

    /// The stored form of `state`: its alias, or its literal name.
    pub(crate) fn alias_of(&self, state: StateId) -> &str {
        self.by_id
            .get(&state)
            .map(String::as_str)
            .unwrap_or_else(|| state.name())
    }
}

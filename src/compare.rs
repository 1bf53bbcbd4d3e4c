//! State comparison modes.
//!
//! Every "is this context in state X" question is answered under a
//! [`Compare`]: a match kind (exact identity vs. capability satisfaction)
//! combined with a scope (which part of the resolved state chain is
//! tested). The two axes are independent.
//!
//! ```rust
//! use stateline::{Compare, MatchKind, Scope};
//!
//! let compare = Compare::new(MatchKind::Exact, Scope::Current);
//! assert_eq!(compare.to_string(), "exact@current");
//! assert_eq!("exact@current".parse::<Compare>().unwrap(), compare);
//! ```

use crate::core::StateId;
use crate::registry::StateDef;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// How a single chain member is matched against a spec entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// State identity only; capabilities are ignored.
    Exact,

    /// The state's identity or any of its declared capabilities.
    Subtype,
}

/// Which part of the resolved state chain is tested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// The immediate current state only.
    Current,

    /// The innermost state of the chain.
    Deep,

    /// Any member of the chain.
    Chain,

    /// The full chain, positionally: the spec is an ordered path that must
    /// have the same length and match at every position.
    Building,
}

/// A complete comparison mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compare {
    pub kind: MatchKind,
    pub scope: Scope,
}

impl Compare {
    pub const fn new(kind: MatchKind, scope: Scope) -> Self {
        Compare { kind, scope }
    }
}

/// The documented default: capability matching against any chain member.
impl Default for Compare {
    fn default() -> Self {
        Compare::new(MatchKind::Subtype, Scope::Chain)
    }
}

impl fmt::Display for Compare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            MatchKind::Exact => "exact",
            MatchKind::Subtype => "subtype",
        };
        let scope = match self.scope {
            Scope::Current => "current",
            Scope::Deep => "deep",
            Scope::Chain => "chain",
            Scope::Building => "building",
        };
        write!(f, "{kind}@{scope}")
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("unrecognized compare expression [{0}], expected e.g. subtype@chain")]
pub struct ParseCompareError(String);

impl FromStr for Compare {
    type Err = ParseCompareError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let err = || ParseCompareError(value.to_string());
        let (kind, scope) = value.split_once('@').ok_or_else(err)?;
        let kind = match kind {
            "exact" => MatchKind::Exact,
            "subtype" => MatchKind::Subtype,
            _ => return Err(err()),
        };
        let scope = match scope {
            "current" => Scope::Current,
            "deep" => Scope::Deep,
            "chain" => Scope::Chain,
            "building" => Scope::Building,
            _ => return Err(err()),
        };
        Ok(Compare::new(kind, scope))
    }
}

fn matches_one(def: &StateDef, target: StateId, kind: MatchKind) -> bool {
    match kind {
        MatchKind::Exact => def.id() == target,
        MatchKind::Subtype => def.satisfies(target),
    }
}

fn matches_any(def: &StateDef, spec: &[StateId], kind: MatchKind) -> bool {
    spec.iter().any(|target| matches_one(def, *target, kind))
}

/// Evaluate a spec against a resolved chain (outermost state first).
///
/// For `Current`, `Deep` and `Chain` scopes the spec is a logical OR over
/// its entries; for `Building` it is an ordered path.
pub(crate) fn evaluate(chain: &[&StateDef], spec: &[StateId], compare: Compare) -> bool {
    match compare.scope {
        Scope::Current => chain
            .first()
            .is_some_and(|def| matches_any(def, spec, compare.kind)),
        Scope::Deep => chain
            .last()
            .is_some_and(|def| matches_any(def, spec, compare.kind)),
        Scope::Chain => chain
            .iter()
            .any(|def| matches_any(def, spec, compare.kind)),
        Scope::Building => {
            chain.len() == spec.len()
                && chain
                    .iter()
                    .zip(spec)
                    .all(|(def, target)| matches_one(def, *target, compare.kind))
        }
    }
}

//! Process-wide engine configuration.
//!
//! Every setting here is a default that a context definition, or an explicit
//! call argument, may override. Precedence is always: explicit argument,
//! then context configuration, then this struct.

use crate::compare::Compare;
use serde::{Deserialize, Serialize};

/// Engine-wide defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FsmConfig {
    /// Run the boot-time consistency checker for every booting context.
    pub debug: bool,

    /// Default comparison mode for `is_in_state` / `authorize`.
    pub compare: Compare,

    /// Status code carried by `AccessDenied` when no override applies.
    pub deny_status: u16,

    /// How many levels a linear finish may cascade into enclosing linear
    /// contexts before propagation stops.
    pub finish_propagation_limit: usize,
}

impl Default for FsmConfig {
    fn default() -> Self {
        FsmConfig {
            debug: false,
            compare: Compare::default(),
            deny_status: 403,
            finish_propagation_limit: 8,
        }
    }
}

impl FsmConfig {
    /// Build a configuration from the process environment, falling back to
    /// defaults for unset or unparsable variables.
    ///
    /// Recognized variables: `FSM_DEBUG` (`1`/`true`), `FSM_COMPARE`
    /// (e.g. `subtype@chain`), `FSM_DENY_STATUS`, `FSM_FINISH_LIMIT`.
    pub fn from_env() -> Self {
        let mut config = FsmConfig::default();

        if let Ok(value) = std::env::var("FSM_DEBUG") {
            config.debug = matches!(value.as_str(), "1" | "true" | "TRUE" | "True");
        }
        if let Ok(value) = std::env::var("FSM_COMPARE") {
            if let Ok(compare) = value.parse() {
                config.compare = compare;
            }
        }
        if let Ok(value) = std::env::var("FSM_DENY_STATUS") {
            if let Ok(status) = value.parse() {
                config.deny_status = status;
            }
        }
        if let Ok(value) = std::env::var("FSM_FINISH_LIMIT") {
            if let Ok(limit) = value.parse() {
                config.finish_propagation_limit = limit;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::{MatchKind, Scope};

    #[test]
    fn defaults_are_conservative() {
        let config = FsmConfig::default();

        assert!(!config.debug);
        assert_eq!(config.deny_status, 403);
        assert_eq!(config.compare, Compare::default());
        assert_eq!(config.finish_propagation_limit, 8);
    }

    #[test]
    fn config_deserializes_with_partial_fields() {
        let config: FsmConfig = serde_json::from_str(
            r#"{"debug": true, "compare": {"kind": "exact", "scope": "building"}}"#,
        )
        .unwrap();

        assert!(config.debug);
        assert_eq!(config.compare, Compare::new(MatchKind::Exact, Scope::Building));
        assert_eq!(config.deny_status, 403);
    }

    #[test]
    fn config_round_trips_through_serde() {
        let config = FsmConfig {
            debug: true,
            compare: Compare::new(MatchKind::Exact, Scope::Deep),
            deny_status: 409,
            finish_propagation_limit: 2,
        };

        let text = serde_json::to_string(&config).unwrap();
        let back: FsmConfig = serde_json::from_str(&text).unwrap();

        assert_eq!(back.deny_status, 409);
        assert_eq!(back.compare, config.compare);
        assert_eq!(back.finish_propagation_limit, 2);
    }
}

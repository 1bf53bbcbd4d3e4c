//! State identity and behavior.
//!
//! A state type is identified by a [`StateId`] and described to the registry
//! by a [`crate::registry::StateDef`]. Its runtime behavior (lifecycle hooks
//! and dedicated-record construction) lives in a [`StateBehavior`]
//! implementation, instantiated once per resolved [`StateNode`].

use crate::core::node::StateNode;
use crate::engine::Fsm;
use crate::error::FsmError;
use crate::store::{Fields, RecordHandle};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Names a state type.
///
/// Identifiers are interned `&'static str`s, typically declared as
/// constants next to the state's behavior:
///
/// ```rust
/// use stateline::StateId;
///
/// const PENDING: StateId = StateId::new("Pending");
/// assert_eq!(PENDING.name(), "Pending");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StateId(&'static str);

impl StateId {
    pub const fn new(name: &'static str) -> Self {
        StateId(name)
    }

    pub fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl fmt::Debug for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateId({})", self.0)
    }
}

/// How a state manages its dedicated record on enter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DataPolicy {
    /// No automatic record management.
    #[default]
    Transient,

    /// Create a fresh dedicated record on every enter, from
    /// [`StateBehavior::create_via`].
    CreateOnEnter,

    /// Create the dedicated record on enter only when none exists yet.
    ReuseOnEnter,
}

/// Lifecycle behavior of a state or context.
///
/// All hooks are no-ops by default; implementers override the ones they
/// need. Hooks receive a [`StateView`] giving access to the node, its bound
/// record and the engine.
pub trait StateBehavior: Send + Sync {
    /// Invoked after a transition has committed this state as current.
    fn on_enter(&self, view: &StateView<'_>) -> Result<(), FsmError> {
        let _ = view;
        Ok(())
    }

    /// Invoked before the stored identifier moves off this state.
    fn on_leave(&self, view: &StateView<'_>) -> Result<(), FsmError> {
        let _ = view;
        Ok(())
    }

    /// Invoked once when the node is first materialized for a record.
    fn on_load(&self, view: &StateView<'_>) -> Result<(), FsmError> {
        let _ = view;
        Ok(())
    }

    /// Invoked when route dispatch rebinds the record. Context nodes recurse
    /// into their current child state after this hook.
    fn on_reload(&self, view: &StateView<'_>) -> Result<(), FsmError> {
        let _ = view;
        Ok(())
    }

    /// Invoked on a linear context after its finishing transition. The
    /// default forwards the finish to an enclosing linear context, bounded
    /// by the configured propagation limit.
    fn on_finish(&self, view: &StateView<'_>) -> Result<(), FsmError> {
        view.propagate_finish()
    }

    /// Field values for the dedicated record created under a
    /// [`DataPolicy::CreateOnEnter`] or [`DataPolicy::ReuseOnEnter`] policy.
    fn create_via(&self, view: &StateView<'_>) -> Fields {
        let _ = view;
        Fields::new()
    }
}

/// The default, hook-free behavior used when a definition supplies no
/// factory of its own.
pub struct DefaultBehavior;

impl StateBehavior for DefaultBehavior {}

/// Handle passed to [`StateBehavior`] hooks: the node the hook fires on,
/// plus engine access.
pub struct StateView<'a> {
    fsm: &'a Fsm,
    node: &'a Arc<StateNode>,
    finish_depth: usize,
}

impl<'a> StateView<'a> {
    pub(crate) fn new(fsm: &'a Fsm, node: &'a Arc<StateNode>) -> Self {
        StateView {
            fsm,
            node,
            finish_depth: 0,
        }
    }

    pub(crate) fn at_depth(fsm: &'a Fsm, node: &'a Arc<StateNode>, finish_depth: usize) -> Self {
        StateView {
            fsm,
            node,
            finish_depth,
        }
    }

    pub fn fsm(&self) -> &Fsm {
        self.fsm
    }

    pub fn node(&self) -> &Arc<StateNode> {
        self.node
    }

    /// The owning context node, if this node is a nested state.
    pub fn owner(&self) -> Option<&Arc<StateNode>> {
        self.node.parent()
    }

    /// The node's own bound record (the dedicated row for plain states).
    pub fn record(&self) -> Option<RecordHandle> {
        self.node.record()
    }

    /// The record carrying the stored state identifier this node answers
    /// to: the node's own record for contexts, the owner's otherwise.
    pub fn context_record(&self) -> Option<RecordHandle> {
        if self.node.is_context() {
            self.node.record()
        } else {
            self.node.parent().and_then(|owner| owner.record())
        }
    }

    /// Transition the owning context. Context nodes transition themselves;
    /// plain states delegate to their owner.
    pub fn transition_to(
        &self,
        target: Option<StateId>,
    ) -> Result<Option<Arc<StateNode>>, FsmError> {
        let context = if self.node.is_context() {
            self.node.clone()
        } else {
            match self.node.parent() {
                Some(owner) => owner.clone(),
                None => self.node.clone(),
            }
        };
        self.fsm.transition_to(&context, target, None)
    }

    /// Create this state's dedicated record.
    pub fn create_record(&self, fields: Fields) -> Result<RecordHandle, FsmError> {
        self.fsm.create_record(self.node, fields)
    }

    /// Delete this state's dedicated record, if one is bound.
    pub fn delete_record(&self) -> Result<Option<bool>, FsmError> {
        self.fsm.delete_record(self.node)
    }

    /// Forward a linear finish to the enclosing linear context, respecting
    /// the configured propagation limit.
    pub fn propagate_finish(&self) -> Result<(), FsmError> {
        let Some(parent) = self.node.parent() else {
            return Ok(());
        };
        let parent_is_linear = parent
            .def()
            .context()
            .is_some_and(|context| context.linear().is_some());
        if !parent_is_linear {
            return Ok(());
        }
        let limit = self.fsm.config().finish_propagation_limit;
        if self.finish_depth + 1 >= limit {
            tracing::warn!(
                context = %parent.id(),
                limit,
                "finish propagation limit reached, not forwarding to parent"
            );
            return Ok(());
        }
        self.fsm
            .linear_next(parent, None, self.finish_depth + 1)
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_id_exposes_its_name() {
        const PENDING: StateId = StateId::new("Pending");
        assert_eq!(PENDING.name(), "Pending");
        assert_eq!(PENDING.to_string(), "Pending");
    }

    #[test]
    fn state_ids_compare_by_name() {
        assert_eq!(StateId::new("A"), StateId::new("A"));
        assert_ne!(StateId::new("A"), StateId::new("B"));
    }

    #[test]
    fn data_policy_defaults_to_transient() {
        assert_eq!(DataPolicy::default(), DataPolicy::Transient);
    }
}

//! Linear path extension.
//!
//! A context declaring a [`crate::registry::LinearDef`] imposes a total
//! order over (a subset of) its states. `transition_to_next` walks that
//! path forward, entering the declared end state and firing `on_finish`
//! once the path is exhausted; `transition_to_previous` walks it backward
//! and is a no-op at the head.
//!
//! An identifier appearing twice in the path resolves to its first
//! occurrence.

use crate::core::{StateId, StateNode, StateView};
use crate::engine::Fsm;
use crate::error::FsmError;
use crate::logging::PendingLog;
use crate::registry::LinearDef;
use std::sync::Arc;

impl Fsm {
    fn linear_def<'a>(&self, context: &'a StateNode) -> Result<&'a LinearDef, FsmError> {
        context
            .def()
            .context()
            .and_then(|def| def.linear())
            .ok_or(FsmError::NotLinear {
                context: context.id(),
            })
    }

    fn linear_path(&self, context: &StateNode) -> Result<Vec<StateId>, FsmError> {
        let linear = self.linear_def(context)?;
        match linear.path() {
            Some(path) => Ok(path.to_vec()),
            None => Ok(context
                .def()
                .context()
                .map(|def| def.states().to_vec())
                .unwrap_or_default()),
        }
    }

    /// Advance a linear context to the next state along its path.
    ///
    /// With no current state (or one outside the path) the target is the
    /// first path entry. Exhausting the path enters the declared end state
    /// (or "no state") and fires `on_finish`; calling again once the end
    /// state is current fails with `AlreadyFinished`.
    pub fn transition_to_next(
        &self,
        context: &Arc<StateNode>,
        log: Option<PendingLog>,
    ) -> Result<Option<Arc<StateNode>>, FsmError> {
        self.linear_next(context, log, 0)
    }

    pub(crate) fn linear_next(
        &self,
        context: &Arc<StateNode>,
        log: Option<PendingLog>,
        finish_depth: usize,
    ) -> Result<Option<Arc<StateNode>>, FsmError> {
        let end_state = self.linear_def(context)?.end_state();
        let path = self.linear_path(context)?;
        let current = self.current_state(context)?;

        if let (Some(current), Some(end)) = (&current, end_state) {
            if current.id() == end {
                return Err(FsmError::AlreadyFinished {
                    context: context.id(),
                });
            }
        }

        let next = match current
            .as_ref()
            .and_then(|node| path.iter().position(|id| *id == node.id()))
        {
            Some(index) => path.get(index + 1).copied(),
            None => path.first().copied(),
        };

        let finishing = next.is_none();
        let target = if finishing { end_state } else { next };

        let new_state = self.transition_to(context, target, log)?;

        if finishing {
            context
                .behavior()
                .on_finish(&StateView::at_depth(self, context, finish_depth))?;
        }

        Ok(new_state)
    }

    /// Step a linear context back along its path.
    ///
    /// Without a current state, or with the current state at the path head,
    /// nothing is transitioned and the current state is returned unchanged.
    /// A current state outside the path targets the first path entry.
    pub fn transition_to_previous(
        &self,
        context: &Arc<StateNode>,
        log: Option<PendingLog>,
    ) -> Result<Option<Arc<StateNode>>, FsmError> {
        let path = self.linear_path(context)?;

        let Some(current) = self.current_state(context)? else {
            return Ok(None);
        };

        let previous = match path.iter().position(|id| *id == current.id()) {
            Some(0) => None,
            Some(index) => path.get(index - 1).copied(),
            None => path.first().copied(),
        };

        match previous {
            None => Ok(Some(current)),
            Some(target) => self.transition_to(context, Some(target), log),
        }
    }
}

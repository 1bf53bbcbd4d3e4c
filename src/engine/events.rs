//! Engine events.
//!
//! Observers register per context type and are delivered synchronously, in
//! registration order. An observer returning an error from
//! [`FsmEvent::TransitionBefore`] vetoes the transition before anything is
//! mutated. There is no re-entrancy guard: an observer triggering another
//! transition on the same record is undefined behavior and discouraged.

use crate::core::{StateId, StateNode};
use crate::error::FsmError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// An engine event, fired against the context type it concerns.
pub enum FsmEvent {
    /// A transition is about to run. Returning an error vetoes it.
    TransitionBefore {
        context: Arc<StateNode>,
        target: Option<StateId>,
    },

    /// A transition committed.
    Transition {
        context: Arc<StateNode>,
        from: Option<Arc<StateNode>>,
        to: Option<Arc<StateNode>>,
    },

    /// Route dispatch is preparing a context.
    RoutePreparing { context: Arc<StateNode> },

    /// Route dispatch is about to invoke an edge on a container.
    RouteInvoking {
        context: Arc<StateNode>,
        container: Arc<StateNode>,
        edge: String,
    },
}

type ObserverFn = dyn Fn(&FsmEvent) -> Result<(), FsmError> + Send + Sync;

#[derive(Default)]
pub(crate) struct Observers {
    listeners: Mutex<HashMap<StateId, Vec<Arc<ObserverFn>>>>,
}

impl Observers {
    pub(crate) fn new() -> Self {
        Observers::default()
    }

    pub(crate) fn register<F>(&self, context: StateId, observer: F)
    where
        F: Fn(&FsmEvent) -> Result<(), FsmError> + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.lock().expect("observer lock poisoned");
        listeners
            .entry(context)
            .or_default()
            .push(Arc::new(observer));
    }

    /// Deliver an event to every observer of `context`, in registration
    /// order. The first error stops delivery and propagates.
    pub(crate) fn fire(&self, context: StateId, event: &FsmEvent) -> Result<(), FsmError> {
        let observers: Vec<Arc<ObserverFn>> = {
            let listeners = self.listeners.lock().expect("observer lock poisoned");
            listeners.get(&context).cloned().unwrap_or_default()
        };
        for observer in observers {
            observer(event)?;
        }
        Ok(())
    }
}

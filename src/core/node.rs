//! Live state instances.
//!
//! A [`StateNode`] is the materialized form of a state definition for one
//! record: the definition, an optional bound record, a link to the owning
//! context's node and a behavior instance. Nodes are created by the engine
//! and memoized per record, so two reads of the same current state return
//! the same node until a transition invalidates it.

use crate::core::state::{StateBehavior, StateId};
use crate::registry::StateDef;
use crate::store::RecordHandle;
use std::fmt;
use std::sync::{Arc, Mutex};

pub struct StateNode {
    def: Arc<StateDef>,
    parent: Option<Arc<StateNode>>,
    record: Mutex<Option<RecordHandle>>,
    behavior: Box<dyn StateBehavior>,
}

impl StateNode {
    /// A root context node, not yet bound to a record.
    pub(crate) fn root(def: Arc<StateDef>) -> Self {
        let behavior = def.make_behavior();
        StateNode {
            def,
            parent: None,
            record: Mutex::new(None),
            behavior,
        }
    }

    /// A child node owned by `parent`.
    pub(crate) fn child(def: Arc<StateDef>, parent: Arc<StateNode>) -> Self {
        let behavior = def.make_behavior();
        StateNode {
            def,
            parent: Some(parent),
            record: Mutex::new(None),
            behavior,
        }
    }

    pub fn def(&self) -> &Arc<StateDef> {
        &self.def
    }

    pub fn id(&self) -> StateId {
        self.def.id()
    }

    /// The owning context's node. `None` for root contexts.
    pub fn parent(&self) -> Option<&Arc<StateNode>> {
        self.parent.as_ref()
    }

    /// Whether this node is itself a context (a nested state machine).
    pub fn is_context(&self) -> bool {
        self.def.is_context()
    }

    /// The bound record: the main record for a root context, the dedicated
    /// row for states that own one.
    pub fn record(&self) -> Option<RecordHandle> {
        self.record.lock().expect("record binding lock poisoned").clone()
    }

    /// Bind the record this node answers to. Required before any state
    /// resolution on a context node.
    pub fn bind_record(&self, record: RecordHandle) {
        *self.record.lock().expect("record binding lock poisoned") = Some(record);
    }

    pub(crate) fn unbind_record(&self) -> Option<RecordHandle> {
        self.record.lock().expect("record binding lock poisoned").take()
    }

    pub fn behavior(&self) -> &dyn StateBehavior {
        self.behavior.as_ref()
    }
}

// Manual Debug: behaviors are opaque, records only print their identity.
impl fmt::Debug for StateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateNode")
            .field("id", &self.id())
            .field("record", &self.record())
            .finish()
    }
}

//! The engine: resolution, caching, transitions and authorization.
//!
//! [`Fsm`] ties the registry, the record store, configuration and logging
//! together. It owns the per-record instance caches and is the only place
//! that reads or writes the stored state identifier.
//!
//! Construction is the explicit initialization phase: [`FsmBuilder::build`]
//! boots every root context (running boot hooks and, with `config.debug`,
//! the consistency checker) before the engine is handed out. Booting is
//! idempotent and guarded by a mutex-held flag set; boot hooks must not
//! re-enter the engine's boot.

mod cache;
mod events;

pub use events::FsmEvent;

use crate::compare::{self, Compare};
use crate::config::FsmConfig;
use crate::core::{DataPolicy, StateId, StateNode, StateView};
use crate::debug::Debugger;
use crate::error::FsmError;
use crate::logging::{EmptyLogger, Logger, PendingLog};
use crate::registry::{BuildError, ContextDef, StateDef, StateRegistry};
use crate::store::{
    Fields, RecordHandle, RecordStore, CURRENT_STATE_FIELD, PARENT_ID_FIELD, PARENT_TYPE_FIELD,
};
use cache::InstanceCache;
use events::Observers;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Builder for [`Fsm`]. A registry and a record store are required.
pub struct FsmBuilder {
    registry: Option<StateRegistry>,
    store: Option<Arc<dyn RecordStore>>,
    config: Option<FsmConfig>,
    logger: Option<Arc<dyn Logger>>,
}

impl FsmBuilder {
    pub fn new() -> Self {
        FsmBuilder {
            registry: None,
            store: None,
            config: None,
            logger: None,
        }
    }

    pub fn registry(mut self, registry: StateRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(mut self, config: FsmConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Process-wide logger. Defaults to [`EmptyLogger`].
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Assemble the engine and boot every root context. With `config.debug`
    /// set, a metadata conflict anywhere in a context tree fails the build.
    pub fn build(self) -> Result<Fsm, FsmError> {
        let registry = self.registry.ok_or(BuildError::MissingRegistry)?;
        let store = self.store.ok_or(BuildError::MissingStore)?;

        let fsm = Fsm {
            registry,
            store,
            config: self.config.unwrap_or_default(),
            logger: self.logger.unwrap_or_else(|| Arc::new(EmptyLogger)),
            contexts: InstanceCache::new(),
            states: InstanceCache::new(),
            observers: Observers::new(),
            booted: Mutex::new(HashSet::new()),
        };

        let roots: Vec<StateId> = fsm.registry.roots().map(|def| def.id()).collect();
        for root in roots {
            fsm.boot(root)?;
        }

        Ok(fsm)
    }
}

impl Default for FsmBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The state machine engine.
pub struct Fsm {
    registry: StateRegistry,
    store: Arc<dyn RecordStore>,
    config: FsmConfig,
    logger: Arc<dyn Logger>,
    contexts: InstanceCache,
    states: InstanceCache,
    observers: Observers,
    booted: Mutex<HashSet<StateId>>,
}

impl Fsm {
    pub fn builder() -> FsmBuilder {
        FsmBuilder::new()
    }

    pub fn config(&self) -> &FsmConfig {
        &self.config
    }

    pub fn registry(&self) -> &StateRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Register an observer for events fired against `context`.
    pub fn observe<F>(&self, context: StateId, observer: F)
    where
        F: Fn(&FsmEvent) -> Result<(), FsmError> + Send + Sync + 'static,
    {
        self.observers.register(context, observer);
    }

    pub(crate) fn fire(&self, context: StateId, event: &FsmEvent) -> Result<(), FsmError> {
        self.observers.fire(context, event)
    }

    /// Boot a context type once: run boot hooks over its declared tree,
    /// then the consistency checker when debug is enabled. Idempotent.
    pub fn boot(&self, context: StateId) -> Result<(), FsmError> {
        let mut booted = self.booted.lock().expect("boot flag lock poisoned");
        if booted.contains(&context) {
            return Ok(());
        }

        let def = self.registry.get(context)?;
        let context_def = def
            .context()
            .ok_or(FsmError::NotAContext { state: context })?;

        self.boot_states(context_def.states(), context, &mut booted)?;

        if self.config.debug {
            Debugger::new(&self.registry, context).run()?;
        }

        booted.insert(context);
        Ok(())
    }

    fn boot_states(
        &self,
        states: &[StateId],
        root: StateId,
        booted: &mut HashSet<StateId>,
    ) -> Result<(), FsmError> {
        for state in states {
            let def = self.registry.get(*state)?;
            def.run_boot_hook(root);
            if let Some(nested) = def.context() {
                // Nested contexts boot as part of their parent's tree.
                if booted.insert(def.id()) {
                    self.boot_states(nested.states(), root, booted)?;
                }
            }
        }
        Ok(())
    }

    /// The memoized context node for a record, creating and loading it on
    /// first access.
    pub fn context_for(
        &self,
        record: &RecordHandle,
        context: StateId,
    ) -> Result<Arc<StateNode>, FsmError> {
        if let Some(node) = self.contexts.get(record) {
            return Ok(node);
        }

        let def = self.registry.get(context)?.clone();
        if !def.is_context() {
            return Err(FsmError::NotAContext { state: context });
        }
        self.boot(context)?;

        let node = Arc::new(StateNode::root(def));
        node.bind_record(record.clone());
        node.behavior().on_load(&StateView::new(self, &node))?;

        self.contexts.insert(record, &node);
        Ok(node)
    }

    fn context_def<'a>(&self, node: &'a StateNode) -> Result<&'a ContextDef, FsmError> {
        node.def()
            .context()
            .ok_or(FsmError::NotAContext { state: node.id() })
    }

    /// Resolve the context's current state: `None` when no record is bound,
    /// the stored identifier is null, or it maps to no registered state.
    /// Resolutions are memoized per record until [`Fsm::invalidate`].
    pub fn current_state(
        &self,
        context: &Arc<StateNode>,
    ) -> Result<Option<Arc<StateNode>>, FsmError> {
        self.context_def(context)?;

        let Some(record) = context.record() else {
            return Ok(None);
        };
        let Some(identifier) = record.current_state() else {
            return Ok(None);
        };

        if let Some(cached) = self.states.get(&record) {
            return Ok(Some(cached));
        }

        let Some(node) = self.materialize(context, &identifier)? else {
            return Ok(None);
        };
        self.states.insert(&record, &node);
        Ok(Some(node))
    }

    /// Resolve a state instance without touching the cache. Used to obtain
    /// a transient view distinct from the memoized current state.
    pub fn create_ephemeral(
        &self,
        context: &Arc<StateNode>,
        identifier: &str,
    ) -> Result<Option<Arc<StateNode>>, FsmError> {
        self.context_def(context)?;
        self.materialize(context, identifier)
    }

    fn materialize(
        &self,
        context: &Arc<StateNode>,
        identifier: &str,
    ) -> Result<Option<Arc<StateNode>>, FsmError> {
        let Some(def) = self.registry.resolve(identifier) else {
            return Ok(None);
        };
        let node = Arc::new(StateNode::child(def.clone(), context.clone()));

        if let Some(model) = def.model() {
            if let Some(parent_record) = context.record() {
                if let Some(record) = self.store.find_child(model, &parent_record)? {
                    node.bind_record(record);
                }
            }
        }

        node.behavior().on_load(&StateView::new(self, &node))?;
        Ok(Some(node))
    }

    /// The innermost state of the chain: recurses through nested contexts
    /// to the deepest resolvable state.
    pub fn deep_state(&self, context: &Arc<StateNode>) -> Result<Option<Arc<StateNode>>, FsmError> {
        let Some(state) = self.current_state(context)? else {
            return Ok(None);
        };
        if state.is_context() {
            if let Some(deeper) = self.deep_state(&state)? {
                return Ok(Some(deeper));
            }
        }
        Ok(Some(state))
    }

    /// The ordered chain of active states, outermost first.
    pub fn state_chain(&self, context: &Arc<StateNode>) -> Result<Vec<Arc<StateNode>>, FsmError> {
        let mut chain = Vec::new();
        let mut cursor = self.current_state(context)?;
        while let Some(node) = cursor {
            chain.push(node.clone());
            cursor = if node.is_context() {
                self.current_state(&node)?
            } else {
                None
            };
        }
        Ok(chain)
    }

    /// Evict the memoized state for a record. Called by the transition
    /// engine after the stored identifier changes; context-level caches are
    /// never touched.
    pub fn invalidate(&self, record: &RecordHandle) {
        self.states.remove(record);
    }

    /// Execute a transition on a context.
    ///
    /// Order of effects: validate target, fire `TransitionBefore` (an
    /// observer error vetoes with nothing mutated), `on_leave` on the
    /// current state, persist the new identifier, invalidate the cache,
    /// `on_enter` on the resolved new state, fire `Transition`, then hand
    /// the log (explicit or context default) to the logger exactly once.
    ///
    /// A logger failure propagates, but the transition has committed by
    /// then; the engine performs no rollback.
    pub fn transition_to(
        &self,
        context: &Arc<StateNode>,
        target: Option<StateId>,
        log: Option<PendingLog>,
    ) -> Result<Option<Arc<StateNode>>, FsmError> {
        let context_def = self.context_def(context)?;

        if let Some(target) = target {
            if !context_def.states().contains(&target) {
                return Err(FsmError::StateNotFound {
                    state: target,
                    context: context.id(),
                });
            }
        }

        let record = context.record().ok_or(FsmError::UnboundRecord {
            context: context.id(),
        })?;

        self.fire(
            context.id(),
            &FsmEvent::TransitionBefore {
                context: context.clone(),
                target,
            },
        )?;

        let from = self.current_state(context)?;
        if let Some(from) = &from {
            from.behavior().on_leave(&StateView::new(self, from))?;
        }

        let stored = target.map(|state| self.registry.alias_of(state).to_string());
        let mut fields = Fields::new();
        fields.insert(
            CURRENT_STATE_FIELD.to_string(),
            stored.map(Value::String).unwrap_or(Value::Null),
        );
        self.store.update(&record, fields)?;
        self.invalidate(&record);

        let to = self.current_state(context)?;
        if let Some(to) = &to {
            self.apply_data_policy(to)?;
            to.behavior().on_enter(&StateView::new(self, to))?;
        }

        self.fire(
            context.id(),
            &FsmEvent::Transition {
                context: context.clone(),
                from: from.clone(),
                to: to.clone(),
            },
        )?;

        let log = log.or_else(|| context_def.default_log());
        if let Some(log) = log {
            let log = log.complete(
                from.as_ref().map(|node| node.id()),
                to.as_ref().map(|node| node.id()),
            );
            self.logger_for(context).transition(context, &log)?;
        }

        Ok(to)
    }

    fn apply_data_policy(&self, node: &Arc<StateNode>) -> Result<(), FsmError> {
        match node.def().data_policy() {
            DataPolicy::Transient => Ok(()),
            DataPolicy::CreateOnEnter => {
                let fields = node.behavior().create_via(&StateView::new(self, node));
                self.create_dedicated(node, fields).map(|_| ())
            }
            DataPolicy::ReuseOnEnter => {
                if node.record().is_some() {
                    return Ok(());
                }
                let fields = node.behavior().create_via(&StateView::new(self, node));
                self.create_dedicated(node, fields).map(|_| ())
            }
        }
    }

    /// Create the dedicated record for a state node. Fails when one is
    /// already bound.
    pub fn create_record(
        &self,
        node: &Arc<StateNode>,
        fields: Fields,
    ) -> Result<RecordHandle, FsmError> {
        if node.record().is_some() {
            return Err(FsmError::RecordAlreadyExists { state: node.id() });
        }
        self.create_dedicated(node, fields)
    }

    fn create_dedicated(
        &self,
        node: &Arc<StateNode>,
        mut fields: Fields,
    ) -> Result<RecordHandle, FsmError> {
        let model = node
            .def()
            .model()
            .ok_or(FsmError::NoDedicatedModel { state: node.id() })?;

        if let Some(parent_record) = node.parent().and_then(|parent| parent.record()) {
            fields.insert(
                PARENT_TYPE_FIELD.to_string(),
                Value::String(parent_record.model().name().to_string()),
            );
            fields.insert(
                PARENT_ID_FIELD.to_string(),
                Value::String(parent_record.id().to_string()),
            );
        }

        let record = self.store.create(model, fields)?;
        node.bind_record(record.clone());

        if node.is_context() {
            self.logger_for(node).record_created(node, &record)?;
        }

        Ok(record)
    }

    /// Delete a node's bound record. `None` when no record was bound, the
    /// store's success flag otherwise.
    pub fn delete_record(&self, node: &Arc<StateNode>) -> Result<Option<bool>, FsmError> {
        let Some(record) = node.record() else {
            return Ok(None);
        };

        let deleted = self.store.delete(&record)?;
        node.unbind_record();

        if deleted && node.is_context() {
            self.logger_for(node).record_deleted(node, &record)?;
        }

        Ok(Some(deleted))
    }

    /// Run `on_reload` on a node, recursing into the current child state
    /// of contexts.
    pub fn reload(&self, node: &Arc<StateNode>) -> Result<(), FsmError> {
        node.behavior().on_reload(&StateView::new(self, node))?;
        if node.is_context() {
            if let Some(child) = self.current_state(node)? {
                self.reload(&child)?;
            }
        }
        Ok(())
    }

    /// Whether the context is in any of the given states under a comparison
    /// mode. `compare` falls back to the context's configured default, then
    /// the process default.
    pub fn is_in_state(
        &self,
        context: &Arc<StateNode>,
        spec: &[StateId],
        compare: Option<Compare>,
    ) -> Result<bool, FsmError> {
        let context_def = self.context_def(context)?;
        let compare = compare
            .or_else(|| context_def.compare())
            .unwrap_or(self.config.compare);

        let chain = self.state_chain(context)?;
        let defs: Vec<&StateDef> = chain.iter().map(|node| node.def().as_ref()).collect();
        Ok(compare::evaluate(&defs, spec, compare))
    }

    /// Deny with a configurable status unless [`Fsm::is_in_state`] holds.
    /// Status precedence: explicit argument, context configuration, process
    /// configuration.
    pub fn authorize(
        &self,
        context: &Arc<StateNode>,
        spec: &[StateId],
        compare: Option<Compare>,
        status: Option<u16>,
    ) -> Result<(), FsmError> {
        if self.is_in_state(context, spec, compare)? {
            return Ok(());
        }

        let status = status
            .or_else(|| {
                self.context_def(context)
                    .ok()
                    .and_then(|def| def.deny_status())
            })
            .unwrap_or(self.config.deny_status);

        Err(FsmError::AccessDenied { status })
    }

    pub(crate) fn logger_for(&self, node: &StateNode) -> Arc<dyn Logger> {
        node.def()
            .context()
            .and_then(|context| context.logger().cloned())
            .unwrap_or_else(|| self.logger.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::{MatchKind, Scope};
    use crate::core::StateBehavior;
    use crate::registry::{ContextBuilder, RegistryBuilder, StateBuilder};
    use crate::store::{MemoryStore, ModelId, StoreError};
    use serde_json::json;

    const ORDER: StateId = StateId::new("Order");
    const PENDING: StateId = StateId::new("Pending");
    const PAID: StateId = StateId::new("Paid");
    const SHIPPED: StateId = StateId::new("Shipped");
    const REFUNDED: StateId = StateId::new("Refunded");
    const PAYABLE: StateId = StateId::new("Payable");

    const ORDERS: ModelId = ModelId::new("orders");
    const PAYMENTS: ModelId = ModelId::new("payments");

    #[derive(Clone, Default)]
    struct Probe {
        entries: Arc<Mutex<Vec<String>>>,
    }

    impl Probe {
        fn push(&self, entry: String) {
            self.entries.lock().unwrap().push(entry);
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.entries.lock().unwrap())
        }
    }

    struct Traced {
        probe: Probe,
        tag: &'static str,
    }

    impl StateBehavior for Traced {
        fn on_enter(&self, view: &StateView<'_>) -> Result<(), FsmError> {
            let stored = view
                .context_record()
                .and_then(|record| record.current_state())
                .unwrap_or_default();
            self.probe.push(format!("enter:{}:{}", self.tag, stored));
            Ok(())
        }

        fn on_leave(&self, view: &StateView<'_>) -> Result<(), FsmError> {
            let stored = view
                .context_record()
                .and_then(|record| record.current_state())
                .unwrap_or_default();
            self.probe.push(format!("leave:{}:{}", self.tag, stored));
            Ok(())
        }
    }

    #[derive(Default)]
    struct CollectingLogger {
        transitions: Mutex<Vec<(Option<StateId>, Option<StateId>)>>,
    }

    impl Logger for CollectingLogger {
        fn transition(&self, _context: &StateNode, log: &PendingLog) -> Result<(), FsmError> {
            self.transitions.lock().unwrap().push((log.from, log.to));
            Ok(())
        }
    }

    struct FailingLogger;

    impl Logger for FailingLogger {
        fn transition(&self, _context: &StateNode, _log: &PendingLog) -> Result<(), FsmError> {
            Err(FsmError::Store(StoreError::Backend(
                "log sink offline".to_string(),
            )))
        }
    }

    fn traced(
        tag: &'static str,
        probe: &Probe,
    ) -> impl Fn() -> Box<dyn StateBehavior> + Send + Sync + 'static {
        let probe = probe.clone();
        move || {
            Box::new(Traced {
                probe: probe.clone(),
                tag,
            }) as Box<dyn StateBehavior>
        }
    }

    fn simple_registry(probe: &Probe) -> StateRegistry {
        RegistryBuilder::new()
            .register(
                StateBuilder::new(PENDING)
                    .alias("pending")
                    .capability(PAYABLE)
                    .behavior(traced("pending", probe))
                    .build()
                    .unwrap(),
            )
            .register(
                StateBuilder::new(PAID)
                    .alias("paid")
                    .behavior(traced("paid", probe))
                    .build()
                    .unwrap(),
            )
            .register(StateBuilder::new(SHIPPED).build().unwrap())
            .register(
                ContextBuilder::new(ORDER)
                    .model(ORDERS)
                    .states([PENDING, PAID, SHIPPED])
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap()
    }

    fn engine(registry: StateRegistry) -> (Fsm, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let fsm = Fsm::builder()
            .registry(registry)
            .store(store.clone())
            .build()
            .unwrap();
        (fsm, store)
    }

    fn simple() -> (Fsm, Arc<MemoryStore>, RecordHandle, Probe) {
        let probe = Probe::default();
        let (fsm, store) = engine(simple_registry(&probe));
        let record = store.create(ORDERS, Fields::new()).unwrap();
        (fsm, store, record, probe)
    }

    #[test]
    fn null_identifier_resolves_to_no_state() {
        let (fsm, _store, record, _probe) = simple();
        let order = fsm.context_for(&record, ORDER).unwrap();

        assert!(fsm.current_state(&order).unwrap().is_none());
        assert!(fsm.deep_state(&order).unwrap().is_none());
        assert!(fsm.state_chain(&order).unwrap().is_empty());

        for kind in [MatchKind::Exact, MatchKind::Subtype] {
            for scope in [Scope::Current, Scope::Deep, Scope::Chain, Scope::Building] {
                let compare = Compare::new(kind, scope);
                assert!(
                    !fsm.is_in_state(&order, &[PENDING], Some(compare)).unwrap(),
                    "expected false under {compare}"
                );
            }
        }
    }

    #[test]
    fn resolved_states_are_identity_stable() {
        let (fsm, _store, record, _probe) = simple();
        let order = fsm.context_for(&record, ORDER).unwrap();

        let entered = fsm.transition_to(&order, Some(PENDING), None).unwrap().unwrap();
        assert_eq!(entered.id(), PENDING);

        let first = fsm.current_state(&order).unwrap().unwrap();
        let second = fsm.current_state(&order).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&entered, &first));
    }

    #[test]
    fn transitions_never_leak_stale_cache_generations() {
        let (fsm, _store, record, _probe) = simple();
        let order = fsm.context_for(&record, ORDER).unwrap();

        let first = fsm.transition_to(&order, Some(PENDING), None).unwrap().unwrap();
        assert!(fsm.transition_to(&order, None, None).unwrap().is_none());
        assert!(fsm.current_state(&order).unwrap().is_none());

        let third = fsm.transition_to(&order, Some(PENDING), None).unwrap().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn leave_runs_before_the_mutation_and_enter_after() {
        let (fsm, _store, record, probe) = simple();
        let order = fsm.context_for(&record, ORDER).unwrap();

        fsm.transition_to(&order, Some(PENDING), None).unwrap();
        assert_eq!(probe.take(), vec!["enter:pending:pending"]);

        fsm.transition_to(&order, Some(PAID), None).unwrap();
        assert_eq!(
            probe.take(),
            vec!["leave:pending:pending", "enter:paid:paid"]
        );
    }

    #[test]
    fn undeclared_targets_abort_before_any_mutation() {
        let (fsm, _store, record, probe) = simple();
        let order = fsm.context_for(&record, ORDER).unwrap();
        fsm.transition_to(&order, Some(PENDING), None).unwrap();
        probe.take();

        let result = fsm.transition_to(&order, Some(REFUNDED), None);
        assert!(matches!(result, Err(FsmError::StateNotFound { .. })));
        assert_eq!(record.current_state().as_deref(), Some("pending"));
        assert!(probe.take().is_empty());
    }

    #[test]
    fn observers_veto_transitions_before_mutation() {
        let (fsm, _store, record, probe) = simple();
        let order = fsm.context_for(&record, ORDER).unwrap();

        fsm.observe(ORDER, |event| match event {
            FsmEvent::TransitionBefore { .. } => Err(FsmError::AccessDenied { status: 418 }),
            _ => Ok(()),
        });

        let result = fsm.transition_to(&order, Some(PENDING), None);
        assert!(matches!(result, Err(FsmError::AccessDenied { status: 418 })));
        assert_eq!(record.current_state(), None);
        assert!(probe.take().is_empty());
    }

    #[test]
    fn transition_events_carry_both_endpoints() {
        let (fsm, _store, record, _probe) = simple();
        let order = fsm.context_for(&record, ORDER).unwrap();

        let seen: Arc<Mutex<Vec<(Option<StateId>, Option<StateId>)>>> =
            Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            fsm.observe(ORDER, move |event| {
                if let FsmEvent::Transition { from, to, .. } = event {
                    seen.lock().unwrap().push((
                        from.as_ref().map(|node| node.id()),
                        to.as_ref().map(|node| node.id()),
                    ));
                }
                Ok(())
            });
        }

        fsm.transition_to(&order, Some(PENDING), None).unwrap();
        fsm.transition_to(&order, Some(PAID), None).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(None, Some(PENDING)), (Some(PENDING), Some(PAID))]
        );
    }

    #[test]
    fn explicit_logs_reach_the_logger_exactly_once() {
        let probe = Probe::default();
        let logger = Arc::new(CollectingLogger::default());
        let store = Arc::new(MemoryStore::new());
        let fsm = Fsm::builder()
            .registry(simple_registry(&probe))
            .store(store.clone())
            .logger(logger.clone())
            .build()
            .unwrap();
        let record = store.create(ORDERS, Fields::new()).unwrap();
        let order = fsm.context_for(&record, ORDER).unwrap();

        fsm.transition_to(&order, Some(PENDING), Some(PendingLog::new()))
            .unwrap();
        fsm.transition_to(&order, Some(PAID), None).unwrap();

        let transitions = logger.transitions.lock().unwrap().clone();
        assert_eq!(transitions, vec![(None, Some(PENDING))]);
    }

    #[test]
    fn context_default_logs_cover_unlogged_transitions() {
        let probe = Probe::default();
        let logger = Arc::new(CollectingLogger::default());
        let registry = RegistryBuilder::new()
            .register(StateBuilder::new(PENDING).build().unwrap())
            .register(StateBuilder::new(PAID).build().unwrap())
            .register(
                ContextBuilder::new(ORDER)
                    .model(ORDERS)
                    .states([PENDING, PAID])
                    .default_log(PendingLog::new)
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let store = Arc::new(MemoryStore::new());
        let fsm = Fsm::builder()
            .registry(registry)
            .store(store.clone())
            .logger(logger.clone())
            .build()
            .unwrap();
        let _ = probe;
        let record = store.create(ORDERS, Fields::new()).unwrap();
        let order = fsm.context_for(&record, ORDER).unwrap();

        fsm.transition_to(&order, Some(PENDING), None).unwrap();
        fsm.transition_to(&order, Some(PAID), None).unwrap();

        assert_eq!(logger.transitions.lock().unwrap().len(), 2);
    }

    #[test]
    fn logger_failures_surface_after_the_commit() {
        let probe = Probe::default();
        let store = Arc::new(MemoryStore::new());
        let fsm = Fsm::builder()
            .registry(simple_registry(&probe))
            .store(store.clone())
            .logger(Arc::new(FailingLogger))
            .build()
            .unwrap();
        let record = store.create(ORDERS, Fields::new()).unwrap();
        let order = fsm.context_for(&record, ORDER).unwrap();

        let result = fsm.transition_to(&order, Some(PENDING), Some(PendingLog::new()));

        assert!(result.is_err());
        assert_eq!(record.current_state().as_deref(), Some("pending"));
    }

    #[test]
    fn ephemeral_states_bypass_the_cache() {
        let (fsm, _store, record, _probe) = simple();
        let order = fsm.context_for(&record, ORDER).unwrap();
        fsm.transition_to(&order, Some(PENDING), None).unwrap();

        let cached = fsm.current_state(&order).unwrap().unwrap();
        let ephemeral = fsm.create_ephemeral(&order, "pending").unwrap().unwrap();
        let another = fsm.create_ephemeral(&order, "pending").unwrap().unwrap();

        assert!(!Arc::ptr_eq(&cached, &ephemeral));
        assert!(!Arc::ptr_eq(&ephemeral, &another));
        assert_eq!(ephemeral.id(), PENDING);
    }

    #[test]
    fn unknown_stored_identifiers_resolve_to_none() {
        let (fsm, store, _record, _probe) = simple();
        let mut fields = Fields::new();
        fields.insert(CURRENT_STATE_FIELD.to_string(), json!("Garbage"));
        let record = store.create(ORDERS, fields).unwrap();
        let order = fsm.context_for(&record, ORDER).unwrap();

        assert!(fsm.current_state(&order).unwrap().is_none());
    }

    #[test]
    fn unaliased_states_store_their_literal_name() {
        let (fsm, _store, record, _probe) = simple();
        let order = fsm.context_for(&record, ORDER).unwrap();

        fsm.transition_to(&order, Some(SHIPPED), None).unwrap();
        assert_eq!(record.current_state().as_deref(), Some("Shipped"));

        let resolved = fsm.current_state(&order).unwrap().unwrap();
        assert_eq!(resolved.id(), SHIPPED);
    }

    #[test]
    fn context_nodes_are_memoized_per_record() {
        let (fsm, store, record, _probe) = simple();

        let first = fsm.context_for(&record, ORDER).unwrap();
        let second = fsm.context_for(&record, ORDER).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other_record = store.create(ORDERS, Fields::new()).unwrap();
        let other = fsm.context_for(&other_record, ORDER).unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[test]
    fn boot_hooks_run_once_per_engine() {
        let count = Arc::new(Mutex::new(0));
        let registry = {
            let count = count.clone();
            RegistryBuilder::new()
                .register(
                    StateBuilder::new(PENDING)
                        .boot(move |context| {
                            assert_eq!(context, ORDER);
                            *count.lock().unwrap() += 1;
                        })
                        .build()
                        .unwrap(),
                )
                .register(
                    ContextBuilder::new(ORDER)
                        .states([PENDING])
                        .build()
                        .unwrap(),
                )
                .build()
                .unwrap()
        };
        let (fsm, _store) = engine(registry);

        assert_eq!(*count.lock().unwrap(), 1);
        fsm.boot(ORDER).unwrap();
        assert_eq!(*count.lock().unwrap(), 1);
    }

    struct PaymentData;

    impl StateBehavior for PaymentData {
        fn create_via(&self, _view: &StateView<'_>) -> Fields {
            let mut fields = Fields::new();
            fields.insert("amount".to_string(), json!(0));
            fields
        }
    }

    fn data_registry(policy: DataPolicy) -> StateRegistry {
        RegistryBuilder::new()
            .register(StateBuilder::new(PENDING).build().unwrap())
            .register(
                StateBuilder::new(PAID)
                    .model(PAYMENTS)
                    .data(policy)
                    .behavior(|| Box::new(PaymentData) as Box<dyn StateBehavior>)
                    .build()
                    .unwrap(),
            )
            .register(
                ContextBuilder::new(ORDER)
                    .model(ORDERS)
                    .states([PENDING, PAID])
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn create_on_enter_provisions_a_dedicated_record() {
        let (fsm, store) = engine(data_registry(DataPolicy::CreateOnEnter));
        let record = store.create(ORDERS, Fields::new()).unwrap();
        let order = fsm.context_for(&record, ORDER).unwrap();

        let paid = fsm.transition_to(&order, Some(PAID), None).unwrap().unwrap();
        let payment = paid.record().unwrap();

        assert_eq!(payment.model(), PAYMENTS);
        assert_eq!(payment.get("amount"), Some(json!(0)));
        assert_eq!(
            payment.parent_link(),
            Some(("orders".to_string(), record.id()))
        );
    }

    #[test]
    fn reuse_on_enter_keeps_the_existing_record() {
        let (fsm, store) = engine(data_registry(DataPolicy::ReuseOnEnter));
        let record = store.create(ORDERS, Fields::new()).unwrap();
        let order = fsm.context_for(&record, ORDER).unwrap();

        let first = fsm.transition_to(&order, Some(PAID), None).unwrap().unwrap();
        let first_payment = first.record().unwrap();

        fsm.transition_to(&order, Some(PENDING), None).unwrap();
        let second = fsm.transition_to(&order, Some(PAID), None).unwrap().unwrap();
        let second_payment = second.record().unwrap();

        assert_eq!(first_payment.id(), second_payment.id());
    }

    const SHIPPING: ModelId = ModelId::new("shipping");
    const TRANSIT: StateId = StateId::new("Transit");
    const TRACKED: StateId = StateId::new("Tracked");
    const DELIVERY: StateId = StateId::new("Delivery");
    const TRACKABLE: StateId = StateId::new("Trackable");

    fn nested_fixture() -> (Fsm, Arc<StateNode>) {
        let registry = RegistryBuilder::new()
            .register(StateBuilder::new(PENDING).build().unwrap())
            .register(
                StateBuilder::new(TRANSIT)
                    .capability(TRACKABLE)
                    .build()
                    .unwrap(),
            )
            .register(StateBuilder::new(TRACKED).build().unwrap())
            .register(
                ContextBuilder::new(DELIVERY)
                    .model(SHIPPING)
                    .states([TRANSIT, TRACKED])
                    .build()
                    .unwrap(),
            )
            .register(
                ContextBuilder::new(ORDER)
                    .model(ORDERS)
                    .states([PENDING, DELIVERY])
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let (fsm, store) = engine(registry);

        let mut fields = Fields::new();
        fields.insert(CURRENT_STATE_FIELD.to_string(), json!("Delivery"));
        let order = store.create(ORDERS, fields).unwrap();

        let mut fields = Fields::new();
        fields.insert(PARENT_TYPE_FIELD.to_string(), json!("orders"));
        fields.insert(PARENT_ID_FIELD.to_string(), json!(order.id().to_string()));
        fields.insert(CURRENT_STATE_FIELD.to_string(), json!("Transit"));
        store.create(SHIPPING, fields).unwrap();

        let context = fsm.context_for(&order, ORDER).unwrap();
        (fsm, context)
    }

    #[test]
    fn nested_contexts_resolve_full_chains() {
        let (fsm, order) = nested_fixture();

        let chain: Vec<StateId> = fsm
            .state_chain(&order)
            .unwrap()
            .iter()
            .map(|node| node.id())
            .collect();
        assert_eq!(chain, vec![DELIVERY, TRANSIT]);

        let deep = fsm.deep_state(&order).unwrap().unwrap();
        assert_eq!(deep.id(), TRANSIT);

        let current = fsm.current_state(&order).unwrap().unwrap();
        assert_eq!(current.id(), DELIVERY);
    }

    #[test]
    fn chain_scope_authorizes_against_capabilities() {
        let (fsm, order) = nested_fixture();

        // Subtype anywhere in the chain: the nested Transit state declares
        // the Trackable capability.
        assert!(fsm.is_in_state(&order, &[TRACKABLE], None).unwrap());
        assert!(!fsm.is_in_state(&order, &[TRACKED], None).unwrap());

        let exact_chain = Compare::new(MatchKind::Exact, Scope::Chain);
        assert!(!fsm.is_in_state(&order, &[TRACKABLE], Some(exact_chain)).unwrap());
        assert!(fsm.is_in_state(&order, &[TRANSIT], Some(exact_chain)).unwrap());

        fsm.authorize(&order, &[TRACKABLE], None, None).unwrap();
        let denied = fsm.authorize(&order, &[TRACKED], None, Some(410));
        assert!(matches!(denied, Err(FsmError::AccessDenied { status: 410 })));
    }

    #[test]
    fn building_scope_matches_the_exact_chain_shape() {
        let (fsm, order) = nested_fixture();
        let building = Compare::new(MatchKind::Exact, Scope::Building);

        assert!(fsm
            .is_in_state(&order, &[DELIVERY, TRANSIT], Some(building))
            .unwrap());
        assert!(!fsm.is_in_state(&order, &[DELIVERY], Some(building)).unwrap());
        assert!(!fsm
            .is_in_state(&order, &[TRANSIT, DELIVERY], Some(building))
            .unwrap());
        assert!(!fsm.is_in_state(&order, &[TRANSIT], Some(building)).unwrap());
    }

    #[test]
    fn compare_precedence_prefers_call_over_context_over_config() {
        let registry = RegistryBuilder::new()
            .register(
                StateBuilder::new(PENDING)
                    .capability(PAYABLE)
                    .build()
                    .unwrap(),
            )
            .register(
                ContextBuilder::new(ORDER)
                    .model(ORDERS)
                    .states([PENDING])
                    .compare(Compare::new(MatchKind::Exact, Scope::Current))
                    .deny_status(451)
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let (fsm, store) = engine(registry);
        let record = store.create(ORDERS, Fields::new()).unwrap();
        let order = fsm.context_for(&record, ORDER).unwrap();
        fsm.transition_to(&order, Some(PENDING), None).unwrap();

        // Context default (exact@current) ignores the capability...
        assert!(!fsm.is_in_state(&order, &[PAYABLE], None).unwrap());
        // ...but an explicit argument wins over it.
        let subtype = Compare::new(MatchKind::Subtype, Scope::Current);
        assert!(fsm.is_in_state(&order, &[PAYABLE], Some(subtype)).unwrap());

        // Deny status: context override, then explicit argument.
        let denied = fsm.authorize(&order, &[PAYABLE], None, None);
        assert!(matches!(denied, Err(FsmError::AccessDenied { status: 451 })));
        let denied = fsm.authorize(&order, &[PAYABLE], None, Some(400));
        assert!(matches!(denied, Err(FsmError::AccessDenied { status: 400 })));
    }

    #[test]
    fn create_record_rejects_double_binding() {
        let (fsm, store) = engine(data_registry(DataPolicy::Transient));
        let record = store.create(ORDERS, Fields::new()).unwrap();
        let order = fsm.context_for(&record, ORDER).unwrap();

        let paid = fsm.transition_to(&order, Some(PAID), None).unwrap().unwrap();
        fsm.create_record(&paid, Fields::new()).unwrap();

        let result = fsm.create_record(&paid, Fields::new());
        assert!(matches!(result, Err(FsmError::RecordAlreadyExists { .. })));
    }

    #[test]
    fn delete_record_reports_what_happened() {
        let (fsm, store) = engine(data_registry(DataPolicy::CreateOnEnter));
        let record = store.create(ORDERS, Fields::new()).unwrap();
        let order = fsm.context_for(&record, ORDER).unwrap();
        let paid = fsm.transition_to(&order, Some(PAID), None).unwrap().unwrap();

        assert_eq!(fsm.delete_record(&paid).unwrap(), Some(true));
        assert_eq!(fsm.delete_record(&paid).unwrap(), None);
    }
}

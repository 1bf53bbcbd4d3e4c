//! State and context definitions.
//!
//! A [`StateDef`] is the declared shape of one state type: its identity,
//! storage alias, capability set, dedicated model, behavior factory, edges
//! and (for contexts) a [`ContextDef`] with the declared child states.
//!
//! Definitions replace the original runtime class introspection with
//! explicit registration: everything a request handler or the boot-time
//! checker needs to know about a state is written down here, at
//! registration time, as plain data.

use crate::compare::Compare;
use crate::core::{DataPolicy, DefaultBehavior, StateBehavior, StateId};
use crate::engine::Fsm;
use crate::error::FsmError;
use crate::logging::{Logger, PendingLog};
use crate::registry::BuildError;
use crate::routes::{EdgeCall, EdgeHandler, EdgeRequest};
use crate::store::{ModelId, RecordHandle};
use serde_json::Value;
use std::sync::Arc;

pub(crate) type StateFactory = Box<dyn Fn() -> Box<dyn StateBehavior> + Send + Sync>;
pub(crate) type BootHook = Box<dyn Fn(StateId) + Send + Sync>;
pub(crate) type LogFactory = Box<dyn Fn() -> PendingLog + Send + Sync>;

/// Record finder used by edge dispatch when a route carries a record.
pub type FindRecordFn = Arc<dyn Fn(&Fsm, &EdgeRequest) -> Result<RecordHandle, FsmError> + Send + Sync>;

/// Route naming for an exposed edge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ApiName {
    /// Name the route after the edge.
    #[default]
    Auto,

    /// Register the route without a name.
    Anonymous,

    /// Explicit route name.
    Named(String),
}

/// Route exposure metadata for an edge.
#[derive(Clone, Debug)]
pub struct Api {
    uri: Option<String>,
    verb: &'static str,
    name: ApiName,
    middleware: Vec<String>,
}

impl Api {
    fn with_verb(verb: &'static str) -> Self {
        Api {
            uri: None,
            verb,
            name: ApiName::Auto,
            middleware: Vec::new(),
        }
    }

    pub fn get() -> Self {
        Api::with_verb("get")
    }

    pub fn post() -> Self {
        Api::with_verb("post")
    }

    pub fn put() -> Self {
        Api::with_verb("put")
    }

    pub fn patch() -> Self {
        Api::with_verb("patch")
    }

    pub fn delete() -> Self {
        Api::with_verb("delete")
    }

    /// Override the URI segment (defaults to the kebab-cased edge name).
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Name the registered route explicitly.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = ApiName::Named(name.into());
        self
    }

    /// Register the route without a name.
    pub fn anonymous(mut self) -> Self {
        self.name = ApiName::Anonymous;
        self
    }

    /// Append route-level middleware.
    pub fn middleware(mut self, middleware: impl Into<String>) -> Self {
        self.middleware.push(middleware.into());
        self
    }

    pub fn uri_override(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn verb(&self) -> &'static str {
        self.verb
    }

    pub fn route_name(&self) -> &ApiName {
        &self.name
    }

    pub fn middlewares(&self) -> &[String] {
        &self.middleware
    }
}

/// A declared edge: one invocable operation on a context or state.
pub struct EdgeDef {
    name: String,
    handler: EdgeHandler,
    api: Option<Api>,
    on_states: Vec<StateId>,
    transaction: Option<u32>,
    middleware: Vec<String>,
    without_record: bool,
    override_api: bool,
    without_authorize: bool,
}

impl EdgeDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn handler(&self) -> &EdgeHandler {
        &self.handler
    }

    /// Route exposure, if this edge is served over the route layer.
    pub fn api(&self) -> Option<&Api> {
        self.api.as_ref()
    }

    /// States the context must be in for this edge to be authorized.
    pub fn on_states(&self) -> &[StateId] {
        &self.on_states
    }

    /// Transaction attempts requested from the external dispatcher.
    pub fn transaction(&self) -> Option<u32> {
        self.transaction
    }

    pub fn middlewares(&self) -> &[String] {
        &self.middleware
    }

    /// The edge does not bind a record even when the context has a model.
    pub fn without_record(&self) -> bool {
        self.without_record
    }

    /// The edge shadows a same-named exposed edge on an ancestor.
    pub fn override_api(&self) -> bool {
        self.override_api
    }

    /// Skip the implicit current-state authorization on dispatch.
    pub fn without_authorize(&self) -> bool {
        self.without_authorize
    }
}

/// Builder for [`EdgeDef`].
pub struct EdgeBuilder {
    name: String,
    handler: Option<EdgeHandler>,
    api: Option<Api>,
    on_states: Vec<StateId>,
    transaction: Option<u32>,
    middleware: Vec<String>,
    without_record: bool,
    override_api: bool,
    without_authorize: bool,
}

impl EdgeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        EdgeBuilder {
            name: name.into(),
            handler: None,
            api: None,
            on_states: Vec::new(),
            transaction: None,
            middleware: Vec::new(),
            without_record: false,
            override_api: false,
            without_authorize: false,
        }
    }

    /// Set the edge handler (required).
    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&EdgeCall<'_>) -> Result<Value, FsmError> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Expose the edge as a route.
    pub fn api(mut self, api: Api) -> Self {
        self.api = Some(api);
        self
    }

    /// Require the context to be in one of these states.
    pub fn on_state(mut self, state: StateId) -> Self {
        self.on_states.push(state);
        self
    }

    pub fn on_states(mut self, states: impl IntoIterator<Item = StateId>) -> Self {
        self.on_states.extend(states);
        self
    }

    /// Ask the external dispatcher to wrap the handler in a transaction.
    pub fn transaction(mut self, attempts: u32) -> Self {
        self.transaction = Some(attempts);
        self
    }

    pub fn middleware(mut self, middleware: impl Into<String>) -> Self {
        self.middleware.push(middleware.into());
        self
    }

    pub fn without_record(mut self) -> Self {
        self.without_record = true;
        self
    }

    pub fn override_api(mut self) -> Self {
        self.override_api = true;
        self
    }

    pub fn without_authorize(mut self) -> Self {
        self.without_authorize = true;
        self
    }

    pub fn build(self) -> Result<EdgeDef, BuildError> {
        let handler = self.handler.ok_or(BuildError::MissingHandler {
            edge: self.name.clone(),
        })?;

        Ok(EdgeDef {
            name: self.name,
            handler,
            api: self.api,
            on_states: self.on_states,
            transaction: self.transaction,
            middleware: self.middleware,
            without_record: self.without_record,
            override_api: self.override_api,
            without_authorize: self.without_authorize,
        })
    }
}

/// Linear-path declaration on a context.
pub struct LinearDef {
    path: Option<Vec<StateId>>,
    end_state: Option<StateId>,
}

impl LinearDef {
    /// The declared path, if overridden. Defaults to declared-state order.
    pub fn path(&self) -> Option<&[StateId]> {
        self.path.as_deref()
    }

    /// Terminal state reached after the path is exhausted.
    pub fn end_state(&self) -> Option<StateId> {
        self.end_state
    }
}

/// Context-specific declaration: child states plus per-context overrides.
pub struct ContextDef {
    states: Vec<StateId>,
    suffix_uri: Option<String>,
    compare: Option<Compare>,
    deny_status: Option<u16>,
    with_middlewares: Vec<String>,
    linear: Option<LinearDef>,
    default_log: Option<LogFactory>,
    logger: Option<Arc<dyn Logger>>,
    find_record: Option<FindRecordFn>,
    use_record_route_param: bool,
}

impl ContextDef {
    /// Declared child states, in declaration order.
    pub fn states(&self) -> &[StateId] {
        &self.states
    }

    /// URI segment prefixed to nested state routes.
    pub fn suffix_uri(&self) -> Option<&str> {
        self.suffix_uri.as_deref()
    }

    /// Per-context comparison default.
    pub fn compare(&self) -> Option<Compare> {
        self.compare
    }

    /// Per-context deny status.
    pub fn deny_status(&self) -> Option<u16> {
        self.deny_status
    }

    /// Middleware applied to every route of this context.
    pub fn with_middlewares(&self) -> &[String] {
        &self.with_middlewares
    }

    pub fn linear(&self) -> Option<&LinearDef> {
        self.linear.as_ref()
    }

    /// Whether routes binding a record carry a `{record}` path segment.
    pub fn use_record_route_param(&self) -> bool {
        self.use_record_route_param
    }

    pub(crate) fn default_log(&self) -> Option<PendingLog> {
        self.default_log.as_ref().map(|factory| factory())
    }

    pub(crate) fn logger(&self) -> Option<&Arc<dyn Logger>> {
        self.logger.as_ref()
    }

    pub(crate) fn find_record(&self) -> Option<&FindRecordFn> {
        self.find_record.as_ref()
    }
}

/// The declared shape of one state type.
pub struct StateDef {
    id: StateId,
    alias: Option<String>,
    capabilities: Vec<StateId>,
    model: Option<ModelId>,
    data: DataPolicy,
    factory: StateFactory,
    boot: Option<BootHook>,
    edges: Vec<EdgeDef>,
    middleware: Vec<String>,
    context: Option<ContextDef>,
}

impl StateDef {
    pub fn id(&self) -> StateId {
        self.id
    }

    /// Storage alias, if mapped. Unmapped states are stored under their
    /// literal name.
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn capabilities(&self) -> &[StateId] {
        &self.capabilities
    }

    /// Whether this state is `target`, or declares it as a capability.
    pub fn satisfies(&self, target: StateId) -> bool {
        self.id == target || self.capabilities.contains(&target)
    }

    /// The model of this state's dedicated record, if it owns one. On a
    /// context definition this is the model of the bound record itself.
    pub fn model(&self) -> Option<ModelId> {
        self.model
    }

    pub fn data_policy(&self) -> DataPolicy {
        self.data
    }

    pub fn edges(&self) -> &[EdgeDef] {
        &self.edges
    }

    pub fn edge(&self, name: &str) -> Option<&EdgeDef> {
        self.edges.iter().find(|edge| edge.name() == name)
    }

    /// Class-level middleware (context definitions only; rejected on plain
    /// states by the boot-time checker).
    pub fn middlewares(&self) -> &[String] {
        &self.middleware
    }

    pub fn context(&self) -> Option<&ContextDef> {
        self.context.as_ref()
    }

    pub fn is_context(&self) -> bool {
        self.context.is_some()
    }

    pub(crate) fn make_behavior(&self) -> Box<dyn StateBehavior> {
        (self.factory)()
    }

    pub(crate) fn run_boot_hook(&self, context: StateId) {
        if let Some(hook) = &self.boot {
            hook(context);
        }
    }
}

/// Builder for plain (non-context) state definitions.
pub struct StateBuilder {
    id: StateId,
    alias: Option<String>,
    capabilities: Vec<StateId>,
    model: Option<ModelId>,
    data: DataPolicy,
    factory: Option<StateFactory>,
    boot: Option<BootHook>,
    edges: Vec<EdgeDef>,
    middleware: Vec<String>,
}

impl StateBuilder {
    pub fn new(id: StateId) -> Self {
        StateBuilder {
            id,
            alias: None,
            capabilities: Vec::new(),
            model: None,
            data: DataPolicy::Transient,
            factory: None,
            boot: None,
            edges: Vec::new(),
            middleware: Vec::new(),
        }
    }

    /// Map this state to a short storage alias.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Declare a capability satisfied by this state (subtype matching).
    pub fn capability(mut self, capability: StateId) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn capabilities(mut self, capabilities: impl IntoIterator<Item = StateId>) -> Self {
        self.capabilities.extend(capabilities);
        self
    }

    /// Declare a dedicated record model for this state.
    pub fn model(mut self, model: ModelId) -> Self {
        self.model = Some(model);
        self
    }

    /// Automatic dedicated-record management on enter.
    pub fn data(mut self, policy: DataPolicy) -> Self {
        self.data = policy;
        self
    }

    /// Behavior factory, invoked once per materialized node.
    pub fn behavior<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn StateBehavior> + Send + Sync + 'static,
    {
        self.factory = Some(Box::new(factory));
        self
    }

    /// Hook run when an owning context boots, receiving that context's id.
    pub fn boot<F>(mut self, hook: F) -> Self
    where
        F: Fn(StateId) + Send + Sync + 'static,
    {
        self.boot = Some(Box::new(hook));
        self
    }

    pub fn edge(mut self, edge: EdgeDef) -> Self {
        self.edges.push(edge);
        self
    }

    /// Class-level middleware.
    pub fn middleware(mut self, middleware: impl Into<String>) -> Self {
        self.middleware.push(middleware.into());
        self
    }

    pub fn build(self) -> Result<StateDef, BuildError> {
        finish_def(self, None)
    }
}

fn finish_def(base: StateBuilder, context: Option<ContextDef>) -> Result<StateDef, BuildError> {
    for (index, edge) in base.edges.iter().enumerate() {
        if base.edges[..index].iter().any(|prior| prior.name() == edge.name()) {
            return Err(BuildError::DuplicateEdge {
                state: base.id,
                edge: edge.name().to_string(),
            });
        }
    }

    Ok(StateDef {
        id: base.id,
        alias: base.alias,
        capabilities: base.capabilities,
        model: base.model,
        data: base.data,
        factory: base
            .factory
            .unwrap_or_else(|| Box::new(|| Box::new(DefaultBehavior))),
        boot: base.boot,
        edges: base.edges,
        middleware: base.middleware,
        context,
    })
}

/// Builder for context definitions (states that own a state machine).
pub struct ContextBuilder {
    base: StateBuilder,
    states: Vec<StateId>,
    suffix_uri: Option<String>,
    compare: Option<Compare>,
    deny_status: Option<u16>,
    with_middlewares: Vec<String>,
    linear: bool,
    path: Option<Vec<StateId>>,
    end_state: Option<StateId>,
    default_log: Option<LogFactory>,
    logger: Option<Arc<dyn Logger>>,
    find_record: Option<FindRecordFn>,
    use_record_route_param: bool,
}

impl ContextBuilder {
    pub fn new(id: StateId) -> Self {
        ContextBuilder {
            base: StateBuilder::new(id),
            states: Vec::new(),
            suffix_uri: None,
            compare: None,
            deny_status: None,
            with_middlewares: Vec::new(),
            linear: false,
            path: None,
            end_state: None,
            default_log: None,
            logger: None,
            find_record: None,
            use_record_route_param: true,
        }
    }

    /// Declare the permitted child states, in order.
    pub fn states(mut self, states: impl IntoIterator<Item = StateId>) -> Self {
        self.states.extend(states);
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.base = self.base.alias(alias);
        self
    }

    pub fn capability(mut self, capability: StateId) -> Self {
        self.base = self.base.capability(capability);
        self
    }

    pub fn model(mut self, model: ModelId) -> Self {
        self.base = self.base.model(model);
        self
    }

    pub fn data(mut self, policy: DataPolicy) -> Self {
        self.base = self.base.data(policy);
        self
    }

    pub fn behavior<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn StateBehavior> + Send + Sync + 'static,
    {
        self.base = self.base.behavior(factory);
        self
    }

    pub fn boot<F>(mut self, hook: F) -> Self
    where
        F: Fn(StateId) + Send + Sync + 'static,
    {
        self.base = self.base.boot(hook);
        self
    }

    pub fn edge(mut self, edge: EdgeDef) -> Self {
        self.base = self.base.edge(edge);
        self
    }

    pub fn middleware(mut self, middleware: impl Into<String>) -> Self {
        self.base = self.base.middleware(middleware);
        self
    }

    /// URI segment for nested routes under this context.
    pub fn suffix_uri(mut self, suffix: impl Into<String>) -> Self {
        self.suffix_uri = Some(suffix.into());
        self
    }

    /// Per-context comparison default.
    pub fn compare(mut self, compare: Compare) -> Self {
        self.compare = Some(compare);
        self
    }

    /// Per-context authorization deny status.
    pub fn deny_status(mut self, status: u16) -> Self {
        self.deny_status = Some(status);
        self
    }

    /// Middleware appended to every route of this context.
    pub fn with_middleware(mut self, middleware: impl Into<String>) -> Self {
        self.with_middlewares.push(middleware.into());
        self
    }

    /// Mark this context linear, pathing through its declared states.
    pub fn linear(mut self) -> Self {
        self.linear = true;
        self
    }

    /// Declare an explicit linear path over a subset of declared states.
    pub fn path(mut self, path: impl IntoIterator<Item = StateId>) -> Self {
        self.linear = true;
        self.path = Some(path.into_iter().collect());
        self
    }

    /// Terminal state entered when the linear path is exhausted.
    pub fn end_state(mut self, state: StateId) -> Self {
        self.linear = true;
        self.end_state = Some(state);
        self
    }

    /// Log every transition of this context, even without an explicit log.
    pub fn default_log<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> PendingLog + Send + Sync + 'static,
    {
        self.default_log = Some(Box::new(factory));
        self
    }

    /// Per-context logger override.
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Custom record finder for edge dispatch.
    pub fn find_record<F>(mut self, finder: F) -> Self
    where
        F: Fn(&Fsm, &EdgeRequest) -> Result<RecordHandle, FsmError> + Send + Sync + 'static,
    {
        self.find_record = Some(Arc::new(finder));
        self
    }

    /// Drop the `{record}` path segment from record-bound routes.
    pub fn without_record_route_param(mut self) -> Self {
        self.use_record_route_param = false;
        self
    }

    pub fn build(self) -> Result<StateDef, BuildError> {
        let id = self.base.id;

        if let Some(path) = &self.path {
            for state in path {
                if !self.states.contains(state) {
                    return Err(BuildError::PathStateNotDeclared {
                        context: id,
                        state: *state,
                    });
                }
            }
        }
        if let Some(end) = self.end_state {
            if !self.states.contains(&end) {
                return Err(BuildError::EndStateNotDeclared { context: id, state: end });
            }
        }

        let linear = self.linear.then_some(LinearDef {
            path: self.path,
            end_state: self.end_state,
        });

        finish_def(
            self.base,
            Some(ContextDef {
                states: self.states,
                suffix_uri: self.suffix_uri,
                compare: self.compare,
                deny_status: self.deny_status,
                with_middlewares: self.with_middlewares,
                linear,
                default_log: self.default_log,
                logger: self.logger,
                find_record: self.find_record,
                use_record_route_param: self.use_record_route_param,
            }),
        )
    }
}

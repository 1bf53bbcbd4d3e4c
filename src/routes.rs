//! Route declarations and edge dispatch.
//!
//! The engine does not speak HTTP. It produces an ordered list of
//! [`RouteDeclaration`]s (verb, URI template, middleware, dispatch
//! defaults) for an external router to register, and it resolves incoming
//! invocations back to the right container and handler via
//! [`Fsm::invoke_edge`]. Everything protocol-shaped (verbs as strings, URI
//! templates, status codes) is data handed across the boundary.
//!
//! URI composition for an exposed edge is:
//! `prefix / {record} / nested-context-segments / edge-segment`, where the
//! `{record}` parameter appears only for edges that bind a record, and the
//! edge segment defaults to the kebab-cased edge name.

use crate::core::{StateId, StateNode, StateView};
use crate::engine::{Fsm, FsmEvent};
use crate::error::FsmError;
use crate::registry::{ApiName, ContextDef, EdgeDef, StateDef};
use crate::store::{RecordHandle, RecordId};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Handler invoked when an edge is dispatched.
pub type EdgeHandler = Arc<dyn Fn(&EdgeCall<'_>) -> Result<Value, FsmError> + Send + Sync>;

/// The request data an edge handler sees: route parameters and a payload.
#[derive(Clone, Debug, Default)]
pub struct EdgeRequest {
    pub params: BTreeMap<String, String>,
    pub payload: Value,
}

impl EdgeRequest {
    pub fn new() -> Self {
        EdgeRequest::default()
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Everything a handler gets: the engine, the (possibly record-bound)
/// context node, the container the edge resolved onto, and the request.
pub struct EdgeCall<'a> {
    pub fsm: &'a Fsm,
    pub context: Arc<StateNode>,
    pub container: Arc<StateNode>,
    pub request: &'a EdgeRequest,
}

/// One externally-registrable route.
#[derive(Clone, Debug)]
pub struct RouteDeclaration {
    pub verb: &'static str,
    pub uri: String,
    pub name: Option<String>,
    pub context: StateId,
    /// The declaring state, `None` for context-level edges.
    pub state: Option<StateId>,
    pub edge: String,
    pub middleware: Vec<String>,
    pub with_record: bool,
    pub transaction: Option<u32>,
}

/// Consumer of route declarations (a router adapter).
pub trait RouteSink {
    fn register(&mut self, route: RouteDeclaration);
}

impl RouteSink for Vec<RouteDeclaration> {
    fn register(&mut self, route: RouteDeclaration) {
        self.push(route);
    }
}

/// Kebab-case a state or edge name: `print_state` and `PrintState` both
/// become `print-state`.
fn kebab(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (index, ch) in name.chars().enumerate() {
        if ch == '_' {
            out.push('-');
        } else if ch.is_ascii_uppercase() {
            if index > 0 {
                out.push('-');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

struct RouteCollector<'a> {
    fsm: &'a Fsm,
    root: &'a Arc<StateDef>,
    context_def: &'a ContextDef,
    prefix: Option<&'a str>,
    name_prefix: Option<&'a str>,
    seen: Vec<String>,
    routes: Vec<RouteDeclaration>,
}

impl RouteCollector<'_> {
    fn declare(
        &mut self,
        owner: &StateDef,
        state: Option<StateId>,
        state_prefix: &str,
        edge: &EdgeDef,
    ) -> Result<(), FsmError> {
        let api = match edge.api() {
            Some(api) => api,
            None => return Ok(()),
        };

        let with_record = self.root.model().is_some() && !edge.without_record();

        let mut parts: Vec<String> = Vec::new();
        if let Some(prefix) = self.prefix {
            parts.push(prefix.trim_matches('/').to_string());
        }
        if with_record && self.context_def.use_record_route_param() {
            parts.push("{record}".to_string());
        }
        if !state_prefix.is_empty() {
            parts.push(state_prefix.to_string());
        }
        parts.push(
            api.uri_override()
                .map(|uri| uri.trim_matches('/').to_string())
                .unwrap_or_else(|| kebab(edge.name())),
        );
        let uri = parts.join("/");

        if self.seen.contains(&uri) {
            return Err(FsmError::ConflictDetected(format!(
                "api route [{uri}] is already registered in context [{}], at [{}::{}]",
                self.root.id(),
                owner.id(),
                edge.name(),
            )));
        }
        self.seen.push(uri.clone());

        let name = match api.route_name() {
            ApiName::Anonymous => None,
            ApiName::Named(name) => Some(format!("{}{name}", self.name_prefix.unwrap_or(""))),
            ApiName::Auto => Some(format!(
                "{}{}",
                self.name_prefix.unwrap_or(""),
                edge.name()
            )),
        };

        let mut middleware: Vec<String> = Vec::new();
        middleware.extend(api.middlewares().iter().cloned());
        middleware.extend(edge.middlewares().iter().cloned());
        middleware.extend(owner.middlewares().iter().cloned());
        if owner.id() != self.root.id() {
            middleware.extend(self.root.middlewares().iter().cloned());
        }
        middleware.extend(self.context_def.with_middlewares().iter().cloned());

        self.routes.push(RouteDeclaration {
            verb: api.verb(),
            uri,
            name,
            context: self.root.id(),
            state,
            edge: edge.name().to_string(),
            middleware,
            with_record,
            transaction: edge.transaction(),
        });
        Ok(())
    }

    fn walk(
        &mut self,
        states: &[StateId],
        state_prefix: &str,
        visited: &mut HashSet<StateId>,
    ) -> Result<(), FsmError> {
        for state in states {
            let def = self.fsm.registry().get(*state)?.clone();

            for edge in def.edges() {
                self.declare(&def, Some(*state), state_prefix, edge)?;
            }

            if let Some(nested) = def.context() {
                if visited.insert(*state) {
                    let segment = nested
                        .suffix_uri()
                        .map(|uri| uri.trim_matches('/').to_string())
                        .unwrap_or_else(|| kebab(state.name()));
                    let child_prefix = if state_prefix.is_empty() {
                        segment
                    } else {
                        format!("{state_prefix}/{segment}")
                    };
                    self.walk(nested.states(), &child_prefix, visited)?;
                }
            }
        }
        Ok(())
    }
}

impl Fsm {
    /// Produce the route declarations of a context tree, feeding them to
    /// `sink` in declaration order (context edges first, then states,
    /// depth-first). Fails with `ConflictDetected` on duplicate URIs.
    pub fn define_routes(
        &self,
        context: StateId,
        prefix: Option<&str>,
        name_prefix: Option<&str>,
        sink: &mut dyn RouteSink,
    ) -> Result<(), FsmError> {
        self.boot(context)?;

        let root = self.registry().get(context)?.clone();
        let context_def = root
            .context()
            .ok_or(FsmError::NotAContext { state: context })?;

        let mut collector = RouteCollector {
            fsm: self,
            root: &root,
            context_def,
            prefix,
            name_prefix,
            seen: Vec::new(),
            routes: Vec::new(),
        };

        for edge in root.edges() {
            collector.declare(&root, None, "", edge)?;
        }

        let mut visited = HashSet::from([context]);
        collector.walk(context_def.states(), "", &mut visited)?;

        for route in collector.routes {
            sink.register(route);
        }
        Ok(())
    }

    /// Dispatch one edge invocation, mirroring what a router adapter does
    /// with a matched [`RouteDeclaration`]: bind the record (when the route
    /// carries one), resolve the container, authorize against the current
    /// state, run load/reload hooks and hand off to the handler.
    pub fn invoke_edge(
        &self,
        route: &RouteDeclaration,
        request: &EdgeRequest,
    ) -> Result<Value, FsmError> {
        self.boot(route.context)?;

        let root = self.registry().get(route.context)?.clone();
        let context_def = root.context().ok_or(FsmError::NotAContext {
            state: route.context,
        })?;

        let context = Arc::new(StateNode::root(root.clone()));
        self.fire(
            route.context,
            &FsmEvent::RoutePreparing {
                context: context.clone(),
            },
        )?;

        if route.with_record {
            let record = match context_def.find_record() {
                Some(finder) => finder(self, request)?,
                None => self.default_find_record(&root, request)?,
            };
            context.bind_record(record);
        }

        let container = match route.state {
            Some(state) => {
                let alias = self.registry().alias_of(state).to_string();
                let node = self.create_ephemeral(&context, &alias)?.ok_or_else(|| {
                    FsmError::EdgeNotFound {
                        edge: route.edge.clone(),
                        target: route.context,
                    }
                })?;

                if route.with_record {
                    let skip_authorize = node
                        .def()
                        .edge(&route.edge)
                        .is_some_and(|edge| edge.without_authorize());
                    if !skip_authorize {
                        self.authorize(&context, &[state], None, None)?;
                    }
                    if node.is_context() {
                        self.api_target(&node, &route.edge)?
                    } else {
                        node
                    }
                } else {
                    node
                }
            }
            None => {
                if route.with_record {
                    if let Some(edge) = root.edge(&route.edge) {
                        if !edge.on_states().is_empty() {
                            self.authorize(&context, edge.on_states(), None, None)?;
                        }
                    }
                    self.api_target(&context, &route.edge)?
                } else {
                    context.clone()
                }
            }
        };

        let Some(edge_def) = container.def().edge(&route.edge) else {
            return Err(FsmError::EdgeNotFound {
                edge: route.edge.clone(),
                target: container.id(),
            });
        };

        context.behavior().on_load(&StateView::new(self, &context))?;
        if route.with_record {
            self.reload(&context)?;
        }

        self.fire(
            route.context,
            &FsmEvent::RouteInvoking {
                context: context.clone(),
                container: container.clone(),
                edge: route.edge.clone(),
            },
        )?;

        let call = EdgeCall {
            fsm: self,
            context: context.clone(),
            container: container.clone(),
            request,
        };
        let response = (edge_def.handler())(&call)?;

        let logger = self.logger_for(&context);
        logger.invoked(&context, &container, &route.edge)?;
        logger.requested(&context, request, &response)?;

        Ok(response)
    }

    /// Walk current states downward while they override the named edge,
    /// landing on the deepest overriding state (or the starting node).
    fn api_target(&self, node: &Arc<StateNode>, edge: &str) -> Result<Arc<StateNode>, FsmError> {
        let Some(state) = self.current_state(node)? else {
            return Ok(node.clone());
        };
        let Some(state_edge) = state.def().edge(edge) else {
            return Ok(node.clone());
        };
        if !state_edge.override_api() {
            return Ok(node.clone());
        }
        if state.is_context() {
            return self.api_target(&state, edge);
        }
        Ok(state)
    }

    fn default_find_record(
        &self,
        root: &Arc<StateDef>,
        request: &EdgeRequest,
    ) -> Result<RecordHandle, FsmError> {
        let model = root
            .model()
            .ok_or(FsmError::NoDedicatedModel { state: root.id() })?;
        let value = request
            .params
            .get("record")
            .cloned()
            .unwrap_or_else(|| "(missing)".to_string());
        let id = RecordId::parse(&value).ok_or(FsmError::InvalidRecordId { value })?;
        Ok(self.store().find(model, id)?)
    }
}

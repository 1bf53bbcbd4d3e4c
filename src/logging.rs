//! Transition logging.
//!
//! The engine does not persist state history itself. Each transition may
//! carry a [`PendingLog`], an ephemeral builder of free-form attributes,
//! which the engine completes with the from/to states and hands to the
//! context's [`Logger`] exactly once before discarding it.
//!
//! The default logger is [`EmptyLogger`], which drops everything.
//! [`TracingLogger`] emits structured `tracing` events instead. A logger
//! failure is not caught by the engine: it propagates to the caller after
//! the transition has already committed.

use crate::core::{StateId, StateNode};
use crate::error::FsmError;
use crate::routes::EdgeRequest;
use crate::store::RecordHandle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// An in-flight transition log entry.
///
/// ```rust
/// use stateline::PendingLog;
/// use serde_json::json;
///
/// let log = PendingLog::new()
///     .with("reason", json!("payment confirmed"))
///     .additional("operator", json!("cron"));
///
/// assert_eq!(log.attributes["reason"], json!("payment confirmed"));
/// ```
#[derive(Clone, Debug, Serialize)]
pub struct PendingLog {
    pub id: Uuid,
    pub from: Option<StateId>,
    pub to: Option<StateId>,
    pub attributes: Map<String, Value>,
    pub additional: Map<String, Value>,
    pub recorded_at: DateTime<Utc>,
}

impl PendingLog {
    pub fn new() -> Self {
        PendingLog {
            id: Uuid::new_v4(),
            from: None,
            to: None,
            attributes: Map::new(),
            additional: Map::new(),
            recorded_at: Utc::now(),
        }
    }

    /// Attach a primary attribute.
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Attach secondary metadata.
    pub fn additional(mut self, key: impl Into<String>, value: Value) -> Self {
        self.additional.insert(key.into(), value);
        self
    }

    pub(crate) fn complete(mut self, from: Option<StateId>, to: Option<StateId>) -> Self {
        self.from = from;
        self.to = to;
        self
    }
}

impl Default for PendingLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Sink for engine activity. All methods default to no-ops; implementations
/// override what they care about.
pub trait Logger: Send + Sync {
    /// A transition committed. Called exactly once per transition carrying
    /// a log, after the stored identifier changed.
    fn transition(&self, context: &StateNode, log: &PendingLog) -> Result<(), FsmError> {
        let _ = (context, log);
        Ok(())
    }

    /// A context created a record it owns.
    fn record_created(&self, context: &StateNode, record: &RecordHandle) -> Result<(), FsmError> {
        let _ = (context, record);
        Ok(())
    }

    /// A context deleted a record it owned.
    fn record_deleted(&self, context: &StateNode, record: &RecordHandle) -> Result<(), FsmError> {
        let _ = (context, record);
        Ok(())
    }

    /// An edge was dispatched on a container.
    fn invoked(&self, context: &StateNode, container: &StateNode, edge: &str) -> Result<(), FsmError> {
        let _ = (context, container, edge);
        Ok(())
    }

    /// A request finished dispatching, with its response payload.
    fn requested(
        &self,
        context: &StateNode,
        request: &EdgeRequest,
        response: &Value,
    ) -> Result<(), FsmError> {
        let _ = (context, request, response);
        Ok(())
    }
}

/// The default logger: drops everything.
pub struct EmptyLogger;

impl Logger for EmptyLogger {}

/// Logger emitting structured `tracing` events at info level.
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn transition(&self, context: &StateNode, log: &PendingLog) -> Result<(), FsmError> {
        tracing::info!(
            target: "stateline",
            context = %context.id(),
            from = log.from.map(|s| s.name()),
            to = log.to.map(|s| s.name()),
            log_id = %log.id,
            "transition"
        );
        Ok(())
    }

    fn record_created(&self, context: &StateNode, record: &RecordHandle) -> Result<(), FsmError> {
        tracing::info!(
            target: "stateline",
            context = %context.id(),
            model = %record.model(),
            record = %record.id(),
            "record created"
        );
        Ok(())
    }

    fn record_deleted(&self, context: &StateNode, record: &RecordHandle) -> Result<(), FsmError> {
        tracing::info!(
            target: "stateline",
            context = %context.id(),
            model = %record.model(),
            record = %record.id(),
            "record deleted"
        );
        Ok(())
    }

    fn invoked(&self, context: &StateNode, container: &StateNode, edge: &str) -> Result<(), FsmError> {
        tracing::info!(
            target: "stateline",
            context = %context.id(),
            container = %container.id(),
            edge,
            "edge invoked"
        );
        Ok(())
    }

    fn requested(
        &self,
        context: &StateNode,
        request: &EdgeRequest,
        response: &Value,
    ) -> Result<(), FsmError> {
        tracing::info!(
            target: "stateline",
            context = %context.id(),
            params = ?request.params,
            response = %response,
            "request served"
        );
        Ok(())
    }
}

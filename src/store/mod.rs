//! Record storage interface.
//!
//! The engine only ever touches a record through this narrow surface: it
//! reads and writes the `current_state` field, follows the `parent_type` /
//! `parent_id` link when a state owns a dedicated row, and asks the backing
//! store to create, update or delete rows. Everything else about persistence
//! (schema, relations, querying) belongs to the embedding application.
//!
//! [`MemoryStore`] is a complete in-process implementation used by the test
//! suite and by embedders that do not need durable storage.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

/// Field holding the stored state identifier on a record.
pub const CURRENT_STATE_FIELD: &str = "current_state";

/// Field naming the model of the record owning a dedicated state row.
pub const PARENT_TYPE_FIELD: &str = "parent_type";

/// Field holding the identifier of the owning record.
pub const PARENT_ID_FIELD: &str = "parent_id";

/// A record's field map. Keys are column names, values are JSON values.
pub type Fields = BTreeMap<String, Value>;

/// Names a model (a table, a collection) in the backing store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ModelId(&'static str);

impl ModelId {
    pub const fn new(name: &'static str) -> Self {
        ModelId(name)
    }

    pub fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Opaque record identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        RecordId(Uuid::new_v4())
    }

    /// Parse an identifier from its string form (route parameters, stored
    /// link fields).
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(RecordId)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A live handle to a persisted record.
///
/// Handles are shared (`Arc`) between the store, the engine's caches and any
/// application code holding the record. The engine keys its per-record state
/// cache on handle identity, so a record must be represented by one handle
/// for the duration of its in-process life.
pub struct Record {
    model: ModelId,
    id: RecordId,
    fields: Mutex<Fields>,
}

pub type RecordHandle = Arc<Record>;

impl Record {
    pub fn new(model: ModelId, id: RecordId, fields: Fields) -> Self {
        Record {
            model,
            id,
            fields: Mutex::new(fields),
        }
    }

    pub fn model(&self) -> ModelId {
        self.model
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Read a single field. `Null` is reported as absent.
    pub fn get(&self, field: &str) -> Option<Value> {
        let fields = self.fields.lock().expect("record field lock poisoned");
        match fields.get(field) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.clone()),
        }
    }

    /// Snapshot of all fields.
    pub fn fields(&self) -> Fields {
        self.fields.lock().expect("record field lock poisoned").clone()
    }

    /// The stored state identifier, if any.
    pub fn current_state(&self) -> Option<String> {
        match self.get(CURRENT_STATE_FIELD) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// The owning-record link, if this record is a dedicated state row.
    pub fn parent_link(&self) -> Option<(String, RecordId)> {
        let model = match self.get(PARENT_TYPE_FIELD) {
            Some(Value::String(s)) => s,
            _ => return None,
        };
        let id = match self.get(PARENT_ID_FIELD) {
            Some(Value::String(s)) => RecordId::parse(&s)?,
            _ => return None,
        };
        Some((model, id))
    }

    /// Merge a field update into the handle. Store implementations call this
    /// after persisting so the in-process view matches the backend.
    pub fn apply(&self, update: &Fields) {
        let mut fields = self.fields.lock().expect("record field lock poisoned");
        for (key, value) in update {
            fields.insert(key.clone(), value.clone());
        }
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("model", &self.model)
            .field("id", &self.id)
            .finish()
    }
}

/// Storage failures surfaced to the engine.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record [{id}] of model [{model}] was not found")]
    NotFound { model: ModelId, id: RecordId },

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// The persistence interface consumed by the engine.
pub trait RecordStore: Send + Sync {
    /// Load a record by model and identifier.
    fn find(&self, model: ModelId, id: RecordId) -> Result<RecordHandle, StoreError>;

    /// Load the dedicated row owned by `parent`, if one exists.
    fn find_child(
        &self,
        model: ModelId,
        parent: &Record,
    ) -> Result<Option<RecordHandle>, StoreError>;

    /// Create a new record.
    fn create(&self, model: ModelId, fields: Fields) -> Result<RecordHandle, StoreError>;

    /// Persist a field update onto an existing record.
    fn update(&self, record: &Record, fields: Fields) -> Result<(), StoreError>;

    /// Delete a record, reporting whether a row was actually removed.
    fn delete(&self, record: &Record) -> Result<bool, StoreError>;
}

/// In-memory [`RecordStore`].
pub struct MemoryStore {
    rows: Mutex<HashMap<(ModelId, RecordId), RecordHandle>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            rows: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for MemoryStore {
    fn find(&self, model: ModelId, id: RecordId) -> Result<RecordHandle, StoreError> {
        let rows = self.rows.lock().expect("store lock poisoned");
        rows.get(&(model, id))
            .cloned()
            .ok_or(StoreError::NotFound { model, id })
    }

    fn find_child(
        &self,
        model: ModelId,
        parent: &Record,
    ) -> Result<Option<RecordHandle>, StoreError> {
        let rows = self.rows.lock().expect("store lock poisoned");
        let found = rows.values().find(|row| {
            row.model() == model
                && row
                    .parent_link()
                    .is_some_and(|(p_model, p_id)| {
                        p_model == parent.model().name() && p_id == parent.id()
                    })
        });
        Ok(found.cloned())
    }

    fn create(&self, model: ModelId, fields: Fields) -> Result<RecordHandle, StoreError> {
        let id = RecordId::generate();
        let record = Arc::new(Record::new(model, id, fields));
        let mut rows = self.rows.lock().expect("store lock poisoned");
        rows.insert((model, id), record.clone());
        Ok(record)
    }

    fn update(&self, record: &Record, fields: Fields) -> Result<(), StoreError> {
        record.apply(&fields);
        Ok(())
    }

    fn delete(&self, record: &Record) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock().expect("store lock poisoned");
        Ok(rows.remove(&(record.model(), record.id())).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ORDERS: ModelId = ModelId::new("orders");
    const PAYMENTS: ModelId = ModelId::new("payments");

    #[test]
    fn created_records_are_findable() {
        let store = MemoryStore::new();
        let record = store.create(ORDERS, Fields::new()).unwrap();

        let found = store.find(ORDERS, record.id()).unwrap();
        assert!(Arc::ptr_eq(&record, &found));
    }

    #[test]
    fn find_reports_missing_records() {
        let store = MemoryStore::new();

        let result = store.find(ORDERS, RecordId::generate());
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn update_is_visible_through_the_handle() {
        let store = MemoryStore::new();
        let record = store.create(ORDERS, Fields::new()).unwrap();

        let mut fields = Fields::new();
        fields.insert(CURRENT_STATE_FIELD.into(), json!("pending"));
        store.update(&record, fields).unwrap();

        assert_eq!(record.current_state().as_deref(), Some("pending"));
    }

    #[test]
    fn null_state_reads_as_none() {
        let store = MemoryStore::new();
        let record = store.create(ORDERS, Fields::new()).unwrap();

        let mut fields = Fields::new();
        fields.insert(CURRENT_STATE_FIELD.into(), Value::Null);
        store.update(&record, fields).unwrap();

        assert_eq!(record.current_state(), None);
    }

    #[test]
    fn find_child_follows_the_parent_link() {
        let store = MemoryStore::new();
        let order = store.create(ORDERS, Fields::new()).unwrap();

        let mut fields = Fields::new();
        fields.insert(PARENT_TYPE_FIELD.into(), json!(order.model().name()));
        fields.insert(PARENT_ID_FIELD.into(), json!(order.id().to_string()));
        let payment = store.create(PAYMENTS, fields).unwrap();

        let found = store.find_child(PAYMENTS, &order).unwrap().unwrap();
        assert!(Arc::ptr_eq(&payment, &found));

        let other = store.create(ORDERS, Fields::new()).unwrap();
        assert!(store.find_child(PAYMENTS, &other).unwrap().is_none());
    }

    #[test]
    fn delete_reports_whether_a_row_existed() {
        let store = MemoryStore::new();
        let record = store.create(ORDERS, Fields::new()).unwrap();

        assert!(store.delete(&record).unwrap());
        assert!(!store.delete(&record).unwrap());
    }

    #[test]
    fn record_id_round_trips_through_strings() {
        let id = RecordId::generate();
        assert_eq!(RecordId::parse(&id.to_string()), Some(id));
        assert_eq!(RecordId::parse("not-an-id"), None);
    }
}

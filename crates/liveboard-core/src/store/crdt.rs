//! Loro-backed store.
//!
//! # Schema
//!
//! ```text
//! LoroDoc
//! └── "canvasObjects": LoroMap<ObjectId, Value>
//! ```
//!
//! Each record is stored as a single plain value (not a nested container), so
//! concurrent writes to one id resolve last-writer-wins for the whole record.

use super::{Document, ReplicatedStore, StoreError, StoreResult, Subscribers};
use crate::codec::ShapeRecord;
use crate::shapes::ObjectId;
use loro::{ExportMode, LoroDoc, LoroMap, LoroValue, ValueOrContainer, VersionVector};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::sync::{Mutex, MutexGuard};

/// Key for the object map in the Loro document.
pub const OBJECTS_KEY: &str = "canvasObjects";

/// A CRDT document holding the Document, exportable as Loro update bytes.
pub struct LoroStore {
    doc: Mutex<LoroDoc>,
    subscribers: Subscribers,
}

impl LoroStore {
    /// Create a new empty store with a random peer id.
    pub fn new() -> Self {
        Self {
            doc: Mutex::new(LoroDoc::new()),
            subscribers: Subscribers::default(),
        }
    }

    /// Create a store with a fixed peer id (deterministic conflict order).
    pub fn with_peer_id(peer_id: u64) -> StoreResult<Self> {
        let doc = LoroDoc::new();
        doc.set_peer_id(peer_id)
            .map_err(|e| StoreError::Crdt(e.to_string()))?;
        Ok(Self {
            doc: Mutex::new(doc),
            subscribers: Subscribers::default(),
        })
    }

    /// Create a store from a snapshot or update blob.
    pub fn from_snapshot(bytes: &[u8]) -> StoreResult<Self> {
        let store = Self::new();
        store.import(bytes)?;
        Ok(store)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, LoroDoc>> {
        self.doc.lock().map_err(|e| StoreError::Lock(e.to_string()))
    }

    fn objects(doc: &LoroDoc) -> LoroMap {
        doc.get_map(OBJECTS_KEY)
    }

    /// Current version vector.
    pub fn version(&self) -> StoreResult<VersionVector> {
        Ok(self.lock()?.oplog_vv())
    }

    /// Export the full document state.
    pub fn export_snapshot(&self) -> StoreResult<Vec<u8>> {
        self.lock()?
            .export(ExportMode::Snapshot)
            .map_err(|e| StoreError::Crdt(e.to_string()))
    }

    /// Export the operations a peer at `since` is missing.
    pub fn export_updates(&self, since: &VersionVector) -> StoreResult<Vec<u8>> {
        self.lock()?
            .export(ExportMode::updates(since))
            .map_err(|e| StoreError::Crdt(e.to_string()))
    }

    /// Merge remote updates and notify subscribers.
    pub fn import(&self, bytes: &[u8]) -> StoreResult<()> {
        {
            let doc = self.lock()?;
            doc.import(bytes)
                .map_err(|e| StoreError::Crdt(e.to_string()))?;
        }
        self.publish()
    }

    fn publish(&self) -> StoreResult<()> {
        if self.subscribers.is_empty() {
            return Ok(());
        }
        let snapshot = self.snapshot()?;
        self.subscribers.notify(&snapshot);
        Ok(())
    }
}

impl Default for LoroStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicatedStore for LoroStore {
    fn get(&self, id: &ObjectId) -> StoreResult<Option<ShapeRecord>> {
        let doc = self.lock()?;
        match Self::objects(&doc).get(id.as_str()) {
            Some(ValueOrContainer::Value(value)) => Ok(record_from_loro(id, &value)),
            _ => Ok(None),
        }
    }

    fn set(&self, id: &ObjectId, record: ShapeRecord) -> StoreResult<()> {
        {
            let doc = self.lock()?;
            Self::objects(&doc)
                .insert(id.as_str(), json_to_loro(&record.into_value()))
                .map_err(|e| StoreError::Crdt(e.to_string()))?;
            doc.commit();
        }
        self.publish()
    }

    fn delete(&self, id: &ObjectId) -> StoreResult<bool> {
        let removed = {
            let doc = self.lock()?;
            let objects = Self::objects(&doc);
            if objects.get(id.as_str()).is_none() {
                false
            } else {
                objects
                    .delete(id.as_str())
                    .map_err(|e| StoreError::Crdt(e.to_string()))?;
                doc.commit();
                true
            }
        };
        if removed {
            self.publish()?;
        }
        Ok(removed)
    }

    fn keys(&self) -> StoreResult<Vec<ObjectId>> {
        Ok(self.snapshot()?.into_keys().collect())
    }

    fn len(&self) -> StoreResult<usize> {
        let doc = self.lock()?;
        Ok(Self::objects(&doc).len())
    }

    fn snapshot(&self) -> StoreResult<Document> {
        let doc = self.lock()?;
        let mut document = Document::new();
        if let LoroValue::Map(map) = Self::objects(&doc).get_value() {
            for (key, value) in map.iter() {
                let id = ObjectId::from(key.as_str());
                if let Some(record) = record_from_loro(&id, value) {
                    document.insert(id, record);
                }
            }
        }
        Ok(document)
    }

    fn subscribe(&self) -> Receiver<Document> {
        self.subscribers.add()
    }
}

fn record_from_loro(id: &ObjectId, value: &LoroValue) -> Option<ShapeRecord> {
    let record = ShapeRecord::from_value(loro_to_json(value));
    if record.is_none() {
        log::warn!("Ignoring non-object value stored under {}", id);
    }
    record
}

/// Convert a JSON value into a plain Loro value.
fn json_to_loro(value: &Value) -> LoroValue {
    match value {
        Value::Null => LoroValue::Null,
        Value::Bool(b) => LoroValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => LoroValue::I64(i),
            None => LoroValue::Double(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => LoroValue::from(s.as_str()),
        Value::Array(items) => LoroValue::from(items.iter().map(json_to_loro).collect::<Vec<_>>()),
        Value::Object(map) => LoroValue::from(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_loro(v)))
                .collect::<HashMap<String, LoroValue>>(),
        ),
    }
}

/// Convert a Loro value back into JSON.
fn loro_to_json(value: &LoroValue) -> Value {
    match value {
        LoroValue::Null => Value::Null,
        LoroValue::Bool(b) => Value::Bool(*b),
        LoroValue::I64(i) => Value::from(*i),
        LoroValue::Double(d) => Number::from_f64(*d).map_or(Value::Null, Value::Number),
        LoroValue::String(s) => Value::String(s.to_string()),
        LoroValue::List(items) => Value::Array(items.iter().map(loro_to_json).collect()),
        LoroValue::Map(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), loro_to_json(v)))
                .collect::<Map<String, Value>>(),
        ),
        // Binary blobs and containers are never written by this store.
        _ => Value::Null,
    }
}

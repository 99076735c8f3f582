//! In-memory store implementation.

use super::{Document, ReplicatedStore, StoreError, StoreResult, Subscribers};
use crate::codec::ShapeRecord;
use crate::shapes::ObjectId;
use std::sync::RwLock;
use std::sync::mpsc::Receiver;

/// In-process store for single-client use and tests.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Document>,
    subscribers: Subscribers,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `document`.
    pub fn with_document(document: Document) -> Self {
        Self {
            records: RwLock::new(document),
            subscribers: Subscribers::default(),
        }
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

impl ReplicatedStore for MemoryStore {
    fn get(&self, id: &ObjectId) -> StoreResult<Option<ShapeRecord>> {
        let records = self
            .records
            .read()
            .map_err(|e| StoreError::Lock(e.to_string()))?;
        Ok(records.get(id).cloned())
    }

    fn set(&self, id: &ObjectId, record: ShapeRecord) -> StoreResult<()> {
        {
            let mut records = self
                .records
                .write()
                .map_err(|e| StoreError::Lock(e.to_string()))?;
            records.insert(id.clone(), record);
        }
        self.publish()
    }

    fn delete(&self, id: &ObjectId) -> StoreResult<bool> {
        let removed = {
            let mut records = self
                .records
                .write()
                .map_err(|e| StoreError::Lock(e.to_string()))?;
            records.remove(id).is_some()
        };
        if removed {
            self.publish()?;
        }
        Ok(removed)
    }

    fn keys(&self) -> StoreResult<Vec<ObjectId>> {
        let records = self
            .records
            .read()
            .map_err(|e| StoreError::Lock(e.to_string()))?;
        Ok(records.keys().cloned().collect())
    }

    fn len(&self) -> StoreResult<usize> {
        let records = self
            .records
            .read()
            .map_err(|e| StoreError::Lock(e.to_string()))?;
        Ok(records.len())
    }

    fn snapshot(&self) -> StoreResult<Document> {
        let records = self
            .records
            .read()
            .map_err(|e| StoreError::Lock(e.to_string()))?;
        Ok(records.clone())
    }

    fn subscribe(&self) -> Receiver<Document> {
        self.subscribers.add()
    }
}

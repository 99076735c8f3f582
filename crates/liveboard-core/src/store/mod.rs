//! Replicated object store abstraction.
//!
//! The Document is a mapping from [`ObjectId`] to [`ShapeRecord`]. Every
//! component that touches it receives an injected store handle; the
//! [`MutationPipeline`](crate::pipeline::MutationPipeline) is the only writer.

mod crdt;
mod memory;

pub use crdt::{LoroStore, OBJECTS_KEY};
pub use memory::MemoryStore;

use crate::codec::ShapeRecord;
use crate::shapes::ObjectId;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::mpsc::{Receiver, Sender, channel};
use thiserror::Error;

/// Snapshot of the whole Document.
pub type Document = BTreeMap<ObjectId, ShapeRecord>;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Lock error: {0}")]
    Lock(String),
    #[error("CRDT error: {0}")]
    Crdt(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A convergent key/value store holding the Document.
///
/// Writes to a single key are atomic. Concurrent writers on the same key
/// resolve last-writer-wins according to the backend's replication order.
pub trait ReplicatedStore: Send + Sync {
    /// Get the record stored under `id`.
    fn get(&self, id: &ObjectId) -> StoreResult<Option<ShapeRecord>>;

    /// Store `record` under `id`, replacing any previous record.
    fn set(&self, id: &ObjectId, record: ShapeRecord) -> StoreResult<()>;

    /// Remove `id`. Returns whether a record was present.
    fn delete(&self, id: &ObjectId) -> StoreResult<bool>;

    /// All ids currently in the Document.
    fn keys(&self) -> StoreResult<Vec<ObjectId>>;

    /// Number of records.
    fn len(&self) -> StoreResult<usize>;

    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Copy of the full Document.
    fn snapshot(&self) -> StoreResult<Document>;

    /// Register for change notifications.
    ///
    /// The receiver gets the full Document after every local or remote change.
    fn subscribe(&self) -> Receiver<Document>;
}

/// Fan-out of Document snapshots to subscribers.
#[derive(Default)]
pub(crate) struct Subscribers {
    senders: Mutex<Vec<Sender<Document>>>,
}

impl Subscribers {
    pub(crate) fn add(&self) -> Receiver<Document> {
        let (tx, rx) = channel();
        match self.senders.lock() {
            Ok(mut senders) => senders.push(tx),
            Err(e) => log::warn!("Subscriber list poisoned, subscription dropped: {}", e),
        }
        rx
    }

    /// Send `document` to every live subscriber, forgetting closed ones.
    pub(crate) fn notify(&self, document: &Document) {
        let Ok(mut senders) = self.senders.lock() else {
            log::warn!("Subscriber list poisoned, change notification dropped");
            return;
        };
        senders.retain(|tx| tx.send(document.clone()).is_ok());
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.senders.lock().map(|s| s.is_empty()).unwrap_or(true)
    }
}

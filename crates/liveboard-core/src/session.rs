//! A participant's whiteboard session.
//!
//! Glues the canvas adapter to the mutation pipeline and the store's change
//! feed, and publishes the local presence record when it changes.

use crate::canvas::{CanvasAdapter, CanvasCommand, ReconcileReport};
use crate::config::SessionConfig;
use crate::history::HistoryController;
use crate::input::CanvasEvent;
use crate::pipeline::{MutationError, MutationPipeline};
use crate::presence::{PresenceChannel, PresenceRecord, ReactionEvent};
use crate::shapes::ObjectId;
use crate::store::{Document, ReplicatedStore};
use std::sync::Arc;
use std::sync::mpsc::Receiver;

/// Whether every local edit reached the store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SaveStatus {
    #[default]
    Saved,
    /// The last write failed; the reason is shown to the user.
    Unsaved(String),
}

impl SaveStatus {
    pub fn is_saved(&self) -> bool {
        matches!(self, SaveStatus::Saved)
    }
}

pub struct Session<S: ReplicatedStore + ?Sized> {
    adapter: CanvasAdapter,
    pipeline: MutationPipeline<S>,
    updates: Receiver<Document>,
    presence: Box<dyn PresenceChannel>,
    /// Last record that went out on the presence channel.
    published: Option<PresenceRecord>,
    status: SaveStatus,
    /// Deletes that failed and are replayed by `retry_unsaved`.
    unsent_deletes: Vec<ObjectId>,
    /// Set when the canvas could not be rebuilt from a fresh snapshot.
    stale: bool,
}

impl<S: ReplicatedStore + ?Sized> Session<S> {
    /// Start a session on `store` and render its current Document.
    pub fn new(store: Arc<S>, presence: Box<dyn PresenceChannel>, config: &SessionConfig) -> Self {
        let updates = store.subscribe();
        let pipeline =
            MutationPipeline::with_history(store, HistoryController::new(config.max_undo_steps));
        let mut session = Self {
            adapter: CanvasAdapter::new(config),
            pipeline,
            updates,
            presence,
            published: None,
            status: SaveStatus::Saved,
            unsent_deletes: Vec::new(),
            stale: false,
        };
        let report = session.resync();
        log::debug!("Session loaded {} shapes", report.added.len());
        session
    }

    /// Feed one input event through the adapter and write what it produced.
    pub fn dispatch(&mut self, event: CanvasEvent) {
        for command in self.adapter.handle(event) {
            self.apply(command);
        }
        self.sync();
        self.publish_presence();
    }

    fn apply(&mut self, command: CanvasCommand) {
        let result = match command {
            CanvasCommand::Commit(shape) => self.pipeline.commit(Some(&shape)).map(|written| {
                if let Some(id) = written {
                    // A re-committed shape is no longer meant to be deleted.
                    self.unsent_deletes.retain(|pending| pending != &id);
                    self.adapter.mark_committed(&id);
                }
            }),
            CanvasCommand::Delete(id) => {
                let result = self.pipeline.delete_one(&id).map(|_| ());
                if result.is_err() {
                    self.queue_delete(id);
                }
                result
            }
            CanvasCommand::DeleteAll => {
                let result = self.pipeline.delete_all().map(|empty| {
                    if !empty {
                        log::info!("Board reset raced with new shapes from other participants");
                    }
                });
                if result.is_err() {
                    match self.pipeline.store().keys() {
                        Ok(keys) => keys.into_iter().for_each(|id| self.queue_delete(id)),
                        Err(e) => log::warn!("Could not list records left by the reset: {}", e),
                    }
                }
                result
            }
            CanvasCommand::Undo => self.pipeline.undo().map(|_| ()),
            CanvasCommand::Redo => self.pipeline.redo().map(|_| ()),
        };
        match result {
            Ok(()) => self.settle(),
            Err(e) => {
                log::warn!("Edit not saved: {}", e);
                self.status = SaveStatus::Unsaved(e.to_string());
                // The adapter already applied the edit locally; show what the
                // store actually holds.
                self.resync();
            }
        }
    }

    fn queue_delete(&mut self, id: ObjectId) {
        if !self.unsent_deletes.contains(&id) {
            self.unsent_deletes.push(id);
        }
    }

    /// Back to `Saved` once nothing is waiting to be written.
    fn settle(&mut self) {
        if self.unsent_deletes.is_empty() && self.adapter.provisional_shapes().is_empty() {
            self.status = SaveStatus::Saved;
        }
    }

    /// Rebuild the canvas from a fresh snapshot of the store.
    fn resync(&mut self) -> ReconcileReport {
        // Queued notifications are older than the snapshot taken below.
        self.updates.try_iter().for_each(drop);
        match self.pipeline.store().snapshot() {
            Ok(document) => {
                self.stale = false;
                self.adapter.apply_document(&document)
            }
            Err(e) => {
                log::warn!("Could not read the document: {}", e);
                self.stale = true;
                ReconcileReport::default()
            }
        }
    }

    /// Reconcile with the latest Document the store announced, if any.
    pub fn sync(&mut self) -> ReconcileReport {
        if self.stale {
            return self.resync();
        }
        match self.updates.try_iter().last() {
            Some(document) => self.adapter.apply_document(&document),
            None => ReconcileReport::default(),
        }
    }

    /// Replay deletes that failed, then write every finished shape that is
    /// still provisional after a failed commit. Replayed deletes form one undo
    /// step. Returns how many writes were made.
    pub fn retry_unsaved(&mut self) -> Result<usize, MutationError> {
        let mut written = 0;
        if !self.unsent_deletes.is_empty() {
            let pending = self.unsent_deletes.clone();
            self.pipeline.begin_group();
            let result = pending.iter().try_for_each(|id| {
                self.pipeline.delete_one(id)?;
                self.unsent_deletes.retain(|queued| queued != id);
                written += 1;
                Ok::<(), MutationError>(())
            });
            self.pipeline.end_group();
            if let Err(e) = result {
                return Err(self.retry_failed(e));
            }
        }
        for shape in self.adapter.provisional_shapes() {
            if let Err(e) = self.pipeline.commit(Some(&shape)) {
                return Err(self.retry_failed(e));
            }
            self.adapter.mark_committed(shape.id());
            written += 1;
        }
        self.settle();
        self.sync();
        Ok(written)
    }

    fn retry_failed(&mut self, e: MutationError) -> MutationError {
        self.status = SaveStatus::Unsaved(e.to_string());
        self.resync();
        e
    }

    /// Ids of deletes waiting for `retry_unsaved`.
    pub fn unsent_deletes(&self) -> &[ObjectId] {
        &self.unsent_deletes
    }

    /// Show `value` to the other participants at the local cursor. Returns
    /// `false` when the cursor is off the canvas or the channel refused it.
    pub fn send_reaction(&mut self, value: &str) -> bool {
        let Some(cursor) = self.adapter.presence().cursor else {
            return false;
        };
        match self.presence.react(&ReactionEvent::new(cursor, value)) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("Reaction not sent: {}", e);
                false
            }
        }
    }

    fn publish_presence(&mut self) {
        let record = self.adapter.presence();
        if self.published.as_ref() == Some(record) {
            return;
        }
        match self.presence.publish(record) {
            Ok(()) => self.published = Some(record.clone()),
            // Retried with the next change.
            Err(e) => log::debug!("Presence not published: {}", e),
        }
    }

    pub fn adapter(&self) -> &CanvasAdapter {
        &self.adapter
    }

    pub fn status(&self) -> &SaveStatus {
        &self.status
    }

    pub fn store(&self) -> &Arc<S> {
        self.pipeline.store()
    }

    pub fn can_undo(&self) -> bool {
        self.pipeline.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.pipeline.can_redo()
    }
}

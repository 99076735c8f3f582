//! Mutation pipeline: the single writer path into the Document.

use crate::codec::{self, CodecError, ShapeRecord};
use crate::history::{Change, HistoryController};
use crate::shapes::{ObjectId, Shape};
use crate::store::{ReplicatedStore, StoreError};
use std::sync::Arc;
use thiserror::Error;

/// A local edit that could not be written.
#[derive(Debug, Error)]
pub enum MutationError {
    #[error("Shape could not be encoded: {0}")]
    Codec(#[from] CodecError),
    #[error("Store write failed: {0}")]
    Store(#[from] StoreError),
}

/// Serializes local edits and writes them into the injected store, recording
/// each user-visible action as one undo step.
pub struct MutationPipeline<S: ReplicatedStore + ?Sized> {
    store: Arc<S>,
    history: HistoryController,
}

impl<S: ReplicatedStore + ?Sized> MutationPipeline<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            history: HistoryController::default(),
        }
    }

    pub fn with_history(store: Arc<S>, history: HistoryController) -> Self {
        Self { store, history }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn history(&self) -> &HistoryController {
        &self.history
    }

    /// Write `shape` under its id, overwriting any prior record.
    ///
    /// `None` is a no-op. Returns the id that was written.
    pub fn commit(&mut self, shape: Option<&Shape>) -> Result<Option<ObjectId>, MutationError> {
        let Some(shape) = shape else {
            return Ok(None);
        };
        let record = codec::serialize(shape)?;
        let id = shape.id().clone();
        self.write(&id, Some(record))?;
        log::debug!("Committed {} {}", shape.kind(), id);
        Ok(Some(id))
    }

    /// Remove `id` from the Document. Returns `false` if it was already absent.
    pub fn delete_one(&mut self, id: &ObjectId) -> Result<bool, MutationError> {
        self.write(id, None)
    }

    /// Remove every key observed at call time, as one undo step.
    ///
    /// Returns whether the Document is empty afterwards. Records added
    /// concurrently by other participants are left alone, so this can be
    /// `false` without any error.
    pub fn delete_all(&mut self) -> Result<bool, MutationError> {
        let keys = self.store.keys()?;
        if keys.is_empty() {
            return Ok(true);
        }
        self.history.begin_group();
        let result = keys.iter().try_for_each(|id| self.write(id, None).map(|_| ()));
        self.history.end_group();
        result?;
        log::debug!("Deleted {} records", keys.len());
        Ok(self.store.is_empty()?)
    }

    /// Merge the following commits/deletes into one undo step.
    pub fn begin_group(&mut self) {
        self.history.begin_group();
    }

    pub fn end_group(&mut self) {
        self.history.end_group();
    }

    /// Revert this client's most recent action. Returns `false` if there was
    /// nothing to undo.
    ///
    /// Keys whose current record no longer matches what this client wrote are
    /// skipped, so a shape deleted by another participant stays deleted.
    pub fn undo(&mut self) -> Result<bool, MutationError> {
        let Some(entry) = self.history.take_undo() else {
            return Ok(false);
        };
        let result = entry
            .changes()
            .iter()
            .rev()
            .try_for_each(|c| self.replay(&c.id, c.after.as_ref(), c.before.clone()));
        match result {
            Ok(()) => {
                self.history.push_redo(entry);
                Ok(true)
            }
            Err(e) => {
                self.history.push_undo(entry);
                Err(e)
            }
        }
    }

    /// Re-apply the most recently undone action.
    pub fn redo(&mut self) -> Result<bool, MutationError> {
        let Some(entry) = self.history.take_redo() else {
            return Ok(false);
        };
        let result = entry
            .changes()
            .iter()
            .try_for_each(|c| self.replay(&c.id, c.before.as_ref(), c.after.clone()));
        match result {
            Ok(()) => {
                self.history.push_undo(entry);
                Ok(true)
            }
            Err(e) => {
                self.history.push_redo(entry);
                Err(e)
            }
        }
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    fn write(&mut self, id: &ObjectId, after: Option<ShapeRecord>) -> Result<bool, MutationError> {
        let before = self.store.get(id)?;
        match &after {
            Some(record) => self.store.set(id, record.clone())?,
            None if before.is_none() => return Ok(false),
            None => {
                self.store.delete(id)?;
            }
        }
        self.history.record(Change {
            id: id.clone(),
            before,
            after,
        });
        Ok(true)
    }

    /// Write `target` under `id` if the current record is still `expected`.
    fn replay(
        &self,
        id: &ObjectId,
        expected: Option<&ShapeRecord>,
        target: Option<ShapeRecord>,
    ) -> Result<(), MutationError> {
        let current = self.store.get(id)?;
        if current.as_ref() != expected {
            log::debug!("Skipping {} in history replay: changed by another participant", id);
            return Ok(());
        }
        match target {
            Some(record) => self.store.set(id, record)?,
            None => {
                self.store.delete(id)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::{Ellipse, Rectangle};
    use crate::store::testing::FlakyStore;
    use crate::store::{Document, MemoryStore};
    use kurbo::Point;
    use std::sync::mpsc::Receiver;

    fn pipeline() -> MutationPipeline<MemoryStore> {
        MutationPipeline::new(Arc::new(MemoryStore::new()))
    }

    fn rect(x: f64) -> Shape {
        Shape::Rectangle(Rectangle::new(Point::new(x, 0.0), 10.0, 10.0))
    }

    fn ids(p: &MutationPipeline<MemoryStore>) -> Vec<ObjectId> {
        p.store().keys().unwrap()
    }

    #[test]
    fn test_commit_none_is_noop() {
        let mut p = pipeline();
        assert_eq!(p.commit(None).unwrap(), None);
        assert!(p.store().is_empty().unwrap());
        assert!(!p.can_undo());
    }

    #[test]
    fn test_commit_overwrites_same_id() {
        let mut p = pipeline();
        let mut shape = rect(0.0);
        p.commit(Some(&shape)).unwrap();
        shape.translate(kurbo::Vec2::new(5.0, 5.0));
        p.commit(Some(&shape)).unwrap();

        assert_eq!(p.store().len().unwrap(), 1);
        let stored = p.store().get(shape.id()).unwrap().unwrap();
        assert_eq!(codec::deserialize(&stored).unwrap(), shape);
    }

    #[test]
    fn test_delete_one_idempotent() {
        let mut p = pipeline();
        let shape = rect(0.0);
        p.commit(Some(&shape)).unwrap();

        assert!(p.delete_one(shape.id()).unwrap());
        assert!(!p.delete_one(shape.id()).unwrap());
        assert!(p.store().is_empty().unwrap());
        // The second delete did not add an undo step.
        assert_eq!(p.history().undo_count(), 2);
    }

    #[test]
    fn test_delete_all_on_empty_document() {
        let mut p = pipeline();
        assert!(p.delete_all().unwrap());
        assert!(!p.can_undo());
    }

    #[test]
    fn test_delete_all_is_one_step() {
        let mut p = pipeline();
        let a = rect(0.0);
        let b = Shape::Ellipse(Ellipse::new(Point::new(5.0, 5.0), 3.0, 3.0));
        p.commit(Some(&a)).unwrap();
        p.commit(Some(&b)).unwrap();

        assert!(p.delete_all().unwrap());
        assert!(p.store().is_empty().unwrap());

        assert!(p.undo().unwrap());
        assert_eq!(p.store().len().unwrap(), 2);
    }

    #[test]
    fn test_undo_redo_scenario() {
        let mut p = pipeline();
        let a = rect(0.0);
        let b = rect(50.0);
        p.commit(Some(&a)).unwrap();
        p.commit(Some(&b)).unwrap();

        assert!(p.undo().unwrap());
        assert_eq!(ids(&p), vec![a.id().clone()]);
        assert!(p.undo().unwrap());
        assert!(ids(&p).is_empty());
        assert!(!p.undo().unwrap());

        assert!(p.redo().unwrap());
        assert_eq!(ids(&p), vec![a.id().clone()]);
        assert!(p.redo().unwrap());
        let mut both = vec![a.id().clone(), b.id().clone()];
        both.sort();
        assert_eq!(ids(&p), both);
        assert!(!p.redo().unwrap());
    }

    #[test]
    fn test_undo_restores_previous_version() {
        let mut p = pipeline();
        let mut shape = rect(0.0);
        p.commit(Some(&shape)).unwrap();
        let original = p.store().get(shape.id()).unwrap();
        shape.scale(2.0, 2.0);
        p.commit(Some(&shape)).unwrap();

        p.undo().unwrap();
        assert_eq!(p.store().get(shape.id()).unwrap(), original);
    }

    #[test]
    fn test_undo_never_resurrects_remote_deletion() {
        let mut p = pipeline();
        let mut shape = rect(0.0);
        p.commit(Some(&shape)).unwrap();
        shape.translate(kurbo::Vec2::new(10.0, 0.0));
        p.commit(Some(&shape)).unwrap();

        // Another participant deletes the shape.
        p.store().delete(shape.id()).unwrap();

        assert!(p.undo().unwrap());
        assert!(p.store().is_empty().unwrap());
        assert!(p.undo().unwrap());
        assert!(p.store().is_empty().unwrap());
    }

    #[test]
    fn test_undo_skips_remotely_modified_record() {
        let mut p = pipeline();
        let shape = rect(0.0);
        p.commit(Some(&shape)).unwrap();

        let mut remote = shape.clone();
        remote.translate(kurbo::Vec2::new(0.0, 99.0));
        p.store()
            .set(remote.id(), codec::serialize(&remote).unwrap())
            .unwrap();

        p.undo().unwrap();
        let stored = p.store().get(shape.id()).unwrap().unwrap();
        assert_eq!(codec::deserialize(&stored).unwrap(), remote);
    }

    #[test]
    fn test_delete_all_tolerates_concurrent_addition() {
        let store = Arc::new(FlakyStore::new());
        let mut p = MutationPipeline::new(Arc::clone(&store));
        p.commit(Some(&rect(0.0))).unwrap();
        p.commit(Some(&rect(10.0))).unwrap();

        let late = rect(20.0);
        store.insert_on_next_delete(late.id().clone(), codec::serialize(&late).unwrap());

        assert!(!p.delete_all().unwrap());
        assert_eq!(store.keys().unwrap(), vec![late.id().clone()]);
    }

    #[test]
    fn test_failed_write_surfaces_and_keeps_history_clean() {
        let store = Arc::new(FlakyStore::new());
        let mut p = MutationPipeline::new(Arc::clone(&store));
        store.set_failing(true);

        let err = p.commit(Some(&rect(0.0))).unwrap_err();
        assert!(matches!(err, MutationError::Store(_)));
        assert!(!p.can_undo());

        store.set_failing(false);
        p.commit(Some(&rect(0.0))).unwrap();
        assert!(p.can_undo());
    }

    #[test]
    fn test_commit_notifies_subscribers() {
        let p = pipeline();
        let rx: Receiver<Document> = p.store().subscribe();
        let mut p = p;
        p.commit(Some(&rect(0.0))).unwrap();
        assert_eq!(rx.try_recv().unwrap().len(), 1);
    }
}

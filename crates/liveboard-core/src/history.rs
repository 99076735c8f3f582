//! Undo/redo history of Document mutations.
//!
//! Each user-visible action is one [`HistoryEntry`]: the per-key records
//! before and after the action. Entries only ever describe this client's own
//! writes; applying them is the pipeline's job.

use crate::codec::ShapeRecord;
use crate::shapes::ObjectId;
use std::collections::VecDeque;

/// Default number of undo steps kept.
pub const DEFAULT_MAX_UNDO_STEPS: usize = 100;

/// One key's change within an action.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub id: ObjectId,
    /// Record before the action (`None` = absent).
    pub before: Option<ShapeRecord>,
    /// Record after the action (`None` = deleted).
    pub after: Option<ShapeRecord>,
}

/// One undo step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryEntry {
    changes: Vec<Change>,
}

impl HistoryEntry {
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Fold a change into this entry. A key touched twice keeps its first
    /// `before` and its latest `after`.
    fn merge(&mut self, change: Change) {
        if let Some(existing) = self.changes.iter_mut().find(|c| c.id == change.id) {
            existing.after = change.after;
        } else {
            self.changes.push(change);
        }
        self.changes.retain(|c| c.before != c.after);
    }
}

/// Undo and redo stacks with optional grouping.
#[derive(Debug, Clone)]
pub struct HistoryController {
    undo_stack: VecDeque<HistoryEntry>,
    redo_stack: Vec<HistoryEntry>,
    max_steps: usize,
    /// Entry being accumulated while a group is open.
    pending: Option<HistoryEntry>,
    group_depth: usize,
}

impl Default for HistoryController {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_UNDO_STEPS)
    }
}

impl HistoryController {
    pub fn new(max_steps: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            max_steps: max_steps.max(1),
            pending: None,
            group_depth: 0,
        }
    }

    /// Record a change made by this client.
    ///
    /// Outside a group the change becomes its own undo step.
    pub fn record(&mut self, change: Change) {
        if change.before == change.after {
            return;
        }
        match self.pending.as_mut() {
            Some(pending) => pending.merge(change),
            None => {
                let mut entry = HistoryEntry::default();
                entry.merge(change);
                self.push(entry);
            }
        }
    }

    /// Start merging subsequent changes into one step. Groups nest.
    pub fn begin_group(&mut self) {
        if self.group_depth == 0 {
            self.pending = Some(HistoryEntry::default());
        }
        self.group_depth += 1;
    }

    /// Close a group; the outermost close pushes the merged step.
    pub fn end_group(&mut self) {
        if self.group_depth == 0 {
            return;
        }
        self.group_depth -= 1;
        if self.group_depth == 0 {
            if let Some(entry) = self.pending.take() {
                self.push(entry);
            }
        }
    }

    fn push(&mut self, entry: HistoryEntry) {
        if entry.is_empty() {
            return;
        }
        self.undo_stack.push_back(entry);
        self.redo_stack.clear();
        while self.undo_stack.len() > self.max_steps {
            self.undo_stack.pop_front();
        }
    }

    /// Take the most recent step for undoing.
    pub fn take_undo(&mut self) -> Option<HistoryEntry> {
        self.undo_stack.pop_back()
    }

    /// Take the most recently undone step for redoing.
    pub fn take_redo(&mut self) -> Option<HistoryEntry> {
        self.redo_stack.pop()
    }

    /// Store a step that was just undone.
    pub fn push_redo(&mut self, entry: HistoryEntry) {
        self.redo_stack.push(entry);
    }

    /// Store a step that was just redone (or restore one whose undo failed),
    /// leaving the redo stack intact.
    pub fn push_undo(&mut self, entry: HistoryEntry) {
        self.undo_stack.push_back(entry);
        while self.undo_stack.len() > self.max_steps {
            self.undo_stack.pop_front();
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(id: &str, x: f64) -> ShapeRecord {
        ShapeRecord::from_value(json!({ "objectId": id, "type": "rectangle", "x": x })).unwrap()
    }

    fn added(id: &str) -> Change {
        Change {
            id: ObjectId::from(id),
            before: None,
            after: Some(rec(id, 0.0)),
        }
    }

    #[test]
    fn test_each_record_is_a_step() {
        let mut history = HistoryController::default();
        history.record(added("a"));
        history.record(added("b"));
        assert_eq!(history.undo_count(), 2);
    }

    #[test]
    fn test_noop_change_ignored() {
        let mut history = HistoryController::default();
        history.record(Change {
            id: ObjectId::from("a"),
            before: Some(rec("a", 1.0)),
            after: Some(rec("a", 1.0)),
        });
        assert!(!history.can_undo());
    }

    #[test]
    fn test_group_merges_changes() {
        let mut history = HistoryController::default();
        history.begin_group();
        history.record(added("a"));
        history.begin_group();
        history.record(added("b"));
        history.end_group();
        assert!(!history.can_undo());
        history.end_group();

        assert_eq!(history.undo_count(), 1);
        assert_eq!(history.take_undo().unwrap().changes().len(), 2);
    }

    #[test]
    fn test_group_keeps_first_before() {
        let mut history = HistoryController::default();
        history.begin_group();
        history.record(added("a"));
        history.record(Change {
            id: ObjectId::from("a"),
            before: Some(rec("a", 0.0)),
            after: Some(rec("a", 5.0)),
        });
        history.end_group();

        let entry = history.take_undo().unwrap();
        assert_eq!(entry.changes()[0].before, None);
        assert_eq!(entry.changes()[0].after, Some(rec("a", 5.0)));
    }

    #[test]
    fn test_add_then_delete_in_group_cancels_out() {
        let mut history = HistoryController::default();
        history.begin_group();
        history.record(added("a"));
        history.record(Change {
            id: ObjectId::from("a"),
            before: Some(rec("a", 0.0)),
            after: None,
        });
        history.end_group();
        assert!(!history.can_undo());
    }

    #[test]
    fn test_new_action_clears_redo() {
        let mut history = HistoryController::default();
        history.record(added("a"));
        let entry = history.take_undo().unwrap();
        history.push_redo(entry);
        assert!(history.can_redo());

        history.record(added("b"));
        assert!(!history.can_redo());
    }

    #[test]
    fn test_depth_is_capped() {
        let mut history = HistoryController::new(3);
        for i in 0..5 {
            history.record(added(&format!("s{i}")));
        }
        assert_eq!(history.undo_count(), 3);
        let oldest_kept = history.take_undo().unwrap();
        assert_eq!(oldest_kept.changes()[0].id, ObjectId::from("s4"));
    }
}

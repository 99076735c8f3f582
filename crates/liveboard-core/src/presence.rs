//! Presence: ephemeral per-participant state synced outside the Document.
//!
//! Presence is best-effort. Records are overwritten wholesale, never
//! persisted, and dropped when their participant disconnects. Reactions ride
//! the same channel as one-shot events that nobody stores.

use crate::shapes::ObjectId;
use kurbo::Point;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// One participant's ephemeral state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PresenceRecord {
    /// Cursor position in canvas coordinates (`None` = off canvas).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Point>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor_color: Option<String>,
    /// Object currently being edited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub editing: Option<ObjectId>,
    /// Last chat message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// An emoji reaction shown briefly at a point on the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionEvent {
    pub x: f64,
    pub y: f64,
    /// The emoji.
    pub value: String,
}

impl ReactionEvent {
    pub fn new(at: Point, value: impl Into<String>) -> Self {
        Self {
            x: at.x,
            y: at.y,
            value: value.into(),
        }
    }

    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// A presence broadcast that did not go out.
#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("Presence channel closed")]
    Closed,
    #[error("Lock error: {0}")]
    Lock(String),
    #[error("Presence could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Broadcasts the local participant's presence.
pub trait PresenceChannel: Send {
    /// Replace the local record and broadcast it.
    fn publish(&mut self, record: &PresenceRecord) -> Result<(), PresenceError>;

    /// Send a one-shot reaction to the other participants.
    fn react(&mut self, event: &ReactionEvent) -> Result<(), PresenceError>;
}

/// Presence notification from another participant.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    Updated { from: String, record: PresenceRecord },
    Reaction { from: String, event: ReactionEvent },
    Left { from: String },
}

/// Latest presence record of every other participant.
#[derive(Debug, Clone, Default)]
pub struct PresenceRoster {
    /// Our own participant id, never stored.
    local: Option<String>,
    peers: BTreeMap<String, PresenceRecord>,
}

impl PresenceRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_local(&mut self, participant: impl Into<String>) {
        let participant = participant.into();
        self.peers.remove(&participant);
        self.local = Some(participant);
    }

    pub fn local(&self) -> Option<&str> {
        self.local.as_deref()
    }

    /// Overwrite a participant's record.
    pub fn update(&mut self, from: impl Into<String>, record: PresenceRecord) {
        let from = from.into();
        if self.local.as_deref() != Some(from.as_str()) {
            self.peers.insert(from, record);
        }
    }

    /// Remove a participant (disconnect).
    pub fn remove(&mut self, from: &str) -> Option<PresenceRecord> {
        self.peers.remove(from)
    }

    pub fn apply(&mut self, event: PresenceEvent) {
        match event {
            PresenceEvent::Updated { from, record } => self.update(from, record),
            PresenceEvent::Left { from } => {
                self.remove(&from);
            }
            PresenceEvent::Reaction { .. } => {}
        }
    }

    pub fn get(&self, participant: &str) -> Option<&PresenceRecord> {
        self.peers.get(participant)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PresenceRecord)> {
        self.peers.iter().map(|(id, record)| (id.as_str(), record))
    }

    /// Participants whose cursor is on the canvas.
    pub fn cursors(&self) -> impl Iterator<Item = (&str, Point)> {
        self.iter()
            .filter_map(|(id, record)| record.cursor.map(|c| (id, c)))
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}

type Participants = HashMap<String, Sender<PresenceEvent>>;

/// In-process presence fan-out between participants of one room.
#[derive(Clone, Default)]
pub struct LocalPresenceHub {
    participants: Arc<Mutex<Participants>>,
}

impl LocalPresenceHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the hub. Dropping the returned handle leaves it.
    pub fn join(&self, participant: impl Into<String>) -> (LocalPresence, Receiver<PresenceEvent>) {
        let participant = participant.into();
        let (tx, rx) = channel();
        match self.participants.lock() {
            Ok(mut participants) => {
                participants.insert(participant.clone(), tx);
            }
            Err(e) => log::warn!("Presence hub poisoned, {} joins muted: {}", participant, e),
        }
        let handle = LocalPresence {
            participant,
            hub: self.clone(),
        };
        (handle, rx)
    }

    pub fn participant_count(&self) -> usize {
        self.participants.lock().map(|p| p.len()).unwrap_or(0)
    }

    fn broadcast(&self, from: &str, event: PresenceEvent) -> Result<(), PresenceError> {
        let mut participants = self
            .participants
            .lock()
            .map_err(|e| PresenceError::Lock(e.to_string()))?;
        participants.retain(|id, tx| id == from || tx.send(event.clone()).is_ok());
        Ok(())
    }
}

/// A participant's handle on a [`LocalPresenceHub`].
pub struct LocalPresence {
    participant: String,
    hub: LocalPresenceHub,
}

impl LocalPresence {
    pub fn participant(&self) -> &str {
        &self.participant
    }
}

impl PresenceChannel for LocalPresence {
    fn publish(&mut self, record: &PresenceRecord) -> Result<(), PresenceError> {
        self.hub.broadcast(
            &self.participant,
            PresenceEvent::Updated {
                from: self.participant.clone(),
                record: record.clone(),
            },
        )
    }

    fn react(&mut self, event: &ReactionEvent) -> Result<(), PresenceError> {
        self.hub.broadcast(
            &self.participant,
            PresenceEvent::Reaction {
                from: self.participant.clone(),
                event: event.clone(),
            },
        )
    }
}

impl Drop for LocalPresence {
    fn drop(&mut self) {
        if let Ok(mut participants) = self.hub.participants.lock() {
            participants.remove(&self.participant);
        }
        let left = PresenceEvent::Left {
            from: self.participant.clone(),
        };
        if let Err(e) = self.hub.broadcast(&self.participant, left) {
            log::debug!("Could not announce departure of {}: {}", self.participant, e);
        }
    }
}

//! Room link: the bridge between a local [`LoroStore`] and the relay server.
//!
//! The link is transport-agnostic. The embedding application sends what
//! [`RoomLink::take_outgoing`] returns over its WebSocket and feeds received
//! text frames to [`RoomLink::handle_message`].

use crate::presence::{
    PresenceChannel, PresenceError, PresenceRecord, PresenceRoster, ReactionEvent,
};
use crate::store::LoroStore;
use crate::sync::{
    ClientMessage, ConnectionState, ServerMessage, SyncError, SyncEvent, decode_update,
    encode_update,
};
use loro::VersionVector;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, channel};

/// Ephemeral state handed from a [`RelayPresence`] to its link.
enum Ephemeral {
    Presence(PresenceRecord),
    Reaction(ReactionEvent),
}

/// Publishes presence and reactions through a [`RoomLink`].
#[derive(Clone)]
pub struct RelayPresence {
    tx: Sender<Ephemeral>,
}

impl PresenceChannel for RelayPresence {
    fn publish(&mut self, record: &PresenceRecord) -> Result<(), PresenceError> {
        self.tx
            .send(Ephemeral::Presence(record.clone()))
            .map_err(|_| PresenceError::Closed)
    }

    fn react(&mut self, event: &ReactionEvent) -> Result<(), PresenceError> {
        self.tx
            .send(Ephemeral::Reaction(event.clone()))
            .map_err(|_| PresenceError::Closed)
    }
}

/// Keeps one client's store in sync with a relay room.
///
/// Local edits made while disconnected stay in the store and go out as one
/// update on the next join.
pub struct RoomLink {
    store: Arc<LoroStore>,
    state: ConnectionState,
    room: Option<String>,
    participant_id: Option<String>,
    /// Store version covered by the updates sent so far.
    sent: VersionVector,
    outgoing: Vec<String>,
    roster: PresenceRoster,
    presence_tx: Sender<Ephemeral>,
    presence_rx: Receiver<Ephemeral>,
    /// Last local presence record, resent after every join.
    presence: Option<PresenceRecord>,
}

impl RoomLink {
    pub fn new(store: Arc<LoroStore>) -> Self {
        let (presence_tx, presence_rx) = channel();
        Self {
            store,
            state: ConnectionState::Disconnected,
            room: None,
            participant_id: None,
            sent: VersionVector::default(),
            outgoing: Vec::new(),
            roster: PresenceRoster::new(),
            presence_tx,
            presence_rx,
            presence: None,
        }
    }

    pub fn store(&self) -> &Arc<LoroStore> {
        &self.store
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    /// Id the relay assigned to us; known once joined.
    pub fn participant_id(&self) -> Option<&str> {
        self.participant_id.as_deref()
    }

    /// Latest presence of the other participants.
    pub fn roster(&self) -> &PresenceRoster {
        &self.roster
    }

    /// A presence channel whose records go out through this link.
    pub fn presence_channel(&self) -> RelayPresence {
        RelayPresence {
            tx: self.presence_tx.clone(),
        }
    }

    /// Request to join a room. Queues the join message.
    pub fn join(&mut self, room: &str) -> Result<(), SyncError> {
        if self.state != ConnectionState::Disconnected {
            self.leave()?;
        }
        self.queue(&ClientMessage::Join {
            room: room.to_string(),
        })?;
        self.room = Some(room.to_string());
        self.state = ConnectionState::Joining;
        Ok(())
    }

    /// Leave the current room. Queues the leave message.
    pub fn leave(&mut self) -> Result<(), SyncError> {
        if self.state == ConnectionState::Disconnected {
            return Ok(());
        }
        self.queue(&ClientMessage::Leave)?;
        self.state = ConnectionState::Disconnected;
        self.room = None;
        self.roster.clear();
        Ok(())
    }

    /// The transport dropped; rejoin with [`join`](Self::join).
    pub fn disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.roster.clear();
        self.outgoing.clear();
    }

    /// Queue an update with every store change not yet sent. Returns whether
    /// anything was queued. Does nothing until joined.
    pub fn flush_updates(&mut self) -> Result<bool, SyncError> {
        if self.state != ConnectionState::Joined {
            return Ok(false);
        }
        // Read the version first: a write racing the export is sent twice
        // rather than never.
        let version = self.store.version()?;
        if version == self.sent {
            return Ok(false);
        }
        let bytes = self.store.export_updates(&self.sent)?;
        self.queue(&ClientMessage::Sync {
            data: encode_update(&bytes),
        })?;
        self.sent = version;
        Ok(true)
    }

    /// Flush pending presence, reactions and Document updates, then drain
    /// the queue.
    pub fn take_outgoing(&mut self) -> Vec<String> {
        if let Err(e) = self.flush_presence() {
            log::warn!("Presence not queued: {}", e);
        }
        if let Err(e) = self.flush_updates() {
            log::warn!("Document update not queued: {}", e);
        }
        std::mem::take(&mut self.outgoing)
    }

    /// Handle an incoming server message.
    pub fn handle_message(&mut self, json: &str) -> Result<SyncEvent, SyncError> {
        let event = match ServerMessage::from_json(json)? {
            ServerMessage::Joined {
                room,
                participant_id,
                peer_count,
                initial_sync,
                presence,
            } => {
                self.state = ConnectionState::Joined;
                self.room = Some(room.clone());
                self.participant_id = Some(participant_id.clone());
                self.roster.clear();
                self.roster.set_local(participant_id.clone());
                for (from, record) in presence {
                    self.roster.update(from, record);
                }
                if let Some(data) = initial_sync {
                    self.import(&data)?;
                } else {
                    self.flush_updates()?;
                }
                if let Some(record) = self.presence.clone() {
                    self.queue(&ClientMessage::Presence { state: record })?;
                }
                log::info!("Joined room {} as {} ({} peers)", room, participant_id, peer_count);
                SyncEvent::JoinedRoom {
                    room,
                    participant_id,
                    peer_count,
                }
            }
            ServerMessage::PeerJoined { participant_id } => SyncEvent::PeerJoined { participant_id },
            ServerMessage::PeerLeft { participant_id } => {
                self.roster.remove(&participant_id);
                SyncEvent::PeerLeft { participant_id }
            }
            ServerMessage::Sync { from, data } => {
                self.import(&data)?;
                SyncEvent::SyncReceived { from }
            }
            ServerMessage::Presence { from, state } => {
                self.roster.update(from.clone(), state.clone());
                SyncEvent::PresenceReceived { from, state }
            }
            ServerMessage::Reaction { from, event } => SyncEvent::ReactionReceived { from, event },
            ServerMessage::Error { message } => {
                log::warn!("Relay error: {}", message);
                SyncEvent::Error { message }
            }
        };
        Ok(event)
    }

    /// Import a remote update without echoing it back on the next flush.
    fn import(&mut self, data: &str) -> Result<(), SyncError> {
        let bytes = decode_update(data)?;
        // Local changes go out first so that `sent` can jump past the import.
        self.flush_updates()?;
        self.store.import(&bytes)?;
        if self.state == ConnectionState::Joined {
            self.sent = self.store.version()?;
        }
        Ok(())
    }

    /// Queue reactions in order and the latest presence record. Reactions
    /// made while not joined are dropped; the presence record is kept for the
    /// next join.
    fn flush_presence(&mut self) -> Result<(), SyncError> {
        let mut latest = None;
        let pending: Vec<Ephemeral> = self.presence_rx.try_iter().collect();
        for item in pending {
            match item {
                Ephemeral::Presence(record) => latest = Some(record),
                Ephemeral::Reaction(event) if self.state == ConnectionState::Joined => {
                    self.queue(&ClientMessage::Reaction { event })?;
                }
                Ephemeral::Reaction(event) => {
                    log::debug!("Dropping reaction {} sent outside a room", event.value);
                }
            }
        }
        let Some(record) = latest else {
            return Ok(());
        };
        self.presence = Some(record.clone());
        if self.state == ConnectionState::Joined {
            self.queue(&ClientMessage::Presence { state: record })?;
        }
        Ok(())
    }

    fn queue(&mut self, msg: &ClientMessage) -> Result<(), SyncError> {
        self.outgoing.push(msg.to_json()?);
        Ok(())
    }
}

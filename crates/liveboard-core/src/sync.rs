//! Relay wire protocol.
//!
//! JSON messages between clients and the relay server. Document updates
//! travel as base64-encoded Loro update bytes.
//!
//! ```json
//! { "type": "join", "room": "room-id" }
//! { "type": "sync", "data": "<base64 loro update>" }
//! { "type": "presence", "state": { "cursor": { "x": 100, "y": 200 } } }
//! { "type": "reaction", "event": { "x": 100, "y": 200, "value": "👍" } }
//! ```

use crate::presence::{PresenceRecord, ReactionEvent};
use crate::store::StoreError;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Messages sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room
    Join { room: String },
    /// Leave the current room
    Leave,
    /// Document update (base64 encoded Loro bytes)
    Sync { data: String },
    /// Replace this participant's presence record
    Presence { state: PresenceRecord },
    /// One-shot reaction, relayed but never stored
    Reaction { event: ReactionEvent },
}

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirm room join with current state
    Joined {
        room: String,
        /// Id the server assigned to this connection
        participant_id: String,
        peer_count: usize,
        /// Snapshot of the room's Document, if it has any history
        #[serde(default, skip_serializing_if = "Option::is_none")]
        initial_sync: Option<String>,
        /// Latest presence of everyone already in the room
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        presence: BTreeMap<String, PresenceRecord>,
    },
    PeerJoined { participant_id: String },
    PeerLeft { participant_id: String },
    /// Document update from another participant
    Sync { from: String, data: String },
    /// Presence update from another participant
    Presence { from: String, state: PresenceRecord },
    Reaction { from: String, event: ReactionEvent },
    Error { message: String },
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Link state towards the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Join sent, waiting for confirmation
    Joining,
    Joined,
}

/// What an incoming server message did.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    JoinedRoom {
        room: String,
        participant_id: String,
        peer_count: usize,
    },
    PeerJoined { participant_id: String },
    PeerLeft { participant_id: String },
    /// A remote Document update was imported
    SyncReceived { from: String },
    PresenceReceived { from: String, state: PresenceRecord },
    ReactionReceived { from: String, event: ReactionEvent },
    Error { message: String },
}

/// Errors on the relay link.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid message: {0}")]
    Message(#[from] serde_json::Error),
    #[error("Invalid update payload: {0}")]
    Payload(#[from] base64::DecodeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Encode update bytes for the wire.
pub fn encode_update(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode update bytes from the wire.
pub fn decode_update(data: &str) -> Result<Vec<u8>, SyncError> {
    Ok(STANDARD.decode(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurbo::Point;
    use serde_json::json;

    #[test]
    fn test_client_message_layout() {
        let join = ClientMessage::Join {
            room: "lobby".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&join).unwrap(),
            json!({ "type": "join", "room": "lobby" })
        );
        assert_eq!(ClientMessage::Leave.to_json().unwrap(), r#"{"type":"leave"}"#);

        let presence = ClientMessage::Presence {
            state: PresenceRecord {
                cursor: Some(Point::new(1.0, 2.0)),
                ..Default::default()
            },
        };
        assert_eq!(
            serde_json::to_value(&presence).unwrap(),
            json!({ "type": "presence", "state": { "cursor": { "x": 1.0, "y": 2.0 } } })
        );
    }

    #[test]
    fn test_reaction_layout() {
        let msg = ServerMessage::Reaction {
            from: "p2".to_string(),
            event: ReactionEvent::new(Point::new(3.0, 4.0), "👍"),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "type": "reaction", "from": "p2", "event": { "x": 3.0, "y": 4.0, "value": "👍" } })
        );
        let client = ClientMessage::from_json(r#"{"type":"reaction","event":{"x":1,"y":2,"value":"🔥"}}"#)
            .unwrap();
        assert_eq!(
            client,
            ClientMessage::Reaction {
                event: ReactionEvent::new(Point::new(1.0, 2.0), "🔥")
            }
        );
    }

    #[test]
    fn test_joined_without_optional_fields() {
        let msg = ServerMessage::from_json(
            r#"{ "type": "joined", "room": "r", "participant_id": "p1", "peer_count": 1 }"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ServerMessage::Joined {
                room: "r".to_string(),
                participant_id: "p1".to_string(),
                peer_count: 1,
                initial_sync: None,
                presence: BTreeMap::new(),
            }
        );
    }

    #[test]
    fn test_unknown_message_rejected() {
        assert!(ServerMessage::from_json(r#"{ "type": "teleport" }"#).is_err());
        assert!(ClientMessage::from_json("not json").is_err());
    }

    #[test]
    fn test_update_payload() {
        let bytes = [0u8, 1, 2, 253, 254, 255];
        assert_eq!(decode_update(&encode_update(&bytes)).unwrap(), bytes);
        assert!(matches!(decode_update("@@@"), Err(SyncError::Payload(_))));
    }
}

//! Liveboard WebSocket relay.
//!
//! Fans out Document updates and presence between the participants of a
//! room. Each room keeps its own Loro document, so a participant joining
//! later (or after everyone left) receives the full Document.
//!
//! ## Protocol
//!
//! Messages are JSON, tagged by `type`:
//! ```json
//! { "type": "join", "room": "room-id" }
//! { "type": "sync", "data": "<base64-encoded-loro-bytes>" }
//! { "type": "presence", "state": { "cursor": { "x": 100, "y": 200 } } }
//! { "type": "reaction", "event": { "x": 100, "y": 200, "value": "👍" } }
//! ```
//!
//! A participant that falls behind the room's broadcast buffer is sent the
//! full Document and the cached presence to catch up.

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use liveboard_core::store::{Document, LoroStore, ReplicatedStore};
use liveboard_core::sync::{
    ClientMessage, ServerMessage, SyncError, decode_update, encode_update,
};
use liveboard_core::PresenceRecord;
use tokio::sync::broadcast::error::RecvError;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

/// Sender id of messages the relay itself originates.
pub const RELAY_ID: &str = "relay";

/// Environment variable holding the listen address.
pub const ADDR_ENV: &str = "LIVEBOARD_ADDR";
pub const DEFAULT_ADDR: &str = "0.0.0.0:3030";

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
}

impl ServerConfig {
    /// Read the configuration from the environment.
    pub fn from_env() -> Result<Self, std::net::AddrParseError> {
        let addr = std::env::var(ADDR_ENV).unwrap_or_else(|_| DEFAULT_ADDR.to_string());
        Self::parse(&addr)
    }

    pub fn parse(addr: &str) -> Result<Self, std::net::AddrParseError> {
        Ok(Self { addr: addr.parse()? })
    }
}

/// Room state
struct Room {
    /// Broadcast channel for this room
    tx: broadcast::Sender<(String, ServerMessage)>,
    /// Connected participant ids
    peers: HashSet<String>,
    /// The room's Document
    store: LoroStore,
    /// Whether any update was ever imported
    has_history: bool,
    /// Latest presence per connected participant
    presence: HashMap<String, PresenceRecord>,
}

impl Room {
    fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            peers: HashSet::new(),
            store: LoroStore::new(),
            has_history: false,
            presence: HashMap::new(),
        }
    }
}

/// What a participant gets when joining a room.
struct Joined {
    rx: broadcast::Receiver<(String, ServerMessage)>,
    initial_sync: Option<String>,
    peer_count: usize,
    presence: BTreeMap<String, PresenceRecord>,
}

/// Shared application state
pub struct AppState {
    rooms: DashMap<String, Room>,
    /// Broadcast buffer per room.
    capacity: usize,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    /// Rooms buffer at most `capacity` messages for a slow participant
    /// before it has to catch up from the room's Document.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Add a participant to a room, creating the room on first use.
    fn join_room(&self, room_id: &str, participant: &str) -> Result<Joined, SyncError> {
        let mut room = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(self.capacity));
        room.peers.insert(participant.to_string());
        let initial_sync = if room.has_history {
            Some(encode_update(&room.store.export_snapshot()?))
        } else {
            None
        };
        let presence = room
            .presence
            .iter()
            .filter(|(id, _)| id.as_str() != participant)
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect();
        Ok(Joined {
            rx: room.tx.subscribe(),
            initial_sync,
            peer_count: room.peers.len(),
            presence,
        })
    }

    /// Remove a participant. The room and its Document stay.
    fn leave_room(&self, room_id: &str, participant: &str) {
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            room.peers.remove(participant);
            room.presence.remove(participant);
        }
    }

    /// Merge an update into the room's Document.
    fn apply_sync(&self, room_id: &str, data: &str) -> Result<(), SyncError> {
        let bytes = decode_update(data)?;
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            room.store.import(&bytes)?;
            room.has_history = true;
        }
        Ok(())
    }

    fn set_presence(&self, room_id: &str, participant: &str, record: PresenceRecord) {
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            room.presence.insert(participant.to_string(), record);
        }
    }

    /// What a participant that missed broadcasts needs: the room's whole
    /// Document and everyone else's presence.
    fn catch_up(&self, room_id: &str, participant: &str) -> Vec<ServerMessage> {
        let Some(room) = self.rooms.get(room_id) else {
            return Vec::new();
        };
        let mut messages = Vec::new();
        if room.has_history {
            match room.store.export_snapshot() {
                Ok(bytes) => messages.push(ServerMessage::Sync {
                    from: RELAY_ID.to_string(),
                    data: encode_update(&bytes),
                }),
                Err(e) => warn!("Could not export room {}: {}", room_id, e),
            }
        }
        messages.extend(
            room.presence
                .iter()
                .filter(|(id, _)| id.as_str() != participant)
                .map(|(id, record)| ServerMessage::Presence {
                    from: id.clone(),
                    state: record.clone(),
                }),
        );
        messages
    }

    /// Broadcast message to room
    fn broadcast(&self, room_id: &str, from: &str, msg: ServerMessage) {
        if let Some(room) = self.rooms.get(room_id) {
            // No receivers is fine.
            let _ = room.tx.send((from.to_string(), msg));
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Current Document of a room.
    pub fn document(&self, room_id: &str) -> Option<Document> {
        let room = self.rooms.get(room_id)?;
        match room.store.snapshot() {
            Ok(document) => Some(document),
            Err(e) => {
                warn!("Could not read room {}: {}", room_id, e);
                None
            }
        }
    }

    /// Number of participants connected to a room.
    pub fn peer_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map(|r| r.peers.len()).unwrap_or(0)
    }
}

/// The relay's HTTP routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Index page
async fn index() -> &'static str {
    "Liveboard Relay Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

type Sink = SplitSink<WebSocket, Message>;

/// Send one message. Returns `false` if the connection is gone.
async fn send(sender: &mut Sink, msg: &ServerMessage) -> bool {
    match msg.to_json() {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("Could not encode {:?}: {}", msg, e);
            true
        }
    }
}

/// Per-connection state.
struct Connection {
    participant: String,
    room: Option<String>,
    room_rx: Option<broadcast::Receiver<(String, ServerMessage)>>,
}

impl Connection {
    fn leave(&mut self, state: &AppState) {
        if let Some(room) = self.room.take() {
            state.leave_room(&room, &self.participant);
            state.broadcast(
                &room,
                &self.participant,
                ServerMessage::PeerLeft {
                    participant_id: self.participant.clone(),
                },
            );
            info!("Participant {} left room {}", self.participant, room);
        }
        self.room_rx = None;
    }

    /// React to one client message. Returns `false` if the connection is gone.
    async fn handle(&mut self, msg: ClientMessage, state: &AppState, sender: &mut Sink) -> bool {
        match msg {
            ClientMessage::Join { room } => {
                self.leave(state);
                let joined = match state.join_room(&room, &self.participant) {
                    Ok(joined) => joined,
                    Err(e) => {
                        warn!("Join of room {} failed: {}", room, e);
                        let err = ServerMessage::Error {
                            message: format!("Could not join room: {}", e),
                        };
                        return send(sender, &err).await;
                    }
                };
                self.room_rx = Some(joined.rx);
                self.room = Some(room.clone());

                let reply = ServerMessage::Joined {
                    room: room.clone(),
                    participant_id: self.participant.clone(),
                    peer_count: joined.peer_count,
                    initial_sync: joined.initial_sync,
                    presence: joined.presence,
                };
                if !send(sender, &reply).await {
                    return false;
                }
                state.broadcast(
                    &room,
                    &self.participant,
                    ServerMessage::PeerJoined {
                        participant_id: self.participant.clone(),
                    },
                );
                info!("Participant {} joined room {}", self.participant, room);
                true
            }
            ClientMessage::Leave => {
                self.leave(state);
                true
            }
            ClientMessage::Sync { data } => self.sync(data, state, sender).await,
            ClientMessage::Reaction { event } => {
                if let Some(room) = &self.room {
                    state.broadcast(
                        room,
                        &self.participant,
                        ServerMessage::Reaction {
                            from: self.participant.clone(),
                            event,
                        },
                    );
                }
                true
            }
            ClientMessage::Presence { state: record } => {
                if let Some(room) = &self.room {
                    state.set_presence(room, &self.participant, record.clone());
                    state.broadcast(
                        room,
                        &self.participant,
                        ServerMessage::Presence {
                            from: self.participant.clone(),
                            state: record,
                        },
                    );
                }
                true
            }
        }
    }

    /// Turn one room broadcast into the messages this participant receives.
    fn forward(
        &mut self,
        received: Result<(String, ServerMessage), RecvError>,
        state: &AppState,
    ) -> Vec<ServerMessage> {
        match received {
            // Don't echo back to sender
            Ok((from, msg)) if from != self.participant => vec![msg],
            Ok(_) => Vec::new(),
            Err(RecvError::Lagged(skipped)) => {
                warn!(
                    "{} missed {} room messages, resending the room state",
                    self.participant, skipped
                );
                match &self.room {
                    Some(room) => state.catch_up(room, &self.participant),
                    None => Vec::new(),
                }
            }
            Err(RecvError::Closed) => {
                self.room_rx = None;
                Vec::new()
            }
        }
    }

    async fn sync(&mut self, data: String, state: &AppState, sender: &mut Sink) -> bool {
        let Some(room) = &self.room else {
            debug!("Ignoring sync from {} outside a room", self.participant);
            return true;
        };
        if let Err(e) = state.apply_sync(room, &data) {
            warn!("Rejected update from {}: {}", self.participant, e);
            let err = ServerMessage::Error {
                message: format!("Invalid update: {}", e),
            };
            return send(sender, &err).await;
        }
        state.broadcast(
            room,
            &self.participant,
            ServerMessage::Sync {
                from: self.participant.clone(),
                data,
            },
        );
        true
    }
}

/// Handle a WebSocket connection
pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let mut conn = Connection {
        participant: Uuid::new_v4().to_string(),
        room: None,
        room_rx: None,
    };
    info!("New connection: {}", conn.participant);

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            // Handle incoming messages from client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let alive = match ClientMessage::from_json(text.as_str()) {
                            Ok(client_msg) => conn.handle(client_msg, &state, &mut sender).await,
                            Err(e) => {
                                warn!("Invalid message from {}: {}", conn.participant, e);
                                let err = ServerMessage::Error {
                                    message: format!("Invalid message: {}", e),
                                };
                                send(&mut sender, &err).await
                            }
                        };
                        if !alive {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        // Binary frames are raw update bytes
                        if !conn.sync(encode_update(&data), &state, &mut sender).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // Ignore ping/pong
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", conn.participant, e);
                        break;
                    }
                }
            }

            // Handle broadcast messages from room
            msg = async {
                match &mut conn.room_rx {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                let mut alive = true;
                for server_msg in conn.forward(msg, &state) {
                    if !send(&mut sender, &server_msg).await {
                        alive = false;
                        break;
                    }
                }
                if !alive {
                    break;
                }
            }
        }
    }

    // Cleanup on disconnect
    conn.leave(&state);
    info!("Connection closed: {}", conn.participant);
}

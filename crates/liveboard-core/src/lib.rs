//! Liveboard Core Library
//!
//! Shared-document synchronization core for the Liveboard collaborative
//! whiteboard: shapes and their records, the replicated store contract, the
//! single mutation path with undo/redo, presence, and the local canvas
//! adapter that reconciles drawables against the Document.

pub mod canvas;
pub mod codec;
pub mod collaboration;
pub mod config;
pub mod history;
pub mod input;
pub mod pipeline;
pub mod presence;
pub mod session;
pub mod shapes;
pub mod store;
pub mod sync;
pub mod tools;

pub use canvas::{
    CanvasAdapter, CanvasCommand, Drawable, DrawableSet, GestureState, Phase, ReconcileReport,
    reconcile,
};
pub use codec::{CodecError, ShapeRecord};
pub use collaboration::{RelayPresence, RoomLink};
pub use config::{ConfigError, SessionConfig};
pub use history::HistoryController;
pub use input::{CanvasEvent, Key, Modifiers};
pub use pipeline::{MutationError, MutationPipeline};
pub use presence::{
    LocalPresenceHub, PresenceChannel, PresenceError, PresenceEvent, PresenceRecord,
    PresenceRoster, ReactionEvent,
};
pub use session::{SaveStatus, Session};
pub use shapes::{ObjectId, Shape};
pub use store::{Document, LoroStore, MemoryStore, ReplicatedStore, StoreError};
pub use sync::{ClientMessage, ConnectionState, ServerMessage, SyncError, SyncEvent};
pub use tools::ToolKind;

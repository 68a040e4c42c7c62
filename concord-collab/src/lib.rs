//! # concord-collab: change propagation for shared CAD documents
//!
//! Captures local host edits as [`Change`](concord_core::Change) records,
//! ships them to peers, and replays received changes on the local host
//! document through a single idle-driven queue.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  HostEvent   ┌───────────────┐  Change   ┌──────────────┐
//! │ HostDocument │ ───────────► │ ChangePipeline│ ────────► │ ChangeClient │
//! │ (CAD host)   │              │ create/receive│ ◄──────── │ (WebSocket)  │
//! └──────▲───────┘              └───────┬───────┘           └──────────────┘
//!        │                              │ enqueue
//!        │ on_idle          ┌───────────▼──────────┐
//!        └──────────────────│ ShadowDocument       │
//!                           │ ActionQueue          │
//!                           │ RealisedChangeTable  │
//!                           └──────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`registry`]: host ↔ shadow pairing, lifecycle events, disposal
//! - [`shadow`]: per-document queue, identity table and client handle
//! - [`queue`]: FIFO action queue drained on the host idle cycle
//! - [`realised`]: local id ↔ change id table
//! - [`pipeline`]: create/receive handler dispatch
//! - [`handlers`]: built-in geometry and layer handlers
//! - [`diff`]: field deltas and hierarchical relocation
//! - [`protocol`]: binary change envelope
//! - [`client`]: WebSocket change client with offline queue
//! - [`session`]: the context object tying it together

pub mod bimap;
pub mod client;
pub mod config;
pub mod diff;
pub mod error;
pub mod handlers;
pub mod pipeline;
pub mod protocol;
pub mod queue;
pub mod realised;
pub mod registry;
pub mod session;
pub mod shadow;

// Re-exports for convenience
pub use bimap::BiMap;
pub use client::{ChangeClient, ClientEvent, ConnectionState, OfflineQueue};
pub use config::SessionConfig;
pub use diff::{relocate, Delta, DeltaKey, Direction, FieldRegistry, Hierarchy, KEY_DIVIDER};
pub use error::SyncError;
pub use handlers::layer::{layer_defaults, layer_difference, update_layer, LayerTree};
pub use pipeline::{ChangeCreateAction, ChangePipeline, ChangeReceiveAction, CreateArgs, HostEvent};
pub use protocol::{ChangeMessage, MessageType, ProtocolError};
pub use queue::{ActionQueue, CycleOutcome, IdleAction, IdleArgs, QueueState};
pub use realised::RealisedChangeTable;
pub use registry::{lock_host, DocumentRegistry, RegistryEvent, SharedHost};
pub use session::Session;
pub use shadow::{BusyGuard, ShadowDocument, User, Users};

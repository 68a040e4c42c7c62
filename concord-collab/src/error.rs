use concord_core::PayloadError;
use uuid::Uuid;

use crate::protocol::ProtocolError;

/// Errors surfaced by the sync engine.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The document has no counterpart in the registry.
    #[error("document has no registered pairing")]
    MissingPairing,
    #[error("shadow document {0} has been disposed")]
    Disposed(Uuid),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("payload is missing field {0}")]
    MissingField(String),
}

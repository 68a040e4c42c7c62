//! The `Change` record: one logical edit, broadcast to every participant.
//!
//! Wire shape:
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┬──────────────────┐
//! │ id       │ owner    │ kind     │ action   │ payload          │
//! │ uuid     │ string   │ tag      │ bitflags │ optional bytes   │
//! └──────────┴──────────┴──────────┴──────────┴──────────────────┘
//! ```
//!
//! `id` is minted once per logical entity and reused across delete/undelete.

use std::collections::BTreeMap;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

bitflags! {
    /// What a change does. Flags combine, e.g. `ADD | TEMPORARY`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ChangeAction: u32 {
        const ADD = 1 << 0;
        const REMOVE = 1 << 1;
        const UPDATE = 1 << 2;
        const TEMPORARY = 1 << 3;
        const UNDELETE = 1 << 4;
        const LOCKED = 1 << 5;
        const UNLOCKED = 1 << 6;
    }
}

/// Entity family a change describes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Geometry,
    Layer,
    /// Kinds contributed by handlers outside this crate.
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: Uuid,
    pub owner: String,
    pub kind: ChangeKind,
    pub action: ChangeAction,
    pub payload: Option<Vec<u8>>,
}

impl Change {
    pub fn new(id: Uuid, owner: impl Into<String>, kind: ChangeKind, action: ChangeAction) -> Self {
        Self {
            id,
            owner: owner.into(),
            kind,
            action,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// True if every bit of `action` is set on this change.
    pub fn has_flag(&self, action: ChangeAction) -> bool {
        self.action.contains(action)
    }

    /// Decode the key/value packet carried by attribute changes.
    pub fn payload_packet(&self) -> Result<PayloadPacket, PayloadError> {
        let bytes = self.payload.as_deref().ok_or(PayloadError::Missing)?;
        PayloadPacket::decode(bytes)
    }
}

/// Key/value body of an attribute change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadPacket {
    #[serde(rename = "Updates")]
    pub updates: BTreeMap<String, String>,
}

impl PayloadPacket {
    pub fn new(updates: BTreeMap<String, String>) -> Self {
        Self { updates }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        serde_json::to_vec(self).map_err(PayloadError::from)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PayloadError> {
        serde_json::from_slice(bytes).map_err(PayloadError::from)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PayloadError {
    #[error("change carries no payload")]
    Missing,
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for PayloadError {
    fn from(e: serde_json::Error) -> Self {
        PayloadError::Malformed(e.to_string())
    }
}

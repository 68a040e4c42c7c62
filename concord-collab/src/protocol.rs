//! Binary envelope for changes exchanged with the session server.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬──────────┬──────────┬──────────┐
//! │ msg_type │ sender    │ doc_id   │ seq      │ payload  │
//! │ 1 byte   │ 16 bytes  │ 16 bytes │ varint   │ variable │
//! └──────────┴───────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! `Change` payloads carry one bincode-encoded [`Change`]; `Init` carries the
//! server's existing change set as a `Vec<Change>`.

use concord_core::Change;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// One change from a participant
    Change = 1,
    /// Existing change set, sent by the server after a join
    Init = 2,
    /// Participant joined the document
    Join = 3,
    /// Participant left the document
    Leave = 4,
    Ping = 5,
    Pong = 6,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeMessage {
    pub msg_type: MessageType,
    pub sender: Uuid,
    pub doc_id: Uuid,
    /// Per-sender sequence number
    pub seq: u64,
    pub payload: Vec<u8>,
}

fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| ProtocolError::Serialization(e.to_string()))
}

fn from_bytes<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
    Ok(value)
}

impl ChangeMessage {
    fn with_payload(
        msg_type: MessageType,
        sender: Uuid,
        doc_id: Uuid,
        seq: u64,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            msg_type,
            sender,
            doc_id,
            seq,
            payload,
        }
    }

    pub fn change(
        sender: Uuid,
        doc_id: Uuid,
        seq: u64,
        change: &Change,
    ) -> Result<Self, ProtocolError> {
        Ok(Self::with_payload(MessageType::Change, sender, doc_id, seq, to_bytes(change)?))
    }

    pub fn init(sender: Uuid, doc_id: Uuid, changes: &[Change]) -> Result<Self, ProtocolError> {
        Ok(Self::with_payload(MessageType::Init, sender, doc_id, 0, to_bytes(&changes)?))
    }

    /// Join announcement carrying the participant's user name.
    pub fn join(sender: Uuid, doc_id: Uuid, user_name: &str) -> Self {
        Self::with_payload(MessageType::Join, sender, doc_id, 0, user_name.as_bytes().to_vec())
    }

    pub fn leave(sender: Uuid, doc_id: Uuid) -> Self {
        Self::with_payload(MessageType::Leave, sender, doc_id, 0, Vec::new())
    }

    pub fn ping(sender: Uuid) -> Self {
        Self::with_payload(MessageType::Ping, sender, Uuid::nil(), 0, Vec::new())
    }

    pub fn pong(sender: Uuid) -> Self {
        Self::with_payload(MessageType::Pong, sender, Uuid::nil(), 0, Vec::new())
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        to_bytes(self)
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        from_bytes(bytes)
    }

    /// Parse a `Change` payload.
    pub fn to_change(&self) -> Result<Change, ProtocolError> {
        if self.msg_type != MessageType::Change {
            return Err(ProtocolError::InvalidMessageType);
        }
        from_bytes(&self.payload)
    }

    /// Parse an `Init` payload.
    pub fn to_changes(&self) -> Result<Vec<Change>, ProtocolError> {
        if self.msg_type != MessageType::Init {
            return Err(ProtocolError::InvalidMessageType);
        }
        from_bytes(&self.payload)
    }

    pub fn user_name(&self) -> Result<String, ProtocolError> {
        if self.msg_type != MessageType::Join {
            return Err(ProtocolError::InvalidMessageType);
        }
        String::from_utf8(self.payload.clone())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Invalid message type")]
    InvalidMessageType,
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Connection timeout")]
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::{ChangeAction, ChangeKind};

    fn sample(action: ChangeAction) -> Change {
        Change::new(Uuid::new_v4(), "alice", ChangeKind::Geometry, action)
            .with_payload(vec![1, 2, 3])
    }

    #[test]
    fn test_change_message_carries_change() {
        let sender = Uuid::new_v4();
        let doc = Uuid::new_v4();
        let change = sample(ChangeAction::ADD | ChangeAction::TEMPORARY);

        let msg = ChangeMessage::change(sender, doc, 42, &change).unwrap();
        let decoded = ChangeMessage::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.msg_type, MessageType::Change);
        assert_eq!(decoded.sender, sender);
        assert_eq!(decoded.doc_id, doc);
        assert_eq!(decoded.seq, 42);
        assert_eq!(decoded.to_change().unwrap(), change);
    }

    #[test]
    fn test_init_carries_change_set() {
        let changes = vec![
            sample(ChangeAction::ADD),
            Change::new(
                Uuid::new_v4(),
                "bob",
                ChangeKind::Other("material".into()),
                ChangeAction::UPDATE,
            ),
        ];

        let msg = ChangeMessage::init(Uuid::nil(), Uuid::new_v4(), &changes).unwrap();
        let decoded = ChangeMessage::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.to_changes().unwrap(), changes);
    }

    #[test]
    fn test_join_user_name() {
        let msg = ChangeMessage::join(Uuid::new_v4(), Uuid::new_v4(), "Alice");
        let decoded = ChangeMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.user_name().unwrap(), "Alice");
    }

    #[test]
    fn test_ping_pong() {
        let sender = Uuid::new_v4();
        let ping = ChangeMessage::decode(&ChangeMessage::ping(sender).encode().unwrap()).unwrap();
        let pong = ChangeMessage::decode(&ChangeMessage::pong(sender).encode().unwrap()).unwrap();

        assert_eq!(ping.msg_type, MessageType::Ping);
        assert_eq!(pong.msg_type, MessageType::Pong);
        assert!(ping.payload.is_empty());
    }

    #[test]
    fn test_invalid_message_type_error() {
        let msg = ChangeMessage::leave(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(msg.to_change(), Err(ProtocolError::InvalidMessageType));
        assert_eq!(msg.to_changes(), Err(ProtocolError::InvalidMessageType));
        assert!(msg.user_name().is_err());
    }

    #[test]
    fn test_decode_invalid_bytes() {
        let garbage = vec![0xFF, 0xFE, 0xFD];
        assert!(ChangeMessage::decode(&garbage).is_err());
    }

    #[test]
    fn test_corrupt_change_payload() {
        let mut msg =
            ChangeMessage::change(Uuid::new_v4(), Uuid::new_v4(), 1, &sample(ChangeAction::ADD))
                .unwrap();
        msg.payload.truncate(3);
        assert!(matches!(msg.to_change(), Err(ProtocolError::Deserialization(_))));
    }

    #[test]
    fn test_envelope_size_efficient() {
        let change = sample(ChangeAction::REMOVE);
        let encoded = ChangeMessage::change(Uuid::new_v4(), Uuid::new_v4(), 1, &change)
            .unwrap()
            .encode()
            .unwrap();
        assert!(encoded.len() < 120, "Encoded size {} too large", encoded.len());
    }

    #[test]
    fn test_message_type_values() {
        assert_eq!(MessageType::Change as u8, 1);
        assert_eq!(MessageType::Init as u8, 2);
        assert_eq!(MessageType::Join as u8, 3);
        assert_eq!(MessageType::Leave as u8, 4);
        assert_eq!(MessageType::Ping as u8, 5);
        assert_eq!(MessageType::Pong as u8, 6);
    }
}

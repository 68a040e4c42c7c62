//! WebSocket change client for one shadow document.
//!
//! Provides:
//! - Connection lifecycle (connect, graceful stop)
//! - Change send/receive over the binary [`ChangeMessage`] envelope
//! - Offline queue for changes captured while disconnected
//!
//! Every method takes `&self` so the client can be shared with the shadow
//! document that owns it.

use std::collections::VecDeque;
use std::sync::{Mutex as StdMutex, PoisonError};
use std::sync::Arc;
use std::time::Duration;

use concord_core::Change;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::protocol::{ChangeMessage, MessageType, ProtocolError};

/// How long `stop` waits for the writer to flush and close the socket.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the change client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    /// The server's existing change set, delivered once after joining
    Initialized(Vec<Change>),
    /// A change published by another participant
    RemoteChange(Change),
    Disconnected,
}

/// Changes captured while disconnected, replayed in order on connect.
pub struct OfflineQueue {
    queue: VecDeque<QueuedChange>,
    max_size: usize,
}

#[derive(Debug, Clone)]
struct QueuedChange {
    seq: u64,
    change: Change,
}

impl OfflineQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Queue a change for later replay. Returns false when full.
    pub fn enqueue(&mut self, seq: u64, change: Change) -> bool {
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back(QueuedChange { seq, change });
        true
    }

    pub fn drain(&mut self) -> Vec<(u64, Change)> {
        self.queue.drain(..).map(|q| (q.seq, q.change)).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Total payload bytes queued.
    pub fn total_bytes(&self) -> usize {
        self.queue
            .iter()
            .map(|q| q.change.payload.as_ref().map_or(0, Vec::len))
            .sum()
    }
}

/// Deliver a lifecycle event without waiting on a reader that may never
/// drain the channel.
fn emit(event_tx: &mpsc::Sender<ClientEvent>, event: ClientEvent) {
    if let Err(e) = event_tx.try_send(event) {
        match e {
            TrySendError::Full(event) => log::warn!("Event channel full, dropping {event:?}"),
            TrySendError::Closed(_) => {}
        }
    }
}

struct Connection {
    outgoing: mpsc::Sender<Vec<u8>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

pub struct ChangeClient {
    client_id: Uuid,
    user_name: String,
    doc_id: Uuid,
    server_url: String,
    state: Arc<RwLock<ConnectionState>>,
    seq: RwLock<u64>,
    offline_queue: Mutex<OfflineQueue>,
    connection: Mutex<Option<Connection>>,
    event_tx: mpsc::Sender<ClientEvent>,
    event_rx: StdMutex<Option<mpsc::Receiver<ClientEvent>>>,
}

impl ChangeClient {
    pub fn new(
        doc_id: Uuid,
        user_name: impl Into<String>,
        server_url: impl Into<String>,
        offline_capacity: usize,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            client_id: Uuid::new_v4(),
            user_name: user_name.into(),
            doc_id,
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            seq: RwLock::new(0),
            offline_queue: Mutex::new(OfflineQueue::new(offline_capacity)),
            connection: Mutex::new(None),
            event_tx,
            event_rx: StdMutex::new(Some(event_rx)),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Connect to the server and join the document.
    ///
    /// Spawns background tasks for reading and writing WebSocket messages,
    /// then replays the offline queue.
    pub async fn connect(&self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let url = format!("{}/{}", self.server_url, self.doc_id);
        let ws_stream = match tokio_tungstenite::connect_async(&url).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                log::warn!("Could not connect to {url}: {e}");
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer: forward outgoing frames until every sender is gone, then close.
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        let writer = tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    return;
                }
            }
            let _ = ws_writer.close().await;
        });

        // Reader: turn incoming frames into client events.
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let pong_tx = out_tx.clone();
        let client_id = self.client_id;
        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                let bytes: Vec<u8> = match frame {
                    Ok(Message::Binary(data)) => data.into(),
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                let msg = match ChangeMessage::decode(&bytes) {
                    Ok(msg) if msg.sender != client_id => msg,
                    Ok(_) => continue,
                    Err(e) => {
                        log::debug!("Dropping undecodable frame: {e}");
                        continue;
                    }
                };

                let event = match msg.msg_type {
                    MessageType::Change => msg.to_change().map(ClientEvent::RemoteChange),
                    MessageType::Init => msg.to_changes().map(ClientEvent::Initialized),
                    MessageType::Ping => {
                        if let Ok(pong) = ChangeMessage::pong(client_id).encode() {
                            let _ = pong_tx.send(pong).await;
                        }
                        continue;
                    }
                    MessageType::Join | MessageType::Leave | MessageType::Pong => continue,
                };
                match event {
                    Ok(event) => {
                        let _ = event_tx.send(event).await;
                    }
                    Err(e) => log::warn!("Dropping malformed {:?} message: {e}", msg.msg_type),
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            emit(&event_tx, ClientEvent::Disconnected);
        });

        let join = ChangeMessage::join(self.client_id, self.doc_id, &self.user_name).encode()?;
        let _ = out_tx.send(join).await;

        *self.connection.lock().await = Some(Connection {
            outgoing: out_tx,
            reader,
            writer,
        });
        *self.state.write().await = ConnectionState::Connected;
        emit(&self.event_tx, ClientEvent::Connected);

        let queued = self.offline_queue.lock().await.drain();
        if !queued.is_empty() {
            log::info!("Replaying {} queued changes", queued.len());
            for (seq, change) in queued {
                self.transmit(seq, &change).await?;
            }
        }
        Ok(())
    }

    async fn transmit(&self, seq: u64, change: &Change) -> Result<(), ProtocolError> {
        let encoded = ChangeMessage::change(self.client_id, self.doc_id, seq, change)?.encode()?;
        let connection = self.connection.lock().await;
        let Some(connection) = connection.as_ref() else {
            return Err(ProtocolError::ConnectionClosed);
        };
        connection
            .outgoing
            .send(encoded)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Publish a change.
    ///
    /// If disconnected, queues the change for replay on the next connect.
    pub async fn send_change(&self, change: &Change) -> Result<(), ProtocolError> {
        let seq = {
            let mut seq = self.seq.write().await;
            *seq += 1;
            *seq
        };

        if *self.state.read().await != ConnectionState::Connected {
            let mut queue = self.offline_queue.lock().await;
            if !queue.enqueue(seq, change.clone()) {
                return Err(ProtocolError::ConnectionClosed);
            }
            return Ok(());
        }
        self.transmit(seq, change).await
    }

    /// Leave the document and close the connection.
    ///
    /// A no-op when not connected.
    pub async fn stop(&self) -> Result<(), ProtocolError> {
        let Some(connection) = self.connection.lock().await.take() else {
            return Ok(());
        };

        let leave = ChangeMessage::leave(self.client_id, self.doc_id).encode()?;
        let sent = connection.outgoing.send(leave).await;
        connection.reader.abort();
        drop(connection.outgoing);

        let flushed = tokio::time::timeout(STOP_TIMEOUT, connection.writer).await;
        *self.state.write().await = ConnectionState::Disconnected;
        emit(&self.event_tx, ClientEvent::Disconnected);

        sent.map_err(|_| ProtocolError::ConnectionClosed)?;
        match flushed {
            Ok(_) => Ok(()),
            Err(_) => Err(ProtocolError::Timeout),
        }
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn doc_id(&self) -> Uuid {
        self.doc_id
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Sequence number of the last change sent or queued.
    pub async fn seq(&self) -> u64 {
        *self.seq.read().await
    }

    pub async fn offline_queue_len(&self) -> usize {
        self.offline_queue.lock().await.len()
    }
}

impl std::fmt::Debug for ChangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeClient")
            .field("client_id", &self.client_id)
            .field("doc_id", &self.doc_id)
            .field("server_url", &self.server_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::{ChangeAction, ChangeKind};

    fn client() -> ChangeClient {
        ChangeClient::new(Uuid::new_v4(), "alice", "ws://localhost:9090", 100)
    }

    fn change(payload: usize) -> Change {
        Change::new(Uuid::new_v4(), "alice", ChangeKind::Geometry, ChangeAction::ADD)
            .with_payload(vec![0; payload])
    }

    #[test]
    fn test_client_creation() {
        let doc_id = Uuid::new_v4();
        let client = ChangeClient::new(doc_id, "alice", "ws://localhost:9090", 10);

        assert_eq!(client.user_name(), "alice");
        assert_eq!(client.doc_id(), doc_id);
        assert_eq!(client.server_url(), "ws://localhost:9090");
    }

    #[tokio::test]
    async fn test_client_initial_state() {
        let client = client();
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert_eq!(client.seq().await, 0);
        assert_eq!(client.offline_queue_len().await, 0);
    }

    #[tokio::test]
    async fn test_send_change_offline_queues() {
        let client = client();

        client.send_change(&change(3)).await.unwrap();
        client.send_change(&change(3)).await.unwrap();

        assert_eq!(client.offline_queue_len().await, 2);
        assert_eq!(client.seq().await, 2);
    }

    #[tokio::test]
    async fn test_full_offline_queue_rejects() {
        let client = ChangeClient::new(Uuid::new_v4(), "alice", "ws://localhost:9090", 1);
        client.send_change(&change(1)).await.unwrap();
        assert_eq!(
            client.send_change(&change(1)).await,
            Err(ProtocolError::ConnectionClosed)
        );
    }

    #[tokio::test]
    async fn test_stop_when_never_connected() {
        let client = client();
        client.stop().await.unwrap();
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let client = ChangeClient::new(Uuid::new_v4(), "alice", "ws://127.0.0.1:1", 10);
        assert!(client.connect().await.is_err());
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[test]
    fn test_offline_queue() {
        let mut queue = OfflineQueue::new(100);
        assert!(queue.is_empty());

        let first = change(3);
        queue.enqueue(1, first.clone());
        queue.enqueue(2, change(4));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.total_bytes(), 7);

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0], (1, first));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_offline_queue_capacity() {
        let mut queue = OfflineQueue::new(3);
        assert!(queue.enqueue(1, change(1)));
        assert!(queue.enqueue(2, change(1)));
        assert!(queue.enqueue(3, change(1)));
        assert!(!queue.enqueue(4, change(1)));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_offline_queue_clear() {
        let mut queue = OfflineQueue::new(100);
        queue.enqueue(1, change(1));
        queue.clear();
        assert!(queue.is_empty());
    }

    /// Accepts one WebSocket connection and reads until it closes.
    async fn sink_server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });
        format!("ws://127.0.0.1:{port}")
    }

    #[tokio::test]
    async fn test_stop_with_unread_events_completes() {
        let url = sink_server().await;
        let client = ChangeClient::new(Uuid::new_v4(), "alice", url, 10);
        client.connect().await.unwrap();

        // Nobody takes the receiver; fill whatever room is left.
        while client.event_tx.try_send(ClientEvent::Connected).is_ok() {}

        let stopped = tokio::time::timeout(Duration::from_secs(8), client.stop()).await;
        assert!(stopped.is_ok(), "stop must not wait on the event channel");
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_with_full_event_channel() {
        let url = sink_server().await;
        let client = ChangeClient::new(Uuid::new_v4(), "alice", url, 10);
        while client.event_tx.try_send(ClientEvent::Disconnected).is_ok() {}

        let connected = tokio::time::timeout(Duration::from_secs(8), client.connect()).await;
        assert!(matches!(connected, Ok(Ok(()))));
        assert_eq!(client.connection_state().await, ConnectionState::Connected);
        client.stop().await.unwrap();
    }

    #[test]
    fn test_take_event_rx() {
        let client = client();
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }
}

//! Session: the context object that owns document resolution and change
//! conversion for one participant.
//!
//! ```text
//!  host edit ──► capture/publish ──► ChangeClient ──► peers
//!  peers ──► ChangeClient ──► handle_client_event ──► receive ──► queue
//!  host idle ──► on_idle ──► queued mutation ──► host document
//! ```

use std::sync::Arc;

use concord_core::Change;

use crate::client::{ChangeClient, ClientEvent};
use crate::config::SessionConfig;
use crate::error::SyncError;
use crate::pipeline::{ChangePipeline, HostEvent};
use crate::registry::{DocumentRegistry, SharedHost};
use crate::shadow::ShadowDocument;

pub struct Session {
    config: SessionConfig,
    registry: DocumentRegistry,
    pipeline: ChangePipeline,
}

impl Session {
    /// Session with the built-in geometry and layer handlers.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_pipeline(config, ChangePipeline::with_defaults())
    }

    pub fn with_pipeline(config: SessionConfig, pipeline: ChangePipeline) -> Self {
        let registry = DocumentRegistry::new(config.user_name.clone(), config.event_capacity);
        Self {
            config,
            registry,
            pipeline,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &DocumentRegistry {
        &self.registry
    }

    pub fn pipeline(&self) -> &ChangePipeline {
        &self.pipeline
    }

    /// Pair `host` with a shadow document; idempotent per host.
    pub fn open(&self, host: SharedHost) -> Arc<ShadowDocument> {
        self.registry.register(host)
    }

    /// Convert a host event into changes without sending them.
    pub fn capture(
        &self,
        doc: &Arc<ShadowDocument>,
        event: &HostEvent,
    ) -> Result<Vec<Change>, SyncError> {
        self.pipeline.convert(&self.registry, doc, event)
    }

    /// Convert a host event and send the resulting changes through the
    /// document's client, if one is attached.
    pub async fn publish(
        &self,
        doc: &Arc<ShadowDocument>,
        event: &HostEvent,
    ) -> Result<Vec<Change>, SyncError> {
        let changes = self.capture(doc, event)?;
        if let Some(client) = doc.client() {
            for change in &changes {
                client.send_change(change).await?;
            }
        }
        Ok(changes)
    }

    pub fn receive(&self, doc: &Arc<ShadowDocument>, change: Change) -> Result<bool, SyncError> {
        self.pipeline.receive(&self.registry, doc, change)
    }

    /// Receive a batch, logging and skipping changes that fail.
    ///
    /// Returns the number of changes a handler accepted.
    pub fn receive_all(
        &self,
        doc: &Arc<ShadowDocument>,
        changes: impl IntoIterator<Item = Change>,
    ) -> usize {
        let mut accepted = 0;
        for change in changes {
            let id = change.id;
            match self.receive(doc, change) {
                Ok(true) => accepted += 1,
                Ok(false) => {}
                Err(e) => log::warn!("Dropping change {id} for {}: {e}", doc.id()),
            }
        }
        accepted
    }

    /// Run one host idle cycle across all open documents.
    pub fn on_idle(&self) -> usize {
        self.registry.on_idle()
    }

    pub async fn close(&self, doc: &Arc<ShadowDocument>) {
        self.registry.dispose(doc).await;
    }

    /// Attach a change client to `doc` and connect it.
    ///
    /// The client stays attached if the connection fails; changes published
    /// meanwhile wait in its offline queue until `ChangeClient::connect`
    /// succeeds.
    pub async fn connect(&self, doc: &Arc<ShadowDocument>) -> Result<Arc<ChangeClient>, SyncError> {
        let host_id = self.registry.host_id(doc).ok_or(SyncError::MissingPairing)?;
        let client = Arc::new(ChangeClient::new(
            host_id,
            doc.user_name(),
            self.config.server_url.clone(),
            self.config.offline_queue_capacity,
        ));
        doc.attach_client(client.clone());
        client.connect().await?;
        log::info!("Document {} connected to {}", doc.id(), self.config.server_url);
        Ok(client)
    }

    /// Feed one client event into the session.
    ///
    /// Returns the number of changes accepted for application.
    pub fn handle_client_event(
        &self,
        doc: &Arc<ShadowDocument>,
        event: ClientEvent,
    ) -> Result<usize, SyncError> {
        match event {
            ClientEvent::Initialized(changes) => {
                log::info!("Document {} initialized with {} changes", doc.id(), changes.len());
                Ok(self.receive_all(doc, changes))
            }
            ClientEvent::RemoteChange(change) => Ok(usize::from(self.receive(doc, change)?)),
            ClientEvent::Connected => {
                log::debug!("Document {} connected", doc.id());
                Ok(0)
            }
            ClientEvent::Disconnected => {
                log::info!("Document {} disconnected", doc.id());
                Ok(0)
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}

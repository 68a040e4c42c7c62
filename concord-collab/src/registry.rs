//! Document registry: the bijection between host documents and shadow
//! documents, owned by a session rather than held in global state.
//!
//! ```text
//!   register(host) ──► ShadowDocument ──► DocumentRegistered
//!                          │
//!                          ├─ start_queue_pump: on_idle() runs one action
//!                          │  per cycle
//!                          ├─ any drain to empty ──► redraw ──► QueueCompleted
//!                          ▼
//!   dispose(shadow) ──► force drain ──► DocumentDisposed ──► stop pump
//!                   ──► stop client ──► unpair ──► restore + clear host
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use concord_core::{DocumentId, HostDocument, ObjectFilter};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::bimap::BiMap;
use crate::queue::{CycleOutcome, QueueState};
use crate::shadow::{ShadowDocument, User};

/// Shared handle to a host document.
pub type SharedHost = Arc<Mutex<dyn HostDocument>>;

/// Lock a host document, recovering from a poisoned lock.
pub fn lock_host(host: &SharedHost) -> MutexGuard<'_, dyn HostDocument + 'static> {
    host.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lifecycle notifications.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    DocumentRegistered(Arc<ShadowDocument>),
    /// The shadow document with this id drained its queue; its host has been
    /// redrawn.
    QueueCompleted(Uuid),
    DocumentDisposed(Arc<ShadowDocument>),
}

#[derive(Default)]
struct RegistryState {
    pairs: BiMap<DocumentId, Uuid>,
    hosts: HashMap<DocumentId, SharedHost>,
    shadows: HashMap<Uuid, Arc<ShadowDocument>>,
    pumped: Vec<Uuid>,
}

pub struct DocumentRegistry {
    state: Mutex<RegistryState>,
    events: broadcast::Sender<RegistryEvent>,
    user_name: String,
}

impl DocumentRegistry {
    /// New registry whose shadow documents act as `user_name`.
    pub fn new(user_name: impl Into<String>, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            state: Mutex::new(RegistryState::default()),
            events,
            user_name: user_name.into(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn notify(&self, event: RegistryEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Pair `host` with a shadow document, creating one on first sight.
    pub fn register(&self, host: SharedHost) -> Arc<ShadowDocument> {
        let host_id = lock_host(&host).id();

        let shadow = {
            let mut state = self.lock();
            if let Some(existing) = state
                .pairs
                .get_by_left(&host_id)
                .and_then(|shadow_id| state.shadows.get(shadow_id))
            {
                return existing.clone();
            }

            let shadow = Arc::new(ShadowDocument::new(User::new(self.user_name.clone())));
            let events = self.events.clone();
            let redraw_target = host.clone();
            shadow.on_queue_completed(move |doc| {
                lock_host(&redraw_target).redraw();
                let _ = events.send(RegistryEvent::QueueCompleted(doc.id()));
            });
            state.pairs.insert(host_id, shadow.id());
            state.hosts.insert(host_id, host);
            state.shadows.insert(shadow.id(), shadow.clone());
            shadow
        };

        log::info!("Registered host document {host_id} as {}", shadow.id());
        self.notify(RegistryEvent::DocumentRegistered(shadow.clone()));
        self.start_queue_pump(&shadow);
        shadow
    }

    pub fn get_shadow(&self, host_id: DocumentId) -> Option<Arc<ShadowDocument>> {
        let state = self.lock();
        state
            .pairs
            .get_by_left(&host_id)
            .and_then(|shadow_id| state.shadows.get(shadow_id))
            .cloned()
    }

    pub fn get_host(&self, shadow: &ShadowDocument) -> Option<SharedHost> {
        let state = self.lock();
        state
            .pairs
            .get_by_right(&shadow.id())
            .and_then(|host_id| state.hosts.get(host_id))
            .cloned()
    }

    pub fn host_id(&self, shadow: &ShadowDocument) -> Option<DocumentId> {
        self.lock().pairs.get_by_right(&shadow.id()).copied()
    }

    /// Snapshot of every registered shadow document.
    pub fn open_documents(&self) -> Vec<Arc<ShadowDocument>> {
        self.lock().shadows.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pairs.is_empty()
    }

    /// Hook `shadow`'s queue into the idle cycle.
    pub fn start_queue_pump(&self, shadow: &ShadowDocument) {
        let mut state = self.lock();
        if !state.pumped.contains(&shadow.id()) {
            state.pumped.push(shadow.id());
        }
    }

    pub fn stop_queue_pump(&self, shadow: &ShadowDocument) {
        self.lock().pumped.retain(|id| *id != shadow.id());
    }

    pub fn is_pumped(&self, shadow: &ShadowDocument) -> bool {
        self.lock().pumped.contains(&shadow.id())
    }

    /// One host idle cycle: run the next action of every pumped document with
    /// pending work. A document whose queue drains gets its host redrawn.
    ///
    /// Returns the number of actions run.
    pub fn on_idle(&self) -> usize {
        let pumped: Vec<Arc<ShadowDocument>> = {
            let state = self.lock();
            state
                .pumped
                .iter()
                .filter_map(|id| state.shadows.get(id))
                .cloned()
                .collect()
        };

        let mut ran = 0;
        for shadow in pumped {
            if shadow.queue().state() != QueueState::Scheduled {
                continue;
            }
            match shadow.run_next_action() {
                CycleOutcome::Ran | CycleOutcome::Completed => ran += 1,
                CycleOutcome::Empty | CycleOutcome::Busy => {}
            }
        }
        ran
    }

    /// Tear down a pairing.
    ///
    /// Pending actions are drained first so none outlives the document.
    /// Client shutdown failures are logged and do not stop local cleanup. A
    /// shadow document with no host pairing is still disposed.
    pub async fn dispose(&self, shadow: &Arc<ShadowDocument>) {
        let drained = shadow.force_cycle_queue();
        if drained > 0 {
            log::debug!("Drained {drained} actions before disposing {}", shadow.id());
        }

        self.notify(RegistryEvent::DocumentDisposed(shadow.clone()));
        self.stop_queue_pump(shadow);

        if let Some(client) = shadow.take_client() {
            if let Err(e) = client.stop().await {
                log::warn!("Change client for {} did not stop cleanly: {e}", shadow.id());
            }
        }

        let host = {
            let mut state = self.lock();
            state.shadows.remove(&shadow.id());
            match state.pairs.remove_by_right(&shadow.id()) {
                Some(host_id) => state.hosts.remove(&host_id),
                None => None,
            }
        };

        match host {
            Some(host) => {
                let mut doc = lock_host(&host);
                for object_id in doc.objects(ObjectFilter::RESTRICTED) {
                    doc.unlock_object(object_id);
                    doc.show_object(object_id);
                }
                doc.clear_objects();
                log::info!("Disposed {} and released host document {}", shadow.id(), doc.id());
            }
            None => log::debug!("Disposing {} with no host pairing", shadow.id()),
        }

        shadow.dispose();
    }
}

impl std::fmt::Debug for DocumentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentRegistry")
            .field("user_name", &self.user_name)
            .field("documents", &self.len())
            .finish()
    }
}

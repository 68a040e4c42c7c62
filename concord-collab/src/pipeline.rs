//! Change conversion pipeline.
//!
//! Two ordered handler lists. Outbound, a host event is offered to each create
//! handler whose `can_convert` accepts it, in registration order, until one
//! produces changes. Inbound, a change goes to the first receive handler whose
//! `can_receive` accepts it. Dispatch is a linear first-match scan; there is
//! no priority or cost ordering beyond registration order.

use std::sync::Arc;

use concord_core::{Change, ChangeAction, Layer, LayerId, ObjectId};

use crate::error::SyncError;
use crate::handlers;
use crate::registry::DocumentRegistry;
use crate::shadow::ShadowDocument;

/// Host-native events the pipeline can turn into changes.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    ObjectAdded { object_id: ObjectId, undelete: bool },
    ObjectDeleted { object_id: ObjectId },
    LayerAdded { layer_id: LayerId },
    LayerModified { layer_id: LayerId, old: Layer },
}

/// Everything a create handler may consult.
pub struct CreateArgs<'a> {
    pub registry: &'a DocumentRegistry,
    pub doc: &'a Arc<ShadowDocument>,
    pub event: &'a HostEvent,
}

/// Converts a host event into changes.
pub trait ChangeCreateAction: Send + Sync {
    fn name(&self) -> &'static str;

    /// Flags carried by the changes this handler produces.
    fn action(&self) -> ChangeAction;

    fn can_convert(&self, args: &CreateArgs<'_>) -> bool;

    /// An empty result means "nothing to do" (e.g. the object is gone). Errors
    /// are reserved for broken invariants such as a missing host pairing.
    fn try_convert(&self, args: &CreateArgs<'_>) -> Result<Vec<Change>, SyncError>;
}

/// Applies a received change to the host.
pub trait ChangeReceiveAction: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_receive(&self, change: &Change) -> bool;

    /// Enqueue the host mutation on `doc`'s action queue; never mutates
    /// the host directly.
    fn on_receive(
        &self,
        registry: &DocumentRegistry,
        doc: &Arc<ShadowDocument>,
        change: Change,
    ) -> Result<(), SyncError>;
}

#[derive(Default)]
pub struct ChangePipeline {
    create: Vec<Box<dyn ChangeCreateAction>>,
    receive: Vec<Box<dyn ChangeReceiveAction>>,
}

impl ChangePipeline {
    /// Empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline with the geometry and layer handlers registered.
    pub fn with_defaults() -> Self {
        let mut pipeline = Self::new();
        pipeline.register_create(handlers::GeometryCreateAction);
        pipeline.register_create(handlers::GeometryRemoveAction);
        pipeline.register_create(handlers::LayerCreateAction);
        pipeline.register_create(handlers::LayerModifyAction);

        pipeline.register_receive(handlers::GeometryRemoveReceiveAction);
        pipeline.register_receive(handlers::GeometryUndeleteReceiveAction);
        pipeline.register_receive(handlers::GeometryAddReceiveAction);
        pipeline.register_receive(handlers::LayerUpdateReceiveAction);
        pipeline.register_receive(handlers::LayerCreateReceiveAction);
        pipeline
    }

    pub fn register_create(&mut self, handler: impl ChangeCreateAction + 'static) {
        self.create.push(Box::new(handler));
    }

    pub fn register_receive(&mut self, handler: impl ChangeReceiveAction + 'static) {
        self.receive.push(Box::new(handler));
    }

    pub fn create_handlers(&self) -> impl Iterator<Item = &dyn ChangeCreateAction> {
        self.create.iter().map(|h| h.as_ref())
    }

    pub fn receive_handlers(&self) -> impl Iterator<Item = &dyn ChangeReceiveAction> {
        self.receive.iter().map(|h| h.as_ref())
    }

    /// Convert a host event into changes.
    ///
    /// Produces nothing while `doc` is applying a received change.
    pub fn convert(
        &self,
        registry: &DocumentRegistry,
        doc: &Arc<ShadowDocument>,
        event: &HostEvent,
    ) -> Result<Vec<Change>, SyncError> {
        if doc.is_busy() {
            log::debug!("Ignoring {event:?} while {} is busy", doc.id());
            return Ok(Vec::new());
        }

        let args = CreateArgs { registry, doc, event };
        for handler in &self.create {
            if !handler.can_convert(&args) {
                continue;
            }
            let changes = handler.try_convert(&args)?;
            if !changes.is_empty() {
                return Ok(changes);
            }
            log::debug!("{} produced no changes for {event:?}", handler.name());
        }
        Ok(Vec::new())
    }

    /// Hand a received change to the first handler that accepts it.
    ///
    /// Returns false if no handler accepts the change.
    pub fn receive(
        &self,
        registry: &DocumentRegistry,
        doc: &Arc<ShadowDocument>,
        change: Change,
    ) -> Result<bool, SyncError> {
        match self.receive.iter().find(|h| h.can_receive(&change)) {
            Some(handler) => {
                log::debug!("{} accepted change {}", handler.name(), change.id);
                handler.on_receive(registry, doc, change)?;
                Ok(true)
            }
            None => {
                log::debug!("No handler for change {} ({:?})", change.id, change.action);
                Ok(false)
            }
        }
    }
}

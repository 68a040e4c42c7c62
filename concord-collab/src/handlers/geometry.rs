//! Geometry handlers.
//!
//! Local adds become `ADD | TEMPORARY` changes carrying the shape; an undo of
//! a delete becomes `ADD | UNDELETE` under the identity the object had before.
//! Remote temporary geometry is injected locked so it cannot be edited here.

use std::sync::Arc;

use concord_core::{Change, ChangeAction, ChangeKind, Geometry};

use crate::error::SyncError;
use crate::handlers::enqueue_apply;
use crate::pipeline::{ChangeCreateAction, ChangeReceiveAction, CreateArgs, HostEvent};
use crate::queue::IdleArgs;
use crate::registry::{lock_host, DocumentRegistry};
use crate::shadow::ShadowDocument;

pub struct GeometryCreateAction;

impl ChangeCreateAction for GeometryCreateAction {
    fn name(&self) -> &'static str {
        "geometry-create"
    }

    fn action(&self) -> ChangeAction {
        ChangeAction::ADD | ChangeAction::TEMPORARY
    }

    fn can_convert(&self, args: &CreateArgs<'_>) -> bool {
        matches!(args.event, HostEvent::ObjectAdded { .. })
    }

    fn try_convert(&self, args: &CreateArgs<'_>) -> Result<Vec<Change>, SyncError> {
        let HostEvent::ObjectAdded { object_id, undelete } = *args.event else {
            return Ok(Vec::new());
        };

        let host = args
            .registry
            .get_host(args.doc)
            .ok_or(SyncError::MissingPairing)?;
        let geometry = match lock_host(&host).find_object(object_id) {
            Some(object) => object.geometry.clone(),
            None => return Ok(Vec::new()),
        };

        let change_id = args.doc.realised().reconcile(object_id);
        let user = args.doc.user_name();

        let change = if undelete {
            Change::new(
                change_id,
                user,
                ChangeKind::Geometry,
                ChangeAction::ADD | ChangeAction::UNDELETE,
            )
        } else {
            Change::new(change_id, user, ChangeKind::Geometry, self.action())
                .with_payload(geometry.to_payload()?)
        };
        Ok(vec![change])
    }
}

pub struct GeometryRemoveAction;

impl ChangeCreateAction for GeometryRemoveAction {
    fn name(&self) -> &'static str {
        "geometry-remove"
    }

    fn action(&self) -> ChangeAction {
        ChangeAction::REMOVE
    }

    fn can_convert(&self, args: &CreateArgs<'_>) -> bool {
        matches!(args.event, HostEvent::ObjectDeleted { .. })
    }

    fn try_convert(&self, args: &CreateArgs<'_>) -> Result<Vec<Change>, SyncError> {
        let HostEvent::ObjectDeleted { object_id } = *args.event else {
            return Ok(Vec::new());
        };
        if args.registry.get_host(args.doc).is_none() {
            return Err(SyncError::MissingPairing);
        }

        // Objects never published have nothing to retract.
        let Some(change_id) = args.doc.realised().try_get_change_id(object_id) else {
            return Ok(Vec::new());
        };
        Ok(vec![Change::new(
            change_id,
            args.doc.user_name(),
            ChangeKind::Geometry,
            self.action(),
        )])
    }
}

fn is_geometry(change: &Change) -> bool {
    change.kind == ChangeKind::Geometry
}

pub struct GeometryRemoveReceiveAction;

impl ChangeReceiveAction for GeometryRemoveReceiveAction {
    fn name(&self) -> &'static str {
        "geometry-remove-receive"
    }

    fn can_receive(&self, change: &Change) -> bool {
        is_geometry(change) && change.has_flag(ChangeAction::REMOVE)
    }

    fn on_receive(
        &self,
        registry: &DocumentRegistry,
        doc: &Arc<ShadowDocument>,
        change: Change,
    ) -> Result<(), SyncError> {
        enqueue_apply(registry, doc, change, self.name(), remove_geometry)
    }
}

fn remove_geometry(doc: &ShadowDocument, args: &IdleArgs) -> Result<(), SyncError> {
    let Some(local_id) = doc.realised().try_get_local_id(args.change.id) else {
        log::debug!("Remove for unknown change {}", args.change.id);
        return Ok(());
    };
    lock_host(&args.host).delete_object(local_id);
    Ok(())
}

pub struct GeometryUndeleteReceiveAction;

impl ChangeReceiveAction for GeometryUndeleteReceiveAction {
    fn name(&self) -> &'static str {
        "geometry-undelete-receive"
    }

    fn can_receive(&self, change: &Change) -> bool {
        is_geometry(change) && change.has_flag(ChangeAction::UNDELETE)
    }

    fn on_receive(
        &self,
        registry: &DocumentRegistry,
        doc: &Arc<ShadowDocument>,
        change: Change,
    ) -> Result<(), SyncError> {
        enqueue_apply(registry, doc, change, self.name(), undelete_geometry)
    }
}

fn undelete_geometry(doc: &ShadowDocument, args: &IdleArgs) -> Result<(), SyncError> {
    let Some(local_id) = doc.realised().try_get_local_id(args.change.id) else {
        log::debug!("Undelete for unknown change {}", args.change.id);
        return Ok(());
    };
    if !lock_host(&args.host).undelete_object(local_id) {
        log::debug!("Object {local_id} for change {} cannot be restored", args.change.id);
    }
    Ok(())
}

pub struct GeometryAddReceiveAction;

impl ChangeReceiveAction for GeometryAddReceiveAction {
    fn name(&self) -> &'static str {
        "geometry-add-receive"
    }

    fn can_receive(&self, change: &Change) -> bool {
        is_geometry(change) && change.has_flag(ChangeAction::ADD)
    }

    fn on_receive(
        &self,
        registry: &DocumentRegistry,
        doc: &Arc<ShadowDocument>,
        change: Change,
    ) -> Result<(), SyncError> {
        // Decode before queueing so a malformed payload reaches the caller.
        match &change.payload {
            Some(bytes) => {
                Geometry::from_payload(bytes)?;
            }
            None => return Err(SyncError::MissingField("Payload".to_string())),
        }
        enqueue_apply(registry, doc, change, self.name(), add_geometry)
    }
}

fn add_geometry(doc: &ShadowDocument, args: &IdleArgs) -> Result<(), SyncError> {
    let change = &args.change;
    let geometry = Geometry::from_payload(change.payload.as_deref().unwrap_or_default())?;
    let mut host = lock_host(&args.host);

    // A change already realised here is a replay, even if its object has
    // since been removed. Only an undelete brings that object back.
    if let Some(local_id) = doc.realised().try_get_local_id(change.id) {
        log::debug!("Ignoring replayed add {} (object {local_id})", change.id);
        return Ok(());
    }

    let local_id = host.add_object(geometry);
    if change.has_flag(ChangeAction::TEMPORARY) {
        host.lock_object(local_id);
    }
    doc.realised().add_pair(change.id, local_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ChangePipeline;
    use concord_core::{HostDocument, MemoryDocument, Point};
    use std::sync::Mutex;
    use uuid::Uuid;

    fn setup() -> (DocumentRegistry, Arc<Mutex<MemoryDocument>>, Arc<ShadowDocument>) {
        let registry = DocumentRegistry::new("alice", 8);
        let memory = Arc::new(Mutex::new(MemoryDocument::new()));
        let doc = registry.register(memory.clone());
        (registry, memory, doc)
    }

    fn shape() -> Geometry {
        Geometry::Box {
            min: Point::new(0.0, 0.0, 0.0),
            max: Point::new(1.0, 1.0, 1.0),
        }
    }

    #[test]
    fn test_create_mints_and_pairs_id() {
        let (registry, memory, doc) = setup();
        let object_id = memory.lock().unwrap().add_object(shape());
        let pipeline = ChangePipeline::with_defaults();

        let changes = pipeline
            .convert(&registry, &doc, &HostEvent::ObjectAdded { object_id, undelete: false })
            .unwrap();

        assert_eq!(changes.len(), 1);
        let change = &changes[0];
        assert_eq!(change.action, ChangeAction::ADD | ChangeAction::TEMPORARY);
        assert_eq!(change.owner, "alice");
        assert_eq!(Geometry::from_payload(change.payload.as_ref().unwrap()).unwrap(), shape());
        assert_eq!(doc.realised().try_get_local_id(change.id), Some(object_id));
    }

    #[test]
    fn test_undelete_reuses_change_id() {
        let (registry, memory, doc) = setup();
        let object_id = memory.lock().unwrap().add_object(shape());
        let pipeline = ChangePipeline::with_defaults();

        let added = pipeline
            .convert(&registry, &doc, &HostEvent::ObjectAdded { object_id, undelete: false })
            .unwrap();
        memory.lock().unwrap().delete_object(object_id);
        let removed = pipeline
            .convert(&registry, &doc, &HostEvent::ObjectDeleted { object_id })
            .unwrap();
        memory.lock().unwrap().undelete_object(object_id);
        let restored = pipeline
            .convert(&registry, &doc, &HostEvent::ObjectAdded { object_id, undelete: true })
            .unwrap();

        assert_eq!(removed[0].id, added[0].id);
        assert_eq!(restored[0].id, added[0].id);
        assert_eq!(restored[0].action, ChangeAction::ADD | ChangeAction::UNDELETE);
        assert!(restored[0].payload.is_none());
    }

    #[test]
    fn test_stale_object_produces_nothing() {
        let (registry, _memory, doc) = setup();
        let pipeline = ChangePipeline::with_defaults();
        let event = HostEvent::ObjectAdded { object_id: Uuid::new_v4(), undelete: false };

        assert!(pipeline.convert(&registry, &doc, &event).unwrap().is_empty());
        assert!(doc.realised().is_empty());
    }

    #[test]
    fn test_remove_of_unpublished_object_produces_nothing() {
        let (registry, _memory, doc) = setup();
        let pipeline = ChangePipeline::with_defaults();
        let event = HostEvent::ObjectDeleted { object_id: Uuid::new_v4() };
        assert!(pipeline.convert(&registry, &doc, &event).unwrap().is_empty());
    }

    #[test]
    fn test_missing_pairing_is_an_error() {
        let registry = DocumentRegistry::new("alice", 8);
        let orphan = Arc::new(ShadowDocument::new(crate::shadow::User::new("alice")));
        let pipeline = ChangePipeline::with_defaults();
        let event = HostEvent::ObjectAdded { object_id: Uuid::new_v4(), undelete: false };

        let result = pipeline.convert(&registry, &orphan, &event);
        assert!(matches!(result, Err(SyncError::MissingPairing)));
    }

    #[test]
    fn test_receive_add_is_deferred_until_idle() {
        let (registry, memory, doc) = setup();
        let pipeline = ChangePipeline::with_defaults();
        let change = Change::new(
            Uuid::new_v4(),
            "bob",
            ChangeKind::Geometry,
            ChangeAction::ADD | ChangeAction::TEMPORARY,
        )
        .with_payload(shape().to_payload().unwrap());
        let change_id = change.id;

        assert!(pipeline.receive(&registry, &doc, change).unwrap());
        assert_eq!(memory.lock().unwrap().object_count(), 0);

        registry.on_idle();

        let local_id = doc.realised().try_get_local_id(change_id).unwrap();
        let memory = memory.lock().unwrap();
        let object = memory.find_object(local_id).unwrap();
        assert_eq!(object.geometry, shape());
        assert!(object.locked);
    }

    #[test]
    fn test_receive_add_replay_is_idempotent() {
        let (registry, memory, doc) = setup();
        let pipeline = ChangePipeline::with_defaults();
        let change = Change::new(Uuid::new_v4(), "bob", ChangeKind::Geometry, ChangeAction::ADD)
            .with_payload(shape().to_payload().unwrap());

        pipeline.receive(&registry, &doc, change.clone()).unwrap();
        pipeline.receive(&registry, &doc, change).unwrap();
        doc.force_cycle_queue();

        assert_eq!(memory.lock().unwrap().object_count(), 1);
    }

    #[test]
    fn test_replayed_add_after_remove_stays_removed() {
        let (registry, memory, doc) = setup();
        let pipeline = ChangePipeline::with_defaults();
        let id = Uuid::new_v4();
        let add = Change::new(id, "bob", ChangeKind::Geometry, ChangeAction::ADD)
            .with_payload(shape().to_payload().unwrap());
        let remove = Change::new(id, "bob", ChangeKind::Geometry, ChangeAction::REMOVE);

        pipeline.receive(&registry, &doc, add.clone()).unwrap();
        pipeline.receive(&registry, &doc, remove).unwrap();
        pipeline.receive(&registry, &doc, add).unwrap();
        doc.force_cycle_queue();

        let local_id = doc.realised().try_get_local_id(id).unwrap();
        let memory = memory.lock().unwrap();
        assert_eq!(memory.object_count(), 0);
        assert!(memory.find_object(local_id).is_none());
    }

    #[test]
    fn test_receive_malformed_geometry_is_rejected() {
        let (registry, _memory, doc) = setup();
        let pipeline = ChangePipeline::with_defaults();
        let change = Change::new(Uuid::new_v4(), "bob", ChangeKind::Geometry, ChangeAction::ADD)
            .with_payload(b"{".to_vec());

        let result = pipeline.receive(&registry, &doc, change);
        assert!(matches!(result, Err(SyncError::Payload(_))));
        assert!(doc.queue().is_empty());
    }

    #[test]
    fn test_receive_remove_then_undelete() {
        let (registry, memory, doc) = setup();
        let pipeline = ChangePipeline::with_defaults();
        let id = Uuid::new_v4();
        let add = Change::new(id, "bob", ChangeKind::Geometry, ChangeAction::ADD)
            .with_payload(shape().to_payload().unwrap());
        let remove = Change::new(id, "bob", ChangeKind::Geometry, ChangeAction::REMOVE);
        let undelete = Change::new(
            id,
            "bob",
            ChangeKind::Geometry,
            ChangeAction::ADD | ChangeAction::UNDELETE,
        );

        pipeline.receive(&registry, &doc, add).unwrap();
        doc.force_cycle_queue();
        let local_id = doc.realised().try_get_local_id(id).unwrap();

        pipeline.receive(&registry, &doc, remove).unwrap();
        doc.force_cycle_queue();
        assert!(memory.lock().unwrap().find_object(local_id).is_none());

        pipeline.receive(&registry, &doc, undelete).unwrap();
        doc.force_cycle_queue();
        assert!(memory.lock().unwrap().find_object(local_id).is_some());
        assert_eq!(doc.realised().try_get_local_id(id), Some(local_id));
    }
}

//! Layer handlers and the layer field table.
//!
//! Layer changes carry a [`PayloadPacket`] of field deltas. `FullPath` is
//! structural: it is always published, and a receiver whose copy of the layer
//! lives elsewhere relocates it before applying the remaining fields.

use std::sync::{Arc, OnceLock};

use concord_core::layer::leaf_segment;
use concord_core::{
    Argb, Change, ChangeAction, ChangeKind, HostDocument, Layer, LayerId, PayloadPacket,
};

use crate::diff::{relocate, Delta, DeltaKey, FieldRegistry, Hierarchy};
use crate::error::SyncError;
use crate::handlers::enqueue_apply;
use crate::pipeline::{ChangeCreateAction, ChangeReceiveAction, CreateArgs, HostEvent};
use crate::queue::IdleArgs;
use crate::registry::{lock_host, DocumentRegistry};
use crate::shadow::ShadowDocument;

pub const NAME: &str = "Name";
pub const FULL_PATH: &str = "FullPath";
pub const COLOR: &str = "Color";
pub const LINETYPE_INDEX: &str = "LinetypeIndex";
pub const PLOT_COLOR: &str = "PlotColor";
pub const PLOT_WEIGHT: &str = "PlotWeight";
pub const RENDER_MATERIAL: &str = "RenderMaterial";
pub const IS_LOCKED: &str = "IsLocked";
pub const IS_VISIBLE: &str = "IsVisible";

fn set_name(layer: &mut Layer, value: &str) {
    layer.name = if value.is_empty() {
        leaf_segment(&layer.full_path).unwrap_or_default().to_string()
    } else {
        value.to_string()
    };
}

fn set_color(layer: &mut Layer, value: &str) {
    if let Ok(v) = value.parse() {
        layer.color = Argb::from_signed(v);
    }
}

fn set_plot_color(layer: &mut Layer, value: &str) {
    if let Ok(v) = value.parse() {
        layer.plot_color = Argb::from_signed(v);
    }
}

fn set_linetype_index(layer: &mut Layer, value: &str) {
    if let Ok(v) = value.parse() {
        layer.linetype_index = v;
    }
}

fn set_plot_weight(layer: &mut Layer, value: &str) {
    if let Ok(v) = value.parse() {
        layer.plot_weight = v;
    }
}

/// Unparseable values read as unlocked.
fn set_locked(layer: &mut Layer, value: &str) {
    layer.is_locked = value.trim().eq_ignore_ascii_case("true");
}

/// Unparseable values read as visible.
fn set_visible(layer: &mut Layer, value: &str) {
    layer.is_visible = !value.trim().eq_ignore_ascii_case("false");
}

/// Observable layer fields in publication order.
pub fn layer_fields() -> &'static FieldRegistry<Layer> {
    static FIELDS: OnceLock<FieldRegistry<Layer>> = OnceLock::new();
    FIELDS.get_or_init(|| {
        FieldRegistry::<Layer>::new()
            .field(NAME, |l| l.name.clone(), set_name)
            .structural(FULL_PATH, |l| l.full_path.clone())
            .field(COLOR, |l| l.color.to_signed().to_string(), set_color)
            .field(LINETYPE_INDEX, |l| l.linetype_index.to_string(), set_linetype_index)
            .field(PLOT_COLOR, |l| l.plot_color.to_signed().to_string(), set_plot_color)
            .field(PLOT_WEIGHT, |l| l.plot_weight.to_string(), set_plot_weight)
            .read_only(RENDER_MATERIAL, |l| l.render_material.clone())
            .user_field(IS_LOCKED, |l| l.is_locked.to_string(), set_locked)
            .user_field(IS_VISIBLE, |l| l.is_visible.to_string(), set_visible)
    })
}

pub fn layer_difference(old: &Layer, new: &Layer, user: &str) -> Delta {
    layer_fields().compute_delta(old, new, user)
}

/// Delta that brings a default layer to `layer`.
pub fn layer_defaults(layer: &Layer, user: &str) -> Delta {
    layer_fields().compute_delta(&Layer::default(), layer, user)
}

/// Apply `delta` to `layer` as seen by `user`. Returns the number of fields set.
pub fn update_layer(layer: &mut Layer, delta: &Delta, user: &str) -> usize {
    layer_fields().apply_delta(layer, delta, user)
}

/// The host's layer table viewed as a path hierarchy.
pub struct LayerTree<'a>(pub &'a mut dyn HostDocument);

impl Hierarchy for LayerTree<'_> {
    type Id = LayerId;

    fn find_by_path(&self, path: &str) -> Option<LayerId> {
        self.0.find_layer_by_full_path(path)
    }

    fn create(&mut self, name: &str, parent: Option<LayerId>) -> Option<LayerId> {
        let mut layer = Layer::new(name);
        layer.parent_id = parent;
        self.0.add_layer(layer)
    }

    fn place(&mut self, id: LayerId, name: &str, parent: Option<LayerId>) -> bool {
        let Some(mut layer) = self.0.find_layer(id).cloned() else {
            return false;
        };
        layer.name = name.to_string();
        layer.parent_id = parent;
        self.0.modify_layer(layer)
    }
}

fn layer_change(
    id: uuid::Uuid,
    owner: &str,
    action: ChangeAction,
    delta: &Delta,
) -> Result<Change, SyncError> {
    let payload = PayloadPacket::new(delta.to_updates()).encode()?;
    Ok(Change::new(id, owner, ChangeKind::Layer, action).with_payload(payload))
}

pub struct LayerCreateAction;

impl ChangeCreateAction for LayerCreateAction {
    fn name(&self) -> &'static str {
        "layer-create"
    }

    fn action(&self) -> ChangeAction {
        ChangeAction::ADD
    }

    fn can_convert(&self, args: &CreateArgs<'_>) -> bool {
        matches!(args.event, HostEvent::LayerAdded { .. })
    }

    fn try_convert(&self, args: &CreateArgs<'_>) -> Result<Vec<Change>, SyncError> {
        let HostEvent::LayerAdded { layer_id } = *args.event else {
            return Ok(Vec::new());
        };
        let host = args
            .registry
            .get_host(args.doc)
            .ok_or(SyncError::MissingPairing)?;
        let Some(layer) = lock_host(&host).find_layer(layer_id).cloned() else {
            return Ok(Vec::new());
        };

        let user = args.doc.user_name();
        let delta = layer_defaults(&layer, user);
        let change_id = args.doc.realised().reconcile(layer_id);
        Ok(vec![layer_change(change_id, user, self.action(), &delta)?])
    }
}

pub struct LayerModifyAction;

impl ChangeCreateAction for LayerModifyAction {
    fn name(&self) -> &'static str {
        "layer-modify"
    }

    fn action(&self) -> ChangeAction {
        ChangeAction::UPDATE
    }

    fn can_convert(&self, args: &CreateArgs<'_>) -> bool {
        matches!(args.event, HostEvent::LayerModified { .. })
    }

    fn try_convert(&self, args: &CreateArgs<'_>) -> Result<Vec<Change>, SyncError> {
        let HostEvent::LayerModified { layer_id, old } = args.event else {
            return Ok(Vec::new());
        };
        let host = args
            .registry
            .get_host(args.doc)
            .ok_or(SyncError::MissingPairing)?;
        let Some(new) = lock_host(&host).find_layer(*layer_id).cloned() else {
            return Ok(Vec::new());
        };

        let user = args.doc.user_name();
        let delta = layer_difference(old, &new, user);
        // FullPath is always present; anything else means a real edit.
        if delta.fields() == [FULL_PATH] && old.full_path == new.full_path {
            return Ok(Vec::new());
        }

        let change_id = args.doc.realised().reconcile(*layer_id);
        Ok(vec![layer_change(change_id, user, self.action(), &delta)?])
    }
}

fn is_layer(change: &Change) -> bool {
    change.kind == ChangeKind::Layer
}

/// Decode the change's delta, reporting malformed packets to the caller.
fn decode_delta(change: &Change) -> Result<Delta, SyncError> {
    let packet = change.payload_packet()?;
    Ok(Delta::from_updates(&packet.updates))
}

pub struct LayerUpdateReceiveAction;

impl ChangeReceiveAction for LayerUpdateReceiveAction {
    fn name(&self) -> &'static str {
        "layer-update-receive"
    }

    fn can_receive(&self, change: &Change) -> bool {
        is_layer(change) && change.has_flag(ChangeAction::UPDATE)
    }

    fn on_receive(
        &self,
        registry: &DocumentRegistry,
        doc: &Arc<ShadowDocument>,
        change: Change,
    ) -> Result<(), SyncError> {
        decode_delta(&change)?;
        enqueue_apply(registry, doc, change, self.name(), apply_layer_update)
    }
}

fn apply_layer_update(doc: &ShadowDocument, args: &IdleArgs) -> Result<(), SyncError> {
    let change = &args.change;
    let delta = decode_delta(change)?;
    let Some(new_path) = delta.get(&DeltaKey::new_value(FULL_PATH)) else {
        log::debug!("Layer update {} has no FullPath", change.id);
        return Ok(());
    };
    let old_path = delta.get(&DeltaKey::old_value(FULL_PATH)).unwrap_or_default();

    let mut host = lock_host(&args.host);
    let mapped = doc
        .realised()
        .try_get_local_id(change.id)
        .filter(|id| host.find_layer(*id).is_some());
    let Some(layer_id) = mapped.or_else(|| host.find_layer_by_full_path(old_path)) else {
        log::debug!("Layer update {} matches no layer at {old_path}", change.id);
        return Ok(());
    };

    let moved = host
        .find_layer(layer_id)
        .is_some_and(|layer| layer.full_path != new_path);
    if moved {
        let placed = relocate(&mut LayerTree(&mut *host), new_path, Some(layer_id));
        if placed != Some(layer_id) {
            log::warn!("Could not move layer {layer_id} to {new_path}");
            return Ok(());
        }
    }

    apply_fields(&mut *host, doc, change, layer_id, &delta);
    Ok(())
}

pub struct LayerCreateReceiveAction;

impl ChangeReceiveAction for LayerCreateReceiveAction {
    fn name(&self) -> &'static str {
        "layer-create-receive"
    }

    fn can_receive(&self, change: &Change) -> bool {
        is_layer(change) && change.has_flag(ChangeAction::ADD)
    }

    fn on_receive(
        &self,
        registry: &DocumentRegistry,
        doc: &Arc<ShadowDocument>,
        change: Change,
    ) -> Result<(), SyncError> {
        decode_delta(&change)?;
        enqueue_apply(registry, doc, change, self.name(), apply_layer_create)
    }
}

fn apply_layer_create(doc: &ShadowDocument, args: &IdleArgs) -> Result<(), SyncError> {
    let change = &args.change;
    let delta = decode_delta(change)?;
    let Some(path) = delta.get(&DeltaKey::new_value(FULL_PATH)) else {
        log::debug!("Layer create {} has no FullPath", change.id);
        return Ok(());
    };

    let mut host = lock_host(&args.host);
    let mapped = doc
        .realised()
        .try_get_local_id(change.id)
        .filter(|id| host.find_layer(*id).is_some());
    let existing = mapped.or_else(|| host.find_layer_by_full_path(path));
    let Some(layer_id) = existing.or_else(|| relocate(&mut LayerTree(&mut *host), path, None))
    else {
        log::warn!("Could not create layer {path} for change {}", change.id);
        return Ok(());
    };

    apply_fields(&mut *host, doc, change, layer_id, &delta);
    Ok(())
}

fn apply_fields(
    host: &mut dyn HostDocument,
    doc: &ShadowDocument,
    change: &Change,
    layer_id: LayerId,
    delta: &Delta,
) {
    let Some(mut layer) = host.find_layer(layer_id).cloned() else {
        return;
    };
    update_layer(&mut layer, delta, doc.user_name());
    if !host.modify_layer(layer) {
        log::warn!("Host rejected layer {layer_id} for change {}", change.id);
    }
    doc.realised().add_pair(change.id, layer_id);
}

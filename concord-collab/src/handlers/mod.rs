//! Built-in conversion handlers for geometry and layers.

use std::sync::Arc;

use concord_core::Change;

use crate::error::SyncError;
use crate::queue::{IdleAction, IdleArgs};
use crate::registry::DocumentRegistry;
use crate::shadow::ShadowDocument;

pub mod geometry;
pub mod layer;

pub use geometry::{
    GeometryAddReceiveAction, GeometryCreateAction, GeometryRemoveAction,
    GeometryRemoveReceiveAction, GeometryUndeleteReceiveAction,
};
pub use layer::{
    LayerCreateAction, LayerCreateReceiveAction, LayerModifyAction, LayerUpdateReceiveAction,
};

/// Queue `apply` to run against the host on the next idle cycle.
///
/// The shadow document is marked busy while `apply` runs, so edits it makes
/// to the host are not captured as new local changes.
pub(crate) fn enqueue_apply(
    registry: &DocumentRegistry,
    doc: &Arc<ShadowDocument>,
    change: Change,
    name: &'static str,
    apply: fn(&ShadowDocument, &IdleArgs) -> Result<(), SyncError>,
) -> Result<(), SyncError> {
    if doc.is_disposed() {
        return Err(SyncError::Disposed(doc.id()));
    }
    let host = registry.get_host(doc).ok_or(SyncError::MissingPairing)?;
    let args = IdleArgs { host, change };
    doc.queue().add_action(IdleAction::new(name, move |doc| {
        let _busy = doc.busy_guard();
        apply(doc, &args)
    }));
    Ok(())
}

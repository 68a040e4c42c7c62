//! Contract between the sync engine and the CAD host that owns the live
//! document. The engine only calls these operations; hosts implement them.

use serde::{Deserialize, Serialize};

use crate::{DocumentId, Geometry, Layer, LayerId, ObjectId};

/// A scene object as the host reports it.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct SceneObject {
    pub id: ObjectId,
    pub geometry: Geometry,
    pub layer: Option<LayerId>,
    pub visible: bool,
    pub locked: bool,
}

impl SceneObject {
    pub fn new(id: ObjectId, geometry: Geometry) -> Self {
        Self {
            id,
            geometry,
            layer: None,
            visible: true,
            locked: false,
        }
    }

    /// Visible and unlocked.
    pub fn is_active(&self) -> bool {
        self.visible && !self.locked
    }
}

/// Selects objects by state when enumerating a document.
///
/// An object is included if any of its states is selected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectFilter {
    pub active: bool,
    pub hidden: bool,
    pub locked: bool,
}

impl ObjectFilter {
    pub const ALL: ObjectFilter = ObjectFilter {
        active: true,
        hidden: true,
        locked: true,
    };

    /// Only objects that are hidden or locked.
    pub const RESTRICTED: ObjectFilter = ObjectFilter {
        active: false,
        hidden: true,
        locked: true,
    };

    pub fn matches(&self, object: &SceneObject) -> bool {
        (self.active && object.is_active())
            || (self.hidden && !object.visible)
            || (self.locked && object.locked)
    }
}

impl Default for ObjectFilter {
    fn default() -> Self {
        Self::ALL
    }
}

/// The live native document owned by the host application.
///
/// Mutating calls are not safe for concurrent or re-entrant use; the engine
/// makes them only from queued actions.
pub trait HostDocument: Send {
    fn id(&self) -> DocumentId;

    fn find_object(&self, id: ObjectId) -> Option<&SceneObject>;
    fn objects(&self, filter: ObjectFilter) -> Vec<ObjectId>;
    fn add_object(&mut self, geometry: Geometry) -> ObjectId;
    fn delete_object(&mut self, id: ObjectId) -> bool;
    /// Restore a previously deleted object under its old identifier.
    fn undelete_object(&mut self, id: ObjectId) -> bool;
    fn show_object(&mut self, id: ObjectId) -> bool;
    fn hide_object(&mut self, id: ObjectId) -> bool;
    fn lock_object(&mut self, id: ObjectId) -> bool;
    fn unlock_object(&mut self, id: ObjectId) -> bool;
    fn clear_objects(&mut self);

    fn find_layer(&self, id: LayerId) -> Option<&Layer>;
    fn find_layer_by_full_path(&self, path: &str) -> Option<LayerId>;
    /// Insert a layer; `None` if the parent is unknown or the path is taken.
    fn add_layer(&mut self, layer: Layer) -> Option<LayerId>;
    /// Replace the stored layer with the same id.
    fn modify_layer(&mut self, layer: Layer) -> bool;

    fn redraw(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Point;
    use uuid::Uuid;

    fn object(visible: bool, locked: bool) -> SceneObject {
        let mut obj = SceneObject::new(Uuid::new_v4(), Geometry::Point(Point::default()));
        obj.visible = visible;
        obj.locked = locked;
        obj
    }

    #[test]
    fn test_restricted_filter() {
        let filter = ObjectFilter::RESTRICTED;
        assert!(!filter.matches(&object(true, false)));
        assert!(filter.matches(&object(false, false)));
        assert!(filter.matches(&object(true, true)));
        assert!(filter.matches(&object(false, true)));
    }

    #[test]
    fn test_all_filter() {
        let filter = ObjectFilter::default();
        assert!(filter.matches(&object(true, false)));
        assert!(filter.matches(&object(false, true)));
    }
}

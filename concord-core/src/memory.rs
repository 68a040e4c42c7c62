//! In-memory host document.
//!
//! Stands in for a CAD application's native document in headless sessions and
//! tests. Layers live in an indexed table; full paths are recomputed whenever a
//! layer is renamed or re-parented.

use std::collections::HashMap;

use uuid::Uuid;

use crate::host::{HostDocument, ObjectFilter, SceneObject};
use crate::layer::{Layer, PATH_SEPARATOR};
use crate::{DocumentId, Geometry, LayerId, ObjectId};

#[derive(Debug, Clone)]
pub struct MemoryDocument {
    id: DocumentId,
    objects: HashMap<ObjectId, SceneObject>,
    deleted: HashMap<ObjectId, SceneObject>,
    layers: Vec<Layer>,
    layer_index: HashMap<LayerId, usize>,
    redraws: u64,
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(id: DocumentId) -> Self {
        Self {
            id,
            objects: HashMap::new(),
            deleted: HashMap::new(),
            layers: Vec::new(),
            layer_index: HashMap::new(),
            redraws: 0,
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Number of redraws requested since creation.
    pub fn redraw_count(&self) -> u64 {
        self.redraws
    }

    fn path_of(&self, parent: Option<LayerId>, name: &str) -> String {
        let mut segments = vec![name.to_string()];
        let mut cursor = parent;
        let mut hops = 0;
        while let Some(parent_id) = cursor {
            // A malformed parent chain must not loop forever.
            if hops > self.layers.len() {
                break;
            }
            hops += 1;
            match self.layer_index.get(&parent_id) {
                Some(&i) => {
                    segments.push(self.layers[i].name.clone());
                    cursor = self.layers[i].parent_id;
                }
                None => break,
            }
        }
        segments.reverse();
        segments.join(PATH_SEPARATOR)
    }

    fn is_ancestor_or_self(&self, candidate: LayerId, of: Option<LayerId>) -> bool {
        let mut cursor = of;
        let mut hops = 0;
        while let Some(id) = cursor {
            if id == candidate {
                return true;
            }
            if hops > self.layers.len() {
                return true;
            }
            hops += 1;
            cursor = self
                .layer_index
                .get(&id)
                .and_then(|&i| self.layers[i].parent_id);
        }
        false
    }

    fn path_taken(&self, path: &str, except: Option<LayerId>) -> bool {
        self.layers
            .iter()
            .any(|l| l.full_path == path && Some(l.id) != except)
    }

    fn refresh_paths(&mut self) {
        let paths: Vec<String> = self
            .layers
            .iter()
            .map(|l| self.path_of(l.parent_id, &l.name))
            .collect();
        for (layer, path) in self.layers.iter_mut().zip(paths) {
            layer.full_path = path;
        }
    }

    fn set_object_flag(&mut self, id: ObjectId, apply: impl FnOnce(&mut SceneObject)) -> bool {
        match self.objects.get_mut(&id) {
            Some(object) => {
                apply(object);
                true
            }
            None => false,
        }
    }
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl HostDocument for MemoryDocument {
    fn id(&self) -> DocumentId {
        self.id
    }

    fn find_object(&self, id: ObjectId) -> Option<&SceneObject> {
        self.objects.get(&id)
    }

    fn objects(&self, filter: ObjectFilter) -> Vec<ObjectId> {
        self.objects
            .values()
            .filter(|o| filter.matches(o))
            .map(|o| o.id)
            .collect()
    }

    fn add_object(&mut self, geometry: Geometry) -> ObjectId {
        let id = Uuid::new_v4();
        self.objects.insert(id, SceneObject::new(id, geometry));
        id
    }

    fn delete_object(&mut self, id: ObjectId) -> bool {
        match self.objects.remove(&id) {
            Some(object) => {
                self.deleted.insert(id, object);
                true
            }
            None => false,
        }
    }

    fn undelete_object(&mut self, id: ObjectId) -> bool {
        match self.deleted.remove(&id) {
            Some(object) => {
                self.objects.insert(id, object);
                true
            }
            None => false,
        }
    }

    fn show_object(&mut self, id: ObjectId) -> bool {
        self.set_object_flag(id, |o| o.visible = true)
    }

    fn hide_object(&mut self, id: ObjectId) -> bool {
        self.set_object_flag(id, |o| o.visible = false)
    }

    fn lock_object(&mut self, id: ObjectId) -> bool {
        self.set_object_flag(id, |o| o.locked = true)
    }

    fn unlock_object(&mut self, id: ObjectId) -> bool {
        self.set_object_flag(id, |o| o.locked = false)
    }

    fn clear_objects(&mut self) {
        self.objects.clear();
        self.deleted.clear();
    }

    fn find_layer(&self, id: LayerId) -> Option<&Layer> {
        self.layer_index.get(&id).map(|&i| &self.layers[i])
    }

    fn find_layer_by_full_path(&self, path: &str) -> Option<LayerId> {
        if path.is_empty() {
            return None;
        }
        self.layers.iter().find(|l| l.full_path == path).map(|l| l.id)
    }

    fn add_layer(&mut self, mut layer: Layer) -> Option<LayerId> {
        if layer.id.is_nil() {
            layer.id = Uuid::new_v4();
        }
        if layer.name.is_empty() || self.layer_index.contains_key(&layer.id) {
            return None;
        }
        if let Some(parent) = layer.parent_id {
            if !self.layer_index.contains_key(&parent) {
                return None;
            }
        }

        let path = self.path_of(layer.parent_id, &layer.name);
        if self.path_taken(&path, None) {
            log::debug!("Layer path {path} already exists");
            return None;
        }

        let index = self.layers.len();
        let id = layer.id;
        layer.index = Some(index);
        layer.full_path = path;
        self.layers.push(layer);
        self.layer_index.insert(id, index);
        Some(id)
    }

    fn modify_layer(&mut self, mut layer: Layer) -> bool {
        let Some(&index) = self.layer_index.get(&layer.id) else {
            return false;
        };
        if layer.name.is_empty() {
            return false;
        }
        if let Some(parent) = layer.parent_id {
            if !self.layer_index.contains_key(&parent)
                || self.is_ancestor_or_self(layer.id, Some(parent))
            {
                return false;
            }
        }

        let path = self.path_of(layer.parent_id, &layer.name);
        if self.path_taken(&path, Some(layer.id)) {
            return false;
        }

        layer.index = Some(index);
        self.layers[index] = layer;
        self.refresh_paths();
        true
    }

    fn redraw(&mut self) {
        self.redraws += 1;
    }
}

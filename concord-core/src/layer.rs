use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::LayerId;

/// Separator between segments of a layer's full path.
pub const PATH_SEPARATOR: &str = "/";

/// Packed 0xAARRGGBB colour.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
pub struct Argb(pub u32);

impl Argb {
    pub const BLACK: Argb = Argb(0xFF00_0000);

    pub fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Argb(0xFF00_0000 | ((r as u32) << 16) | ((g as u32) << 8) | (b as u32))
    }

    /// Signed decimal form used in layer deltas.
    pub fn to_signed(self) -> i32 {
        self.0 as i32
    }

    pub fn from_signed(value: i32) -> Self {
        Argb(value as u32)
    }
}

impl Default for Argb {
    fn default() -> Self {
        Self::BLACK
    }
}

/// A layer as observed on a host document.
///
/// `index` is `Some` once the layer lives in a document; `full_path` is kept
/// current by the document that owns it.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Layer {
    pub id: LayerId,
    pub index: Option<usize>,
    pub name: String,
    pub parent_id: Option<LayerId>,
    pub full_path: String,
    pub color: Argb,
    pub linetype_index: i32,
    pub plot_color: Argb,
    pub plot_weight: f64,
    pub render_material: String,
    pub is_locked: bool,
    pub is_visible: bool,
}

impl Layer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// Last segment of `full_path`, if any.
    pub fn leaf_name(&self) -> Option<&str> {
        leaf_segment(&self.full_path)
    }
}

impl Default for Layer {
    fn default() -> Self {
        Self {
            id: Uuid::nil(),
            index: None,
            name: String::new(),
            parent_id: None,
            full_path: String::new(),
            color: Argb::BLACK,
            linetype_index: -1,
            plot_color: Argb::BLACK,
            plot_weight: 0.0,
            render_material: String::new(),
            is_locked: false,
            is_visible: true,
        }
    }
}

/// Split a full path into its non-empty segments.
pub fn path_segments(path: &str) -> Vec<&str> {
    path.split(PATH_SEPARATOR).filter(|s| !s.is_empty()).collect()
}

pub fn leaf_segment(path: &str) -> Option<&str> {
    path.split(PATH_SEPARATOR).filter(|s| !s.is_empty()).last()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layer_has_no_index() {
        let layer = Layer::default();
        assert!(!layer.has_index());
        assert!(layer.is_visible);
        assert!(!layer.is_locked);
        assert_eq!(layer.linetype_index, -1);
    }

    #[test]
    fn test_argb_signed_roundtrip() {
        let red = Argb::from_rgb(255, 0, 0);
        assert_eq!(red.0, 0xFFFF_0000);
        assert!(red.to_signed() < 0);
        assert_eq!(Argb::from_signed(red.to_signed()), red);
    }

    #[test]
    fn test_path_segments_skip_empty() {
        assert_eq!(path_segments("B/A"), vec!["B", "A"]);
        assert_eq!(path_segments("/B//A/"), vec!["B", "A"]);
        assert!(path_segments("").is_empty());
        assert_eq!(leaf_segment("B/A"), Some("A"));
        assert_eq!(leaf_segment(""), None);
    }
}

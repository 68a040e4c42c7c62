//! # concord-core: shared scene model for Concord sessions
//!
//! Types every participant agrees on:
//!
//! - [`change`]: the serializable `Change` record and its action flags
//! - [`layer`]: layer state observed and mutated by the sync engine
//! - [`host`]: the `HostDocument` contract a CAD host implements
//! - [`memory`]: an in-memory `HostDocument` for headless sessions and tests

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod change;
pub mod host;
pub mod layer;
pub mod memory;

pub use change::{Change, ChangeAction, ChangeKind, PayloadError, PayloadPacket};
pub use host::{HostDocument, ObjectFilter, SceneObject};
pub use layer::{Argb, Layer, PATH_SEPARATOR};
pub use memory::MemoryDocument;

/// Identifier of a host document.
pub type DocumentId = Uuid;
/// Host-native identifier of a scene object.
pub type ObjectId = Uuid;
/// Host-native identifier of a layer.
pub type LayerId = Uuid;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Shape carried by a geometry change.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub enum Geometry {
    Point(Point),
    Line { from: Point, to: Point },
    Polyline(Vec<Point>),
    Box { min: Point, max: Point },
}

impl Geometry {
    /// Encode as a change payload.
    pub fn to_payload(&self) -> Result<Vec<u8>, PayloadError> {
        serde_json::to_vec(self).map_err(PayloadError::from)
    }

    /// Decode from a change payload.
    pub fn from_payload(bytes: &[u8]) -> Result<Self, PayloadError> {
        serde_json::from_slice(bytes).map_err(PayloadError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_payload() {
        let line = Geometry::Line {
            from: Point::new(0.0, 0.0, 0.0),
            to: Point::new(10.0, 5.0, 0.0),
        };
        let bytes = line.to_payload().unwrap();
        assert_eq!(Geometry::from_payload(&bytes).unwrap(), line);
    }

    #[test]
    fn test_geometry_payload_rejects_garbage() {
        assert!(Geometry::from_payload(b"not json").is_err());
    }
}

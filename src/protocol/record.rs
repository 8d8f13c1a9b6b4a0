//! Wire record definitions for the binary geometry stream

use serde::{Deserialize, Serialize};

use crate::core::types::{DMat4, GeometryId, ObjectId, RevisionId, Rgba};
use crate::math::Aabb;

/// Three-byte stream magic
pub const MAGIC: [u8; 3] = *b"BGS";

/// Protocol version this client decodes. Any other version is fatal.
pub const PROTOCOL_VERSION: u8 = 16;

/// Padding boundary used by the producer after headers and arrays
pub const ALIGNMENT: usize = 8;

/// Record type tag preceding every record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordTag {
    Start = 0,
    Geometry = 1,
    Object = 5,
    End = 6,
}

impl RecordTag {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(RecordTag::Start),
            1 => Some(RecordTag::Geometry),
            5 => Some(RecordTag::Object),
            6 => Some(RecordTag::End),
            _ => None,
        }
    }
}

/// Encoding options agreed with the backend through the serializer reference
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WireOptions {
    /// Positions arrive as i16 triples and normals as i8 triples
    pub quantized: bool,
    /// Indices arrive as i16 instead of i32
    pub short_indices: bool,
}

/// Stream header
#[derive(Clone, Debug, PartialEq)]
pub struct StartRecord {
    pub version: u8,
    /// Multiplier the server applied to model units
    pub unit_scale: f32,
    pub bounds: Aabb,
}

/// Vertex positions as sent on the wire, three components per vertex
#[derive(Clone, Debug, PartialEq)]
pub enum Positions {
    Float(Vec<f32>),
    /// Quantized in the owning revision's frame
    Quantized(Vec<i16>),
}

impl Positions {
    /// Number of scalar components
    pub fn len(&self) -> usize {
        match self {
            Positions::Float(v) => v.len(),
            Positions::Quantized(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn vertex_count(&self) -> usize {
        self.len() / 3
    }
}

/// Vertex normals as sent on the wire, three components per vertex
#[derive(Clone, Debug, PartialEq)]
pub enum Normals {
    Float(Vec<f32>),
    Quantized(Vec<i8>),
}

impl Normals {
    pub fn len(&self) -> usize {
        match self {
            Normals::Float(v) => v.len(),
            Normals::Quantized(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decoded geometry record
#[derive(Clone, Debug, PartialEq)]
pub struct GeometryPayload {
    /// Number of objects the producer says reference this geometry
    pub reuse_count: u32,
    pub type_name: String,
    pub owner_revision_id: RevisionId,
    pub has_transparency: bool,
    pub geometry_id: GeometryId,
    pub indices: Vec<u32>,
    /// Explicit RGBA sent with the geometry
    pub color: Option<Rgba>,
    pub positions: Positions,
    pub normals: Normals,
    /// Optional per-vertex RGBA, four components per vertex
    pub colors: Option<Vec<f32>>,
}

impl GeometryPayload {
    pub fn vertex_count(&self) -> usize {
        self.positions.vertex_count()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Decoded object record
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectData {
    pub oid: ObjectId,
    pub type_name: String,
    pub owner_revision_id: RevisionId,
    pub geometry_info_id: u64,
    pub has_transparency: bool,
    pub bounds: Aabb,
    /// Column-major object-to-model transform, already unit-scale corrected
    /// by the decoder
    pub matrix: DMat4,
    /// Id of the geometry record this object draws
    pub geometry_data_id: GeometryId,
}

/// One decoded record
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    Start(StartRecord),
    Geometry(GeometryPayload),
    Object(ObjectData),
    End,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_mapping() {
        assert_eq!(RecordTag::from_u8(0), Some(RecordTag::Start));
        assert_eq!(RecordTag::from_u8(1), Some(RecordTag::Geometry));
        assert_eq!(RecordTag::from_u8(5), Some(RecordTag::Object));
        assert_eq!(RecordTag::from_u8(6), Some(RecordTag::End));
        assert_eq!(RecordTag::from_u8(2), None);
        assert_eq!(RecordTag::Object as u8, 5);
    }

    #[test]
    fn test_counts() {
        let payload = GeometryPayload {
            reuse_count: 1,
            type_name: "IfcWall".into(),
            owner_revision_id: 1,
            has_transparency: false,
            geometry_id: 2,
            indices: vec![0, 1, 2, 2, 1, 3],
            color: None,
            positions: Positions::Quantized(vec![0; 12]),
            normals: Normals::Quantized(vec![0; 12]),
            colors: None,
        };
        assert_eq!(payload.vertex_count(), 4);
        assert_eq!(payload.triangle_count(), 2);
    }
}

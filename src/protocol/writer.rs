//! Stream encoder producing byte-exact chunks for the decoder
//!
//! Used to build recorded streams and synthetic test input. Padding is
//! inserted at the same points the decoder aligns, relative to the start of
//! the chunk being written.

use crate::core::types::{DMat4, DVec3, GeometryId, ObjectId, RevisionId};
use crate::math::Aabb;
use super::record::{
    GeometryPayload, Normals, ObjectData, Positions, RecordTag, WireOptions, ALIGNMENT, MAGIC,
    PROTOCOL_VERSION,
};

/// Builds one chunk of records
#[derive(Debug, Default)]
pub struct StreamWriter {
    buf: Vec<u8>,
    options: WireOptions,
}

impl StreamWriter {
    pub fn new(options: WireOptions) -> Self {
        Self { buf: Vec::new(), options }
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the finished chunk, leaving the writer empty for the next one
    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    fn pad(&mut self) {
        while self.buf.len() % ALIGNMENT != 0 {
            self.buf.push(0);
        }
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&(v as u32).to_le_bytes());
        self.buf.extend_from_slice(&((v >> 32) as u32).to_le_bytes());
    }

    fn str(&mut self, s: &str) {
        self.buf.extend_from_slice(&(s.len() as u16).to_le_bytes());
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn bounds(&mut self, b: &Aabb) {
        for v in [b.min.x, b.min.y, b.min.z, b.max.x, b.max.y, b.max.z] {
            self.f64(v);
        }
    }

    /// Write a start record with the current protocol version
    pub fn start(&mut self, unit_scale: f32, bounds: &Aabb) -> &mut Self {
        self.start_raw(MAGIC, PROTOCOL_VERSION, unit_scale, bounds)
    }

    /// Write a start record with explicit magic and version
    pub fn start_raw(&mut self, magic: [u8; 3], version: u8, unit_scale: f32, bounds: &Aabb) -> &mut Self {
        self.u8(RecordTag::Start as u8);
        self.buf.extend_from_slice(&magic);
        self.u8(version);
        self.f32(unit_scale);
        self.pad();
        self.bounds(bounds);
        self
    }

    /// Write a geometry record
    pub fn geometry(&mut self, g: &GeometryPayload) -> &mut Self {
        self.u8(RecordTag::Geometry as u8);
        self.i32(g.reuse_count as i32);
        self.str(&g.type_name);
        self.pad();
        self.u64(g.owner_revision_id);
        self.u64(g.has_transparency as u64);
        self.u64(g.geometry_id);

        self.i32(g.indices.len() as i32);
        if self.options.short_indices {
            for &i in &g.indices {
                self.buf.extend_from_slice(&(i as u16).to_le_bytes());
            }
        } else {
            for &i in &g.indices {
                self.i32(i as i32);
            }
        }

        match g.color {
            Some(c) => {
                self.i32(1);
                for v in c {
                    self.f32(v);
                }
            }
            None => self.i32(0),
        }

        self.i32(g.positions.len() as i32);
        match &g.positions {
            Positions::Float(p) => p.iter().for_each(|&v| self.f32(v)),
            Positions::Quantized(p) => p
                .iter()
                .for_each(|&v| self.buf.extend_from_slice(&v.to_le_bytes())),
        }
        self.pad();

        self.i32(g.normals.len() as i32);
        match &g.normals {
            Normals::Float(n) => n.iter().for_each(|&v| self.f32(v)),
            Normals::Quantized(n) => n.iter().for_each(|&v| self.buf.push(v as u8)),
        }
        self.pad();

        let colors = g.colors.as_deref().unwrap_or(&[]);
        self.i32(colors.len() as i32);
        colors.iter().for_each(|&v| self.f32(v));
        self
    }

    /// Write an object record. The matrix is written as given (uncorrected).
    pub fn object(&mut self, o: &ObjectData) -> &mut Self {
        self.u8(RecordTag::Object as u8);
        self.u64(o.oid);
        self.str(&o.type_name);
        self.pad();
        self.u64(o.owner_revision_id);
        self.u64(o.geometry_info_id);
        self.u64(o.has_transparency as u64);
        self.bounds(&o.bounds);
        for v in o.matrix.to_cols_array() {
            self.f64(v);
        }
        self.u64(o.geometry_data_id);
        self
    }

    /// Write an end record
    pub fn end(&mut self) -> &mut Self {
        self.u8(RecordTag::End as u8);
        self
    }

    /// Write a bare tag byte, e.g. a reserved record type
    pub fn raw_tag(&mut self, tag: u8) -> &mut Self {
        self.u8(tag);
        self
    }
}

/// Convenience builder for small test and demo geometries: a unit quad in
/// the XY plane as two triangles.
pub fn quad_geometry(
    geometry_id: GeometryId,
    revision: RevisionId,
    type_name: &str,
    reuse_count: u32,
    quantized: bool,
) -> GeometryPayload {
    let (positions, normals) = if quantized {
        (
            Positions::Quantized(vec![0, 0, 0, 100, 0, 0, 0, 100, 0, 100, 100, 0]),
            Normals::Quantized(vec![0, 0, 127, 0, 0, 127, 0, 0, 127, 0, 0, 127]),
        )
    } else {
        (
            Positions::Float(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0]),
            Normals::Float(vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0]),
        )
    };
    GeometryPayload {
        reuse_count,
        type_name: type_name.to_string(),
        owner_revision_id: revision,
        has_transparency: false,
        geometry_id,
        indices: vec![0, 1, 2, 2, 1, 3],
        color: None,
        positions,
        normals,
        colors: None,
    }
}

/// Object placed by a pure translation, drawing `geometry_id`
pub fn placed_object(
    oid: ObjectId,
    geometry_id: GeometryId,
    type_name: &str,
    translation: [f64; 3],
) -> ObjectData {
    let offset = DVec3::from_array(translation);
    ObjectData {
        oid,
        type_name: type_name.to_string(),
        owner_revision_id: 1,
        geometry_info_id: oid,
        has_transparency: false,
        bounds: Aabb::new(offset, offset + DVec3::ONE),
        matrix: DMat4::from_translation(offset),
        geometry_data_id: geometry_id,
    }
}

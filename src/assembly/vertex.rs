//! Vertex layout rules for packed buffers
//!
//! Positions are either `f32x3` or quantized `i16x4` (w lane zero, since
//! GPUs have no 3-lane 16-bit format). Normals are `f32x3` or `snorm8x4`.
//! Per-vertex colors are `unorm8x4` and only present in buffers whose key
//! carries no uniform color. Indices are always `u32`.

use bytemuck::{Pod, Zeroable};

pub const INDEX_SIZE: usize = std::mem::size_of::<u32>();

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PositionFormat {
    Float32x3,
    Sint16x4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NormalFormat {
    Float32x3,
    Snorm8x4,
}

/// Attribute formats of one packed buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub position: PositionFormat,
    pub normal: NormalFormat,
    pub vertex_colors: bool,
}

impl VertexLayout {
    pub fn new(quantize_vertices: bool, quantize_normals: bool, vertex_colors: bool) -> Self {
        Self {
            position: if quantize_vertices { PositionFormat::Sint16x4 } else { PositionFormat::Float32x3 },
            normal: if quantize_normals { NormalFormat::Snorm8x4 } else { NormalFormat::Float32x3 },
            vertex_colors,
        }
    }

    /// Same layout with or without the color attribute
    pub fn with_vertex_colors(self, vertex_colors: bool) -> Self {
        Self { vertex_colors, ..self }
    }

    pub fn position_size(&self) -> usize {
        match self.position {
            PositionFormat::Float32x3 => 12,
            PositionFormat::Sint16x4 => 8,
        }
    }

    pub fn normal_size(&self) -> usize {
        match self.normal {
            NormalFormat::Float32x3 => 12,
            NormalFormat::Snorm8x4 => 4,
        }
    }

    pub fn color_size(&self) -> usize {
        if self.vertex_colors { 4 } else { 0 }
    }

    /// Bytes per vertex across all attribute streams
    pub fn vertex_size(&self) -> usize {
        self.position_size() + self.normal_size() + self.color_size()
    }

    /// GPU byte footprint of a geometry with the given element counts
    pub fn footprint(&self, vertex_count: usize, index_count: usize) -> usize {
        vertex_count * self.vertex_size() + index_count * INDEX_SIZE
    }
}

/// Pack a float RGBA into `unorm8x4`
pub fn pack_color(c: [f32; 4]) -> [u8; 4] {
    let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    [q(c[0]), q(c[1]), q(c[2]), q(c[3])]
}

/// Per-instance data for instanced draws: a column-major 4x4 matrix (64 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct InstanceRaw {
    pub model: [[f32; 4]; 4],
}

impl From<glam::Mat4> for InstanceRaw {
    fn from(m: glam::Mat4) -> Self {
        Self { model: m.to_cols_array_2d() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        let full = VertexLayout::new(false, false, true);
        assert_eq!(full.vertex_size(), 12 + 12 + 4);

        let quantized = VertexLayout::new(true, true, false);
        assert_eq!(quantized.vertex_size(), 8 + 4);
        assert_eq!(quantized.footprint(4, 6), 4 * 12 + 6 * 4);
    }

    #[test]
    fn test_pack_color() {
        assert_eq!(pack_color([1.0, 0.0, 0.5, 2.0]), [255, 0, 128, 255]);
    }

    #[test]
    fn test_instance_raw_size() {
        assert_eq!(std::mem::size_of::<InstanceRaw>(), 64);
    }
}

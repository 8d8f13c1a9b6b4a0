//! Vertex quantization frames
//!
//! A frame maps model-space floats into the signed 16-bit range used by
//! quantized position buffers, and carries the inverse for reconstruction.
//! Normals use a fixed signed 8-bit mapping and need no frame.

use std::collections::HashMap;

use crate::core::types::{Mat4, RevisionId, Vec3};
use super::aabb::Aabb;

/// Largest magnitude written into a quantized position component
pub const QUANTIZED_MAX: f32 = 32767.0;

/// Largest magnitude written into a quantized normal component
pub const NORMAL_MAX: f32 = 127.0;

/// Which bounds a frame was computed from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameScope {
    /// Whole model (all loaded revisions)
    Global,
    /// A single revision's bounds
    Revision(RevisionId),
}

/// Affine float -> integer-range transform with its inverse
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuantizationFrame {
    /// Model space -> quantized space
    pub scale_translate: Mat4,
    /// Quantized space -> model space
    pub inverse: Mat4,
    pub scope: FrameScope,
}

impl QuantizationFrame {
    /// Compute the frame that maps `bounds` onto `[-QUANTIZED_MAX, QUANTIZED_MAX]`
    /// on every axis. Degenerate (flat) axes keep unit scale.
    pub fn from_bounds(bounds: &Aabb, scope: FrameScope) -> Self {
        let size = bounds.size();
        let center = bounds.center();
        let axis_scale = |extent: f64| {
            if extent > f64::EPSILON {
                (2.0 * QUANTIZED_MAX as f64 / extent) as f32
            } else {
                1.0
            }
        };
        let scale = Vec3::new(axis_scale(size.x), axis_scale(size.y), axis_scale(size.z));
        let scale_translate =
            Mat4::from_scale(scale) * Mat4::from_translation(-center.as_vec3());
        Self {
            scale_translate,
            inverse: scale_translate.inverse(),
            scope,
        }
    }

    /// Quantize a model-space point. Output has a zero `w` lane so it maps
    /// onto a 4-component 16-bit vertex attribute.
    pub fn quantize(&self, p: Vec3) -> [i16; 4] {
        quantize_point(self.scale_translate.transform_point3(p))
    }

    /// Reconstruct a model-space point
    pub fn unquantize(&self, q: [i16; 3]) -> Vec3 {
        self.inverse
            .transform_point3(Vec3::new(q[0] as f32, q[1] as f32, q[2] as f32))
    }

    /// Matrix that takes a point quantized in `source` through `object`
    /// transform and into this frame: `self · object · source⁻¹`.
    ///
    /// The order is fixed: unquantize with the owning revision's inverse,
    /// apply the object matrix, then requantize.
    pub fn requantize_matrix(&self, source: &QuantizationFrame, object: &Mat4) -> Mat4 {
        self.scale_translate * *object * source.inverse
    }
}

/// Round and clamp an already-scaled point into 16-bit lanes
pub fn quantize_point(p: Vec3) -> [i16; 4] {
    let q = |v: f32| v.round().clamp(-QUANTIZED_MAX, QUANTIZED_MAX) as i16;
    [q(p.x), q(p.y), q(p.z), 0]
}

/// Pack a unit normal into signed 8-bit lanes (w = 0)
pub fn quantize_normal(n: Vec3) -> [i8; 4] {
    let q = |v: f32| (v * NORMAL_MAX).round().clamp(-NORMAL_MAX, NORMAL_MAX) as i8;
    [q(n.x), q(n.y), q(n.z), 0]
}

/// Unpack a signed 8-bit normal
pub fn unquantize_normal(n: [i8; 3]) -> Vec3 {
    Vec3::new(n[0] as f32, n[1] as f32, n[2] as f32) / NORMAL_MAX
}

/// Frames known to a load: one global destination frame plus the frame each
/// revision's stream was quantized with.
#[derive(Clone, Debug)]
pub struct QuantizationFrames {
    global: QuantizationFrame,
    per_revision: HashMap<RevisionId, QuantizationFrame>,
}

impl QuantizationFrames {
    /// Build from the global model bounds
    pub fn new(model_bounds: &Aabb) -> Self {
        Self {
            global: QuantizationFrame::from_bounds(model_bounds, FrameScope::Global),
            per_revision: HashMap::new(),
        }
    }

    /// Register the frame the backend used for a revision
    pub fn insert_revision(&mut self, revision: RevisionId, bounds: &Aabb) {
        self.per_revision.insert(
            revision,
            QuantizationFrame::from_bounds(bounds, FrameScope::Revision(revision)),
        );
    }

    /// Destination frame for packed buffers
    pub fn global(&self) -> &QuantizationFrame {
        &self.global
    }

    /// Frame a revision's geometry arrives in; falls back to the global frame
    /// when the revision was quantized against the whole model.
    pub fn for_revision(&self, revision: RevisionId) -> &QuantizationFrame {
        self.per_revision.get(&revision).unwrap_or(&self.global)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DVec3;

    fn bounds() -> Aabb {
        Aabb::new(DVec3::new(-10.0, 0.0, 5.0), DVec3::new(10.0, 40.0, 6.0))
    }

    #[test]
    fn test_bounds_map_to_full_range() {
        let frame = QuantizationFrame::from_bounds(&bounds(), FrameScope::Global);
        assert_eq!(frame.quantize(Vec3::new(-10.0, 0.0, 5.0)), [-32767, -32767, -32767, 0]);
        assert_eq!(frame.quantize(Vec3::new(10.0, 40.0, 6.0)), [32767, 32767, 32767, 0]);
        assert_eq!(frame.quantize(Vec3::new(0.0, 20.0, 5.5)), [0, 0, 0, 0]);
    }

    #[test]
    fn test_unquantize_inverts_quantize() {
        let frame = QuantizationFrame::from_bounds(&bounds(), FrameScope::Global);
        let p = Vec3::new(3.3, 12.5, 5.75);
        let q = frame.quantize(p);
        let back = frame.unquantize([q[0], q[1], q[2]]);
        // one quantization step on the widest axis is 40/65534
        assert!((back - p).abs().max_element() < 1e-3);
    }

    #[test]
    fn test_flat_axis_keeps_unit_scale() {
        let flat = Aabb::new(DVec3::ZERO, DVec3::new(2.0, 0.0, 2.0));
        let frame = QuantizationFrame::from_bounds(&flat, FrameScope::Revision(4));
        assert_eq!(frame.quantize(Vec3::new(1.0, 3.0, 1.0))[1], 3);
        assert_eq!(frame.scope, FrameScope::Revision(4));
    }

    #[test]
    fn test_requantize_order() {
        let source = QuantizationFrame::from_bounds(
            &Aabb::new(DVec3::ZERO, DVec3::splat(2.0)),
            FrameScope::Revision(1),
        );
        let dest = QuantizationFrame::from_bounds(
            &Aabb::new(DVec3::splat(-100.0), DVec3::splat(100.0)),
            FrameScope::Global,
        );
        let object = Mat4::from_translation(Vec3::new(50.0, 0.0, 0.0));

        let model_point = Vec3::new(1.0, 1.0, 1.0);
        let q_src = source.quantize(model_point);
        let m = dest.requantize_matrix(&source, &object);
        let via_matrix = quantize_point(
            m.transform_point3(Vec3::new(q_src[0] as f32, q_src[1] as f32, q_src[2] as f32)),
        );

        let stepwise = dest.quantize(object.transform_point3(source.unquantize([q_src[0], q_src[1], q_src[2]])));
        assert_eq!(via_matrix, stepwise);
        assert_eq!(dest.unquantize([via_matrix[0], via_matrix[1], via_matrix[2]]).x.round(), 51.0);
    }

    #[test]
    fn test_normal_packing() {
        assert_eq!(quantize_normal(Vec3::Y), [0, 127, 0, 0]);
        assert_eq!(quantize_normal(-Vec3::X), [-127, 0, 0, 0]);
        let n = unquantize_normal([0, 0, 127]);
        assert!((n - Vec3::Z).length() < 1e-6);
    }

    #[test]
    fn test_revision_frame_fallback() {
        let mut frames = QuantizationFrames::new(&bounds());
        frames.insert_revision(7, &Aabb::new(DVec3::ZERO, DVec3::ONE));
        assert_eq!(frames.for_revision(7).scope, FrameScope::Revision(7));
        assert_eq!(frames.for_revision(8).scope, FrameScope::Global);
    }
}

//! Converts attached (object, geometry) pairs into render-ready buffers
//!
//! Duplicated geometry is transformed per object and packed into shared
//! buffer sets. Instanced geometry accumulates one matrix per visible
//! reference and is materialized once, when its last reference arrives.
//!
//! Vertex placement under quantization always runs: unquantize with the
//! owning revision's inverse frame, apply the object matrix, requantize into
//! the destination frame. Instanced geometry keeps its vertices in the
//! source frame and folds the same chain into each instance matrix, so both
//! paths land in one coordinate space.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::LoaderConfig;
use crate::core::types::{BufferId, GeometryId, Mat3, Mat4, Result, Vec3};
use crate::math::quantization::{quantize_normal, quantize_point, unquantize_normal};
use crate::math::{QuantizationFrame, QuantizationFrames};
use crate::protocol::{ColorPolicy, GeometryPayload, Normals, Positions};
use crate::render::upload::{UploadQueue, UploadRequest};
use super::buffer_set::{
    BufferCapacity, BufferKey, BufferPacker, NormalData, PackedBufferSet, PositionData, VertexBatch,
};
use super::geometry::{GeometryMode, GeometryRecord, ObjectRecord};
use super::vertex::{pack_color, InstanceRaw, NormalFormat, PositionFormat, VertexLayout};

/// Packing and coloring settings shared by every assembler of a load
#[derive(Clone, Debug)]
pub struct AssemblerSettings {
    pub quantize_vertices: bool,
    pub quantize_normals: bool,
    pub capacity: BufferCapacity,
    pub color_policy: ColorPolicy,
    /// Types decoded but not drawn
    pub hidden_types: HashSet<String>,
}

impl AssemblerSettings {
    pub fn from_config(config: &LoaderConfig) -> Self {
        Self {
            quantize_vertices: config.quantize_vertices,
            quantize_normals: config.quantize_normals,
            capacity: BufferCapacity {
                max_vertices: config.max_vertices_per_set,
                max_indices: config.max_indices_per_set,
            },
            color_policy: config.color_policy(),
            hidden_types: config.hidden_types.iter().cloned().collect(),
        }
    }

    /// Destination layout without the color attribute
    pub fn base_layout(&self) -> VertexLayout {
        VertexLayout::new(self.quantize_vertices, self.quantize_normals, false)
    }
}

/// A geometry materialized for instanced drawing
#[derive(Clone, Debug)]
pub struct InstancedGeometry {
    pub id: BufferId,
    pub geometry_id: GeometryId,
    pub key: BufferKey,
    pub layout: VertexLayout,
    pub positions: PositionData,
    pub normals: NormalData,
    pub colors: Vec<[u8; 4]>,
    pub indices: Vec<u32>,
    /// One entry per visible reference, in arrival order
    pub instances: Vec<InstanceRaw>,
}

impl InstancedGeometry {
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn byte_size(&self) -> usize {
        self.layout.footprint(self.positions.len(), self.indices.len())
            + self.instances.len() * std::mem::size_of::<InstanceRaw>()
    }
}

/// Counters for one assembler
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    pub visible_triangles: u64,
    /// Triangles of hidden-type objects, counted for progress only
    pub hidden_triangles: u64,
    pub duplicated_references: u64,
    pub instanced_geometries: u64,
    pub instances: u64,
    pub buffer_sets: u64,
    pub uploaded_bytes: u64,
    /// Geometries dropped without producing a buffer
    pub discarded_geometries: u64,
}

/// Everything an assembler handed to the upload queue
#[derive(Clone, Debug, Default)]
pub struct AssemblyOutput {
    pub buffers: Vec<BufferId>,
    pub stats: AssemblyStats,
}

impl AssemblyOutput {
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

/// Per-session (or per-tile) packing state
pub struct GeometryAssembler {
    settings: Arc<AssemblerSettings>,
    reuse_set: Arc<HashSet<GeometryId>>,
    frames: Arc<QuantizationFrames>,
    packer: BufferPacker,
    uploads: UploadQueue,
    produced: Vec<BufferId>,
    stats: AssemblyStats,
    visible_counter: Option<Arc<AtomicU64>>,
}

impl GeometryAssembler {
    pub fn new(
        settings: Arc<AssemblerSettings>,
        reuse_set: Arc<HashSet<GeometryId>>,
        frames: Arc<QuantizationFrames>,
        uploads: UploadQueue,
    ) -> Self {
        let packer = BufferPacker::new(settings.base_layout(), settings.capacity);
        Self {
            settings,
            reuse_set,
            frames,
            packer,
            uploads,
            produced: Vec::new(),
            stats: AssemblyStats::default(),
            visible_counter: None,
        }
    }

    /// Also add visible triangles to a counter shared across a whole load
    pub fn with_visible_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.visible_counter = Some(counter);
        self
    }

    pub fn stats(&self) -> AssemblyStats {
        self.stats
    }

    pub fn is_hidden_type(&self, type_name: &str) -> bool {
        self.settings.hidden_types.contains(type_name)
    }

    /// Wrap a decoded payload, computing its footprint in the destination layout
    pub fn prepare(&self, payload: GeometryPayload) -> GeometryRecord {
        let layout = self.packer.layout_for(self.key_for(&payload));
        let byte_size = layout.footprint(payload.vertex_count(), payload.index_count());
        GeometryRecord::new(payload, byte_size)
    }

    /// Account one reference of `geometry` by `object`.
    ///
    /// Returns true when the geometry has now seen all its references and
    /// may be evicted from the session.
    pub fn attach(&mut self, object: &ObjectRecord, geometry: &mut GeometryRecord) -> Result<bool> {
        let mode = geometry.decide_mode(&self.reuse_set);
        let triangles = geometry.payload.triangle_count() as u64;

        if object.visible {
            match mode {
                GeometryMode::Duplicated => {
                    let key = self.key_for(&geometry.payload);
                    let layout = self.packer.layout_for(key);
                    let batch = self.build_batch(
                        &geometry.payload,
                        layout,
                        &object.transform,
                        self.frames.global(),
                    );
                    for set in self.packer.push(key, batch) {
                        self.upload_set(set)?;
                    }
                    self.stats.duplicated_references += 1;
                }
                GeometryMode::Instanced => {
                    let matrix = self.instance_matrix(&geometry.payload, &object.transform);
                    geometry.instance_matrices.push(matrix);
                }
            }
            self.stats.visible_triangles += triangles;
            if let Some(counter) = &self.visible_counter {
                counter.fetch_add(triangles, Ordering::Relaxed);
            }
        } else {
            self.stats.hidden_triangles += triangles;
        }

        let complete = geometry.record_reference();
        if complete {
            self.materialize(geometry)?;
        }
        Ok(complete)
    }

    /// Finalize a geometry whose declared references never all arrived.
    /// Instanced geometry with at least one instance is still uploaded.
    pub fn finalize_incomplete(&mut self, geometry: &mut GeometryRecord) -> Result<()> {
        if geometry.is_complete() {
            return Ok(());
        }
        log::warn!(
            "geometry {} closed with {}/{} references",
            geometry.id(),
            geometry.materialized_reuse_count(),
            geometry.reuse_count()
        );
        self.materialize(geometry)
    }

    fn materialize(&mut self, geometry: &mut GeometryRecord) -> Result<()> {
        let buffer = match geometry.mode() {
            Some(GeometryMode::Instanced) if !geometry.instance_matrices.is_empty() => {
                let instanced = self.build_instanced(geometry);
                let id = instanced.id;
                self.stats.instanced_geometries += 1;
                self.stats.instances += instanced.instance_count() as u64;
                self.stats.uploaded_bytes += instanced.byte_size() as u64;
                log::debug!(
                    "geometry {} materialized with {} instances",
                    geometry.id(),
                    instanced.instance_count()
                );
                self.uploads.send(UploadRequest::Instanced(instanced))?;
                self.produced.push(id);
                Some(id)
            }
            Some(GeometryMode::Instanced) | None => {
                self.stats.discarded_geometries += 1;
                None
            }
            Some(GeometryMode::Duplicated) => None,
        };
        geometry.mark_materialized(buffer);
        Ok(())
    }

    /// Flush every open buffer set and report what was produced
    pub fn finish(&mut self) -> Result<AssemblyOutput> {
        for set in self.packer.flush_all() {
            self.upload_set(set)?;
        }
        Ok(AssemblyOutput {
            buffers: std::mem::take(&mut self.produced),
            stats: self.stats,
        })
    }

    /// Drop open sets without uploading them and release every buffer
    /// already handed to the upload queue
    pub fn discard(&mut self) {
        self.packer.discard();
        for id in self.produced.drain(..) {
            if self.uploads.release(id).is_err() {
                break;
            }
        }
    }

    fn upload_set(&mut self, set: PackedBufferSet) -> Result<()> {
        let id = set.id;
        self.stats.buffer_sets += 1;
        self.stats.uploaded_bytes += set.byte_size() as u64;
        self.uploads.send(UploadRequest::BufferSet(set))?;
        self.produced.push(id);
        Ok(())
    }

    fn key_for(&self, payload: &GeometryPayload) -> BufferKey {
        let policy = self.settings.color_policy;
        if policy.allows_vertex_colors() && payload.colors.is_some() {
            return BufferKey::new(payload.has_transparency, None);
        }
        let color = policy.resolve(payload.color, &payload.type_name);
        BufferKey::new(payload.has_transparency || color[3] < 1.0, Some(color))
    }

    fn instance_matrix(&self, payload: &GeometryPayload, object: &Mat4) -> Mat4 {
        if self.settings.quantize_vertices {
            let source = self.frames.for_revision(payload.owner_revision_id);
            self.frames.global().requantize_matrix(source, object)
        } else {
            *object
        }
    }

    fn build_instanced(&self, geometry: &mut GeometryRecord) -> InstancedGeometry {
        let payload = &geometry.payload;
        let key = self.key_for(payload);
        let layout = self.packer.layout_for(key);
        // vertices stay in the source frame; instance matrices carry placement
        let source = *self.frames.for_revision(payload.owner_revision_id);
        let batch = self.build_batch(payload, layout, &Mat4::IDENTITY, &source);
        InstancedGeometry {
            id: BufferId::next(),
            geometry_id: payload.geometry_id,
            key,
            layout,
            positions: batch.positions,
            normals: batch.normals,
            colors: batch.colors,
            indices: batch.indices,
            instances: geometry
                .instance_matrices
                .drain(..)
                .map(InstanceRaw::from)
                .collect(),
        }
    }

    /// Transform a payload by `object` into `layout`, quantizing into `dest`
    fn build_batch(
        &self,
        payload: &GeometryPayload,
        layout: VertexLayout,
        object: &Mat4,
        dest: &QuantizationFrame,
    ) -> VertexBatch {
        let source = self.frames.for_revision(payload.owner_revision_id);
        let vertex_count = payload.vertex_count();

        let positions = match (&payload.positions, layout.position) {
            (Positions::Float(p), PositionFormat::Float32x3) => PositionData::Float(
                p.chunks_exact(3)
                    .map(|c| object.transform_point3(Vec3::from_slice(c)).to_array())
                    .collect(),
            ),
            (Positions::Float(p), PositionFormat::Sint16x4) => PositionData::Quantized(
                p.chunks_exact(3)
                    .map(|c| dest.quantize(object.transform_point3(Vec3::from_slice(c))))
                    .collect(),
            ),
            (Positions::Quantized(q), PositionFormat::Sint16x4) => {
                let m = dest.requantize_matrix(source, object);
                PositionData::Quantized(
                    q.chunks_exact(3)
                        .map(|c| quantize_point(m.transform_point3(quantized_vec(c))))
                        .collect(),
                )
            }
            (Positions::Quantized(q), PositionFormat::Float32x3) => PositionData::Float(
                q.chunks_exact(3)
                    .map(|c| {
                        object
                            .transform_point3(source.unquantize([c[0], c[1], c[2]]))
                            .to_array()
                    })
                    .collect(),
            ),
        };

        let normal_matrix = normal_matrix(object);
        let wire_normals: Vec<Vec3> = match &payload.normals {
            Normals::Float(n) => n.chunks_exact(3).map(Vec3::from_slice).collect(),
            Normals::Quantized(n) => n
                .chunks_exact(3)
                .map(|c| unquantize_normal([c[0], c[1], c[2]]))
                .collect(),
        };
        let transformed = wire_normals
            .into_iter()
            .map(|n| (normal_matrix * n).normalize_or_zero())
            .chain(std::iter::repeat(Vec3::ZERO))
            .take(vertex_count);
        let normals = match layout.normal {
            NormalFormat::Float32x3 => NormalData::Float(transformed.map(|n| n.to_array()).collect()),
            NormalFormat::Snorm8x4 => NormalData::Quantized(transformed.map(quantize_normal).collect()),
        };

        let colors = match (&payload.colors, layout.vertex_colors) {
            (Some(c), true) => c
                .chunks_exact(4)
                .map(|c| pack_color([c[0], c[1], c[2], c[3]]))
                .collect(),
            _ => Vec::new(),
        };

        VertexBatch {
            positions,
            normals,
            colors,
            indices: payload.indices.clone(),
        }
    }
}

fn quantized_vec(c: &[i16]) -> Vec3 {
    Vec3::new(c[0] as f32, c[1] as f32, c[2] as f32)
}

/// Inverse-transpose of the upper 3x3, falling back to the plain 3x3 for
/// singular transforms
fn normal_matrix(m: &Mat4) -> Mat3 {
    let upper = Mat3::from_mat4(*m);
    if upper.determinant().abs() > f32::EPSILON {
        upper.inverse().transpose()
    } else {
        upper
    }
}

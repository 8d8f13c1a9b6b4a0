//! Capacity-bounded buffer sets keyed by (transparency, color)
//!
//! Packing never blocks on tile or session boundaries: a set that cannot
//! take the next batch is flushed on the spot and replaced by a fresh set of
//! the same key.

use std::collections::HashMap;

use crate::core::types::{BufferId, Rgba};
use super::vertex::{NormalFormat, PositionFormat, VertexLayout};

/// Position attribute stream
#[derive(Clone, Debug, PartialEq)]
pub enum PositionData {
    Float(Vec<[f32; 3]>),
    Quantized(Vec<[i16; 4]>),
}

impl PositionData {
    pub fn with_capacity(format: PositionFormat, capacity: usize) -> Self {
        match format {
            PositionFormat::Float32x3 => PositionData::Float(Vec::with_capacity(capacity)),
            PositionFormat::Sint16x4 => PositionData::Quantized(Vec::with_capacity(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PositionData::Float(v) => v.len(),
            PositionData::Quantized(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn extend(&mut self, other: PositionData) {
        match (self, other) {
            (PositionData::Float(a), PositionData::Float(b)) => a.extend(b),
            (PositionData::Quantized(a), PositionData::Quantized(b)) => a.extend(b),
            _ => unreachable!("position formats are fixed per packer"),
        }
    }

    /// Raw bytes for upload
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            PositionData::Float(v) => bytemuck::cast_slice(v),
            PositionData::Quantized(v) => bytemuck::cast_slice(v),
        }
    }
}

/// Normal attribute stream
#[derive(Clone, Debug, PartialEq)]
pub enum NormalData {
    Float(Vec<[f32; 3]>),
    Quantized(Vec<[i8; 4]>),
}

impl NormalData {
    pub fn with_capacity(format: NormalFormat, capacity: usize) -> Self {
        match format {
            NormalFormat::Float32x3 => NormalData::Float(Vec::with_capacity(capacity)),
            NormalFormat::Snorm8x4 => NormalData::Quantized(Vec::with_capacity(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            NormalData::Float(v) => v.len(),
            NormalData::Quantized(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn extend(&mut self, other: NormalData) {
        match (self, other) {
            (NormalData::Float(a), NormalData::Float(b)) => a.extend(b),
            (NormalData::Quantized(a), NormalData::Quantized(b)) => a.extend(b),
            _ => unreachable!("normal formats are fixed per packer"),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            NormalData::Float(v) => bytemuck::cast_slice(v),
            NormalData::Quantized(v) => bytemuck::cast_slice(v),
        }
    }
}

/// Vertex data of one geometry reference, already in destination space.
/// Indices are local to the batch.
#[derive(Clone, Debug, PartialEq)]
pub struct VertexBatch {
    pub positions: PositionData,
    pub normals: NormalData,
    pub colors: Vec<[u8; 4]>,
    pub indices: Vec<u32>,
}

impl VertexBatch {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }
}

/// Grouping key of a buffer set. Colors compare bitwise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferKey {
    pub transparent: bool,
    color: Option<[u32; 4]>,
}

impl BufferKey {
    /// `color` is `None` for sets carrying per-vertex colors
    pub fn new(transparent: bool, color: Option<Rgba>) -> Self {
        Self {
            transparent,
            color: color.map(|c| c.map(f32::to_bits)),
        }
    }

    pub fn color(&self) -> Option<Rgba> {
        self.color.map(|c| c.map(f32::from_bits))
    }
}

/// Element limits of one buffer set
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferCapacity {
    pub max_vertices: usize,
    pub max_indices: usize,
}

/// An open, growing buffer set
#[derive(Debug)]
pub struct BufferSet {
    key: BufferKey,
    layout: VertexLayout,
    capacity: BufferCapacity,
    positions: PositionData,
    normals: NormalData,
    colors: Vec<[u8; 4]>,
    indices: Vec<u32>,
    object_count: usize,
}

impl BufferSet {
    pub fn new(key: BufferKey, layout: VertexLayout, capacity: BufferCapacity) -> Self {
        Self {
            key,
            layout,
            capacity,
            positions: PositionData::with_capacity(layout.position, 0),
            normals: NormalData::with_capacity(layout.normal, 0),
            colors: Vec::new(),
            indices: Vec::new(),
            object_count: 0,
        }
    }

    pub fn key(&self) -> BufferKey {
        self.key
    }

    pub fn capacity(&self) -> BufferCapacity {
        self.capacity
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.object_count == 0
    }

    /// Whether `batch` can be appended without exceeding capacity
    pub fn fits(&self, batch: &VertexBatch) -> bool {
        self.vertex_count() + batch.vertex_count() <= self.capacity.max_vertices
            && self.index_count() + batch.index_count() <= self.capacity.max_indices
    }

    /// Append a batch, rebasing its indices onto this set's vertex count
    pub fn append(&mut self, batch: VertexBatch) {
        debug_assert!(self.fits(&batch));
        if self.is_empty() {
            // first object starts at vertex 0; no rebase needed
            self.indices.extend(batch.indices);
        } else {
            let base = self.vertex_count() as u32;
            self.indices.extend(batch.indices.into_iter().map(|i| i + base));
        }
        self.positions.extend(batch.positions);
        self.normals.extend(batch.normals);
        if self.layout.vertex_colors {
            self.colors.extend(batch.colors);
        }
        self.object_count += 1;
    }

    /// Close the set and hand it over for upload
    pub fn into_packed(self) -> PackedBufferSet {
        PackedBufferSet {
            id: BufferId::next(),
            key: self.key,
            layout: self.layout,
            positions: self.positions,
            normals: self.normals,
            colors: self.colors,
            indices: self.indices,
            object_count: self.object_count,
        }
    }
}

/// A closed buffer set ready for GPU upload
#[derive(Clone, Debug)]
pub struct PackedBufferSet {
    pub id: BufferId,
    pub key: BufferKey,
    pub layout: VertexLayout,
    pub positions: PositionData,
    pub normals: NormalData,
    pub colors: Vec<[u8; 4]>,
    pub indices: Vec<u32>,
    pub object_count: usize,
}

impl PackedBufferSet {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn byte_size(&self) -> usize {
        self.layout.footprint(self.vertex_count(), self.indices.len())
    }
}

/// Set of open buffer sets, one per key
pub struct BufferPacker {
    base_layout: VertexLayout,
    capacity: BufferCapacity,
    open: HashMap<BufferKey, BufferSet>,
}

impl BufferPacker {
    /// `base_layout` fixes position and normal formats; the color attribute
    /// is chosen per key.
    pub fn new(base_layout: VertexLayout, capacity: BufferCapacity) -> Self {
        Self {
            base_layout,
            capacity,
            open: HashMap::new(),
        }
    }

    pub fn layout_for(&self, key: BufferKey) -> VertexLayout {
        self.base_layout.with_vertex_colors(key.color().is_none())
    }

    /// Number of sets currently accepting data
    pub fn open_sets(&self) -> usize {
        self.open.len()
    }

    /// Append a batch under `key`. Returns the sets that filled up and were
    /// closed as a consequence.
    pub fn push(&mut self, key: BufferKey, batch: VertexBatch) -> Vec<PackedBufferSet> {
        let layout = self.layout_for(key);
        let capacity = self.capacity;
        let mut flushed = Vec::new();

        if batch.vertex_count() > capacity.max_vertices || batch.index_count() > capacity.max_indices {
            // never split a geometry: it gets a set of its own
            if let Some(current) = self.open.remove(&key) {
                if !current.is_empty() {
                    flushed.push(current.into_packed());
                }
            }
            let mut dedicated = BufferSet::new(
                key,
                layout,
                BufferCapacity {
                    max_vertices: batch.vertex_count(),
                    max_indices: batch.index_count(),
                },
            );
            log::debug!(
                "oversized batch ({} vertices, {} indices) packed alone",
                batch.vertex_count(),
                batch.index_count()
            );
            dedicated.append(batch);
            flushed.push(dedicated.into_packed());
            return flushed;
        }

        let set = self
            .open
            .entry(key)
            .or_insert_with(|| BufferSet::new(key, layout, capacity));
        if !set.fits(&batch) {
            let full = std::mem::replace(set, BufferSet::new(key, layout, capacity));
            log::debug!(
                "buffer set full at {} vertices / {} indices, flushing",
                full.vertex_count(),
                full.index_count()
            );
            flushed.push(full.into_packed());
        }
        set.append(batch);
        flushed
    }

    /// Close every non-empty open set, in key order
    pub fn flush_all(&mut self) -> Vec<PackedBufferSet> {
        let mut sets: Vec<BufferSet> = self.open.drain().map(|(_, set)| set).collect();
        sets.sort_by_key(|s| s.key());
        sets.into_iter()
            .filter(|s| !s.is_empty())
            .map(BufferSet::into_packed)
            .collect()
    }

    /// Drop all open sets without flushing
    pub fn discard(&mut self) {
        self.open.clear();
    }
}

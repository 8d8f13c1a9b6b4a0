//! wgpu-backed buffer manager for packed geometry

use std::collections::HashMap;

use crate::assembly::{
    BufferKey, InstanceRaw, InstancedGeometry, NormalFormat, PackedBufferSet, PositionFormat,
    VertexLayout,
};
use crate::core::error::Error;
use crate::core::types::{BufferId, Result};
use super::upload::GpuBufferManager;

/// Device and queue an upload runs against
pub struct RenderContext<'a> {
    pub device: &'a wgpu::Device,
    pub queue: &'a wgpu::Queue,
}

/// GPU-resident buffers for one buffer set or instanced geometry
pub struct GpuMesh {
    pub key: BufferKey,
    pub layout: VertexLayout,
    pub positions: wgpu::Buffer,
    pub normals: wgpu::Buffer,
    pub colors: Option<wgpu::Buffer>,
    pub indices: wgpu::Buffer,
    pub index_count: u32,
    /// Per-instance matrices and instance count, for instanced meshes
    pub instances: Option<(wgpu::Buffer, u32)>,
    pub byte_size: u64,
}

/// Vertex attribute layout matching [`VertexLayout`]: separate position,
/// normal and optional color streams at locations 0, 1, 2.
pub fn vertex_attributes(layout: &VertexLayout) -> Vec<wgpu::VertexAttribute> {
    let mut attributes = vec![
        wgpu::VertexAttribute {
            format: match layout.position {
                PositionFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
                PositionFormat::Sint16x4 => wgpu::VertexFormat::Sint16x4,
            },
            offset: 0,
            shader_location: 0,
        },
        wgpu::VertexAttribute {
            format: match layout.normal {
                NormalFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
                NormalFormat::Snorm8x4 => wgpu::VertexFormat::Snorm8x4,
            },
            offset: 0,
            shader_location: 1,
        },
    ];
    if layout.vertex_colors {
        attributes.push(wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Unorm8x4,
            offset: 0,
            shader_location: 2,
        });
    }
    attributes
}

/// Per-instance matrix as four vec4 columns at locations 3..=6
pub const INSTANCE_ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
    3 => Float32x4,
    4 => Float32x4,
    5 => Float32x4,
    6 => Float32x4,
];

pub fn instance_buffer_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<InstanceRaw>() as u64,
        step_mode: wgpu::VertexStepMode::Instance,
        attributes: &INSTANCE_ATTRIBUTES,
    }
}

/// Owns every mesh uploaded through the funnel
#[derive(Default)]
pub struct MeshBufferManager {
    meshes: HashMap<BufferId, GpuMesh>,
    resident_bytes: u64,
}

impl MeshBufferManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: BufferId) -> Option<&GpuMesh> {
        self.meshes.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BufferId, &GpuMesh)> {
        self.meshes.iter()
    }

    pub fn resident_bytes(&self) -> u64 {
        self.resident_bytes
    }

    fn insert(&mut self, id: BufferId, mesh: GpuMesh) {
        self.resident_bytes += mesh.byte_size;
        if let Some(old) = self.meshes.insert(id, mesh) {
            self.resident_bytes -= old.byte_size;
        }
    }
}

/// Create a buffer and fill it through the queue
fn create_filled(
    ctx: &RenderContext<'_>,
    label: &str,
    usage: wgpu::BufferUsages,
    contents: &[u8],
) -> Result<wgpu::Buffer> {
    let size = contents.len() as u64;
    let max = ctx.device.limits().max_buffer_size;
    if size > max {
        return Err(Error::GpuResource(format!(
            "{} needs {} bytes, device limit is {}",
            label, size, max
        )));
    }
    if size > 256 * 1024 * 1024 {
        log::warn!("{} size: {}MB", label, size / 1024 / 1024);
    }

    let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: usage | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    if !contents.is_empty() {
        ctx.queue.write_buffer(&buffer, 0, contents);
    }
    Ok(buffer)
}

fn create_mesh(
    ctx: &RenderContext<'_>,
    key: BufferKey,
    layout: VertexLayout,
    positions: &[u8],
    normals: &[u8],
    colors: &[[u8; 4]],
    indices: &[u32],
) -> Result<GpuMesh> {
    let vertex = wgpu::BufferUsages::VERTEX;
    let colors = if layout.vertex_colors {
        Some(create_filled(ctx, "mesh_colors", vertex, bytemuck::cast_slice(colors))?)
    } else {
        None
    };
    Ok(GpuMesh {
        key,
        layout,
        positions: create_filled(ctx, "mesh_positions", vertex, positions)?,
        normals: create_filled(ctx, "mesh_normals", vertex, normals)?,
        colors,
        indices: create_filled(
            ctx,
            "mesh_indices",
            wgpu::BufferUsages::INDEX,
            bytemuck::cast_slice(indices),
        )?,
        index_count: indices.len() as u32,
        instances: None,
        byte_size: 0,
    })
}

impl GpuBufferManager for MeshBufferManager {
    type Context<'a> = RenderContext<'a>;

    fn upload_buffer_set(&mut self, ctx: &RenderContext<'_>, set: &PackedBufferSet) -> Result<()> {
        let mut mesh = create_mesh(
            ctx,
            set.key,
            set.layout,
            set.positions.as_bytes(),
            set.normals.as_bytes(),
            &set.colors,
            &set.indices,
        )?;
        mesh.byte_size = set.byte_size() as u64;
        self.insert(set.id, mesh);
        Ok(())
    }

    fn upload_instanced(&mut self, ctx: &RenderContext<'_>, geometry: &InstancedGeometry) -> Result<()> {
        let mut mesh = create_mesh(
            ctx,
            geometry.key,
            geometry.layout,
            geometry.positions.as_bytes(),
            geometry.normals.as_bytes(),
            &geometry.colors,
            &geometry.indices,
        )?;
        let instances = create_filled(
            ctx,
            "mesh_instances",
            wgpu::BufferUsages::VERTEX,
            bytemuck::cast_slice(&geometry.instances),
        )?;
        mesh.instances = Some((instances, geometry.instance_count() as u32));
        mesh.byte_size = geometry.byte_size() as u64;
        self.insert(geometry.id, mesh);
        Ok(())
    }

    fn release(&mut self, id: BufferId) -> bool {
        match self.meshes.remove(&id) {
            Some(mesh) => {
                self.resident_bytes -= mesh.byte_size;
                mesh.positions.destroy();
                mesh.normals.destroy();
                mesh.indices.destroy();
                if let Some(colors) = mesh.colors {
                    colors.destroy();
                }
                if let Some((instances, _)) = mesh.instances {
                    instances.destroy();
                }
                true
            }
            None => false,
        }
    }

    fn resident_count(&self) -> usize {
        self.meshes.len()
    }
}

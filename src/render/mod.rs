//! GPU-facing side of the loader: the upload funnel and its wgpu backend

pub mod upload;
pub mod wgpu_manager;

pub use upload::{DrainStats, GpuBufferManager, UploadQueue, UploadReceiver, UploadRequest};
pub use wgpu_manager::{GpuMesh, MeshBufferManager, RenderContext};

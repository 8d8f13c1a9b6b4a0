//! Assembly of decoded geometry into packed GPU buffer sets and instanced draws

pub mod vertex;
pub mod buffer_set;
pub mod geometry;
pub mod assembler;

pub use vertex::{InstanceRaw, NormalFormat, PositionFormat, VertexLayout};
pub use buffer_set::{BufferCapacity, BufferKey, BufferPacker, PackedBufferSet};
pub use geometry::{GeometryMode, GeometryRecord, ObjectRecord, ReuseState};
pub use assembler::{AssemblerSettings, AssemblyOutput, AssemblyStats, GeometryAssembler, InstancedGeometry};

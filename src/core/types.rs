//! Core type aliases and identifiers

pub use glam::{DMat4, DVec3, Mat3, Mat4, Vec3, Vec4};

/// Standard Result type for the engine
pub type Result<T> = std::result::Result<T, crate::core::error::Error>;

/// Backend identifier of a model revision
pub type RevisionId = u64;

/// Wire identifier of a decoded geometry payload
pub type GeometryId = u64;

/// Wire identifier of a model object
pub type ObjectId = u64;

/// RGBA color with components in 0..=1
pub type Rgba = [f32; 4];

/// Handle for a packed buffer (buffer set or instanced geometry) awaiting or
/// holding GPU residency. Allocated CPU-side at flush time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

impl BufferId {
    /// Allocate a process-unique id
    pub fn next() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static NEXT: AtomicU64 = AtomicU64::new(1);
        BufferId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

//! Spatial tiling: the octree index and the load scheduler

pub mod index;
pub mod scheduler;

pub use index::{SharedTileIndex, TileId, TileIndex, TileNode, TileStatus};
pub use scheduler::{
    LoadOutcome, LoadPhase, LoadProgress, LoadProgressFn, LoadReport, LoadRequest, ModelLoader,
    RevisionInfo, TileLoadReport,
};

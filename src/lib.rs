//! Geostream - streaming geometry ingestion and spatial tiling for large
//! engineering models

pub mod core;
pub mod config;
pub mod math;
pub mod protocol;
pub mod assembly;
pub mod loader;
pub mod tiles;
pub mod render;

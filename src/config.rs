//! Loader configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::{Result, Rgba};
use crate::protocol::decoder::DEFAULT_UNIT_SCALE_TOLERANCE;
use crate::protocol::{ColorPolicy, WireOptions};

/// Deepest tile index accepted
pub const MAX_TILE_DEPTH: u8 = 8;

/// Tunables for one model load. Every field has a default, so a JSON file
/// only needs to name what it changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Concurrent base-layer sessions
    pub base_concurrency: usize,
    /// Concurrent tile sessions
    pub tile_concurrency: usize,
    pub tile_depth: u8,
    /// Separates the always-loaded coarse layer from tiled detail
    pub density_threshold: f32,
    pub max_vertices_per_set: usize,
    pub max_indices_per_set: usize,
    pub quantize_vertices: bool,
    pub quantize_normals: bool,
    /// Wire indices are i16 instead of i32
    pub short_indices: bool,
    /// Band around 1.0 inside which the stream unit scale is ignored
    pub unit_scale_tolerance: f32,
    /// Whole-object color; suppresses every stream color when set
    pub object_color: Option<Rgba>,
    /// Types never requested from the backend
    pub excluded_types: Vec<String>,
    /// Types decoded but not drawn
    pub hidden_types: Vec<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            base_concurrency: 4,
            tile_concurrency: 32,
            tile_depth: 3,
            density_threshold: 0.5,
            max_vertices_per_set: 1_000_000,
            max_indices_per_set: 3_000_000,
            quantize_vertices: true,
            quantize_normals: true,
            short_indices: false,
            unit_scale_tolerance: DEFAULT_UNIT_SCALE_TOLERANCE,
            object_color: None,
            excluded_types: vec!["IfcOpeningElement".into(), "IfcSpace".into()],
            hidden_types: Vec::new(),
        }
    }
}

impl LoaderConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from file (sync)
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Save to file (sync)
    pub fn save_json_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("base_concurrency", self.base_concurrency),
            ("tile_concurrency", self.tile_concurrency),
            ("max_vertices_per_set", self.max_vertices_per_set),
            ("max_indices_per_set", self.max_indices_per_set),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(Error::Config(format!("{} must be greater than zero", name)));
        }
        if self.tile_depth > MAX_TILE_DEPTH {
            return Err(Error::Config(format!(
                "tile_depth {} exceeds {}",
                self.tile_depth, MAX_TILE_DEPTH
            )));
        }
        if !(self.unit_scale_tolerance >= 0.0 && self.unit_scale_tolerance.is_finite()) {
            return Err(Error::Config("unit_scale_tolerance must be a finite non-negative number".into()));
        }
        if !self.density_threshold.is_finite() {
            return Err(Error::Config("density_threshold must be finite".into()));
        }
        Ok(())
    }

    /// Encoding the backend is asked to produce
    pub fn wire_options(&self) -> WireOptions {
        WireOptions {
            quantized: self.quantize_vertices,
            short_indices: self.short_indices,
        }
    }

    pub fn color_policy(&self) -> ColorPolicy {
        match self.object_color {
            Some(color) => ColorPolicy::WholeObject(color),
            None => ColorPolicy::Stream,
        }
    }
}

//! Color resolution for decoded geometry
//!
//! Order: explicit stream RGBA, then the static per-type table, then a fixed
//! fallback. Whole-object coloring suppresses every stream color.

use crate::core::types::Rgba;

/// Used when neither the stream nor the type table has a color
pub const FALLBACK_COLOR: Rgba = [0.8, 0.8, 0.8, 1.0];

/// Default colors for common IFC product types
static TYPE_COLORS: &[(&str, Rgba)] = &[
    ("IfcWall", [0.85, 0.85, 0.85, 1.0]),
    ("IfcWallStandardCase", [0.85, 0.85, 0.85, 1.0]),
    ("IfcSlab", [0.7, 0.7, 0.7, 1.0]),
    ("IfcRoof", [0.6, 0.5, 0.4, 1.0]),
    ("IfcColumn", [0.6, 0.65, 0.7, 1.0]),
    ("IfcBeam", [0.6, 0.65, 0.7, 1.0]),
    ("IfcMember", [0.6, 0.65, 0.7, 1.0]),
    ("IfcWindow", [0.6, 0.8, 1.0, 0.4]),
    ("IfcDoor", [0.6, 0.45, 0.3, 1.0]),
    ("IfcStair", [0.75, 0.75, 0.75, 1.0]),
    ("IfcStairFlight", [0.75, 0.75, 0.75, 1.0]),
    ("IfcRailing", [0.4, 0.4, 0.45, 1.0]),
    ("IfcPlate", [0.8, 0.8, 0.8, 1.0]),
    ("IfcCovering", [0.8, 0.8, 0.8, 1.0]),
    ("IfcCurtainWall", [0.5, 0.7, 0.9, 0.5]),
    ("IfcFurnishingElement", [0.7, 0.55, 0.4, 1.0]),
    ("IfcSpace", [0.2, 0.85, 1.0, 0.3]),
    ("IfcOpeningElement", [1.0, 0.42, 0.29, 0.4]),
    ("IfcSite", [0.55, 0.7, 0.45, 1.0]),
    ("IfcFlowSegment", [0.45, 0.6, 0.75, 1.0]),
    ("IfcFlowTerminal", [0.45, 0.6, 0.75, 1.0]),
];

/// Look up the table color for a type name
pub fn type_color(type_name: &str) -> Option<Rgba> {
    TYPE_COLORS
        .iter()
        .find(|(name, _)| *name == type_name)
        .map(|(_, color)| *color)
}

/// How geometry color is chosen
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum ColorPolicy {
    /// Stream color, type table, fallback
    #[default]
    Stream,
    /// Every object drawn in one color; stream colors are ignored entirely
    WholeObject(Rgba),
}

impl ColorPolicy {
    /// Uniform color for a geometry
    pub fn resolve(&self, stream_color: Option<Rgba>, type_name: &str) -> Rgba {
        match self {
            ColorPolicy::WholeObject(color) => *color,
            ColorPolicy::Stream => stream_color
                .or_else(|| type_color(type_name))
                .unwrap_or(FALLBACK_COLOR),
        }
    }

    /// Whether per-vertex stream colors may be used
    pub fn allows_vertex_colors(&self) -> bool {
        matches!(self, ColorPolicy::Stream)
    }
}

//! Mathematical utilities and data structures

pub mod aabb;
pub mod quantization;

pub use aabb::Aabb;
pub use quantization::{FrameScope, QuantizationFrame, QuantizationFrames};

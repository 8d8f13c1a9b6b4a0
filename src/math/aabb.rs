//! Axis-aligned bounding box in model (double precision) coordinates

use crate::core::types::{DVec3, Mat4};

/// Axis-aligned bounding box defined by min and max corners
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    /// Create AABB from min and max corners
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// Create AABB from the wire layout `[min_x, min_y, min_z, max_x, max_y, max_z]`
    pub fn from_array(v: [f64; 6]) -> Self {
        Self {
            min: DVec3::new(v[0], v[1], v[2]),
            max: DVec3::new(v[3], v[4], v[5]),
        }
    }

    /// Create AABB from origin corner and size
    pub fn from_origin_size(origin: DVec3, size: DVec3) -> Self {
        Self { min: origin, max: origin + size }
    }

    /// Get center point
    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    /// Get size (max - min)
    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    /// Radius of the bounding sphere around the box
    pub fn radius(&self) -> f64 {
        self.size().length() * 0.5
    }

    /// True if every component is finite and min <= max on each axis
    pub fn is_valid(&self) -> bool {
        self.min.is_finite()
            && self.max.is_finite()
            && self.min.x <= self.max.x
            && self.min.y <= self.max.y
            && self.min.z <= self.max.z
    }

    /// Check if point is inside AABB
    pub fn contains_point(&self, p: DVec3) -> bool {
        p.x >= self.min.x && p.x <= self.max.x &&
        p.y >= self.min.y && p.y <= self.max.y &&
        p.z >= self.min.z && p.z <= self.max.z
    }

    /// Check if two AABBs intersect
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x && self.max.x >= other.min.x &&
        self.min.y <= other.max.y && self.max.y >= other.min.y &&
        self.min.z <= other.max.z && self.max.z >= other.min.z
    }

    /// Get child octant AABB for octree subdivision
    /// index: 0-7 representing xyz octant (bit 0=x, bit 1=y, bit 2=z)
    pub fn child_octant(&self, index: u8) -> Aabb {
        let half = self.size() * 0.5;
        let origin = DVec3::new(
            if index & 1 != 0 { self.min.x + half.x } else { self.min.x },
            if index & 2 != 0 { self.min.y + half.y } else { self.min.y },
            if index & 4 != 0 { self.min.z + half.z } else { self.min.z },
        );
        Aabb::from_origin_size(origin, half)
    }

    /// Single-precision matrix mapping the unit cube `[0,1]^3` onto this box.
    /// Used to draw tile outlines.
    pub fn unit_cube_transform(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(
            self.size().as_vec3(),
            glam::Quat::IDENTITY,
            self.min.as_vec3(),
        )
    }

    /// Smallest box containing both
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb::new(self.min.min(other.min), self.max.max(other.max))
    }

    /// Wire layout `[min_x, min_y, min_z, max_x, max_y, max_z]`
    pub fn to_array(&self) -> [f64; 6] {
        [self.min.x, self.min.y, self.min.z, self.max.x, self.max.y, self.max.z]
    }
}

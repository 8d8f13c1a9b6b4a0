//! Session-owned geometry and object records
//!
//! A geometry's draw mode is decided once, on its first accumulation:
//! instanced iff `reuse_count > 1` and its id is in the reuse set. The
//! counter state then advances `Pending { seen, total }` until every
//! reference has been seen, at which point it is materialized and evicted.

use std::collections::HashSet;

use crate::core::types::{BufferId, GeometryId, Mat4, ObjectId, RevisionId};
use crate::protocol::{GeometryPayload, ObjectData};

/// How a geometry is drawn
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeometryMode {
    /// Vertices transformed per object and packed into shared buffer sets
    Duplicated,
    /// One GPU-resident copy plus per-instance matrices
    Instanced,
}

/// Two-phase reuse counter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReuseState {
    Pending { seen: u32, total: u32 },
    /// All references seen. `buffer` is `None` when nothing visible was
    /// produced (every referencing object hidden, or duplicated mode).
    Materialized { buffer: Option<BufferId> },
}

/// A decoded geometry plus its assembly state
#[derive(Clone, Debug)]
pub struct GeometryRecord {
    pub payload: GeometryPayload,
    mode: Option<GeometryMode>,
    state: ReuseState,
    /// Byte footprint in the destination vertex layout
    pub byte_size: usize,
    /// Accumulated transforms, in arrival order, for instanced geometry
    pub instance_matrices: Vec<Mat4>,
}

impl GeometryRecord {
    pub fn new(payload: GeometryPayload, byte_size: usize) -> Self {
        let total = payload.reuse_count.max(1);
        Self {
            payload,
            mode: None,
            state: ReuseState::Pending { seen: 0, total },
            byte_size,
            instance_matrices: Vec::new(),
        }
    }

    pub fn id(&self) -> GeometryId {
        self.payload.geometry_id
    }

    pub fn owner_revision_id(&self) -> RevisionId {
        self.payload.owner_revision_id
    }

    pub fn reuse_count(&self) -> u32 {
        self.payload.reuse_count.max(1)
    }

    /// References accounted for so far
    pub fn materialized_reuse_count(&self) -> u32 {
        match self.state {
            ReuseState::Pending { seen, .. } => seen,
            ReuseState::Materialized { .. } => self.reuse_count(),
        }
    }

    pub fn state(&self) -> ReuseState {
        self.state
    }

    pub fn mode(&self) -> Option<GeometryMode> {
        self.mode
    }

    /// Decide the draw mode on first call; later calls return the same mode
    pub fn decide_mode(&mut self, reuse_set: &HashSet<GeometryId>) -> GeometryMode {
        *self.mode.get_or_insert_with(|| {
            if self.payload.reuse_count > 1 && reuse_set.contains(&self.payload.geometry_id) {
                GeometryMode::Instanced
            } else {
                GeometryMode::Duplicated
            }
        })
    }

    /// Count one reference. Returns true when this was the last one.
    pub fn record_reference(&mut self) -> bool {
        match &mut self.state {
            ReuseState::Pending { seen, total } => {
                *seen += 1;
                *seen >= *total
            }
            ReuseState::Materialized { .. } => {
                log::warn!(
                    "geometry {} referenced after materialization ({} declared)",
                    self.payload.geometry_id,
                    self.reuse_count()
                );
                true
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        match self.state {
            ReuseState::Pending { seen, total } => seen >= total,
            ReuseState::Materialized { .. } => true,
        }
    }

    pub fn mark_materialized(&mut self, buffer: Option<BufferId>) {
        self.state = ReuseState::Materialized { buffer };
    }
}

/// A decoded object and the geometries attached to it
#[derive(Clone, Debug)]
pub struct ObjectRecord {
    pub id: ObjectId,
    pub owner_revision_id: RevisionId,
    pub type_name: String,
    pub visible: bool,
    /// Object-to-model transform (single precision, unit-scale corrected)
    pub transform: Mat4,
    pub scale_corrected: bool,
    pub has_transparency: bool,
    pub geometry_info_id: u64,
    geometry_ids: Vec<GeometryId>,
}

impl ObjectRecord {
    pub fn from_data(data: &ObjectData, visible: bool, scale_corrected: bool) -> Self {
        Self {
            id: data.oid,
            owner_revision_id: data.owner_revision_id,
            type_name: data.type_name.clone(),
            visible,
            transform: data.matrix.as_mat4(),
            scale_corrected,
            has_transparency: data.has_transparency,
            geometry_info_id: data.geometry_info_id,
            geometry_ids: Vec::new(),
        }
    }

    /// Geometries attached so far, in attach order
    pub fn geometry_ids(&self) -> &[GeometryId] {
        &self.geometry_ids
    }

    /// Append-only until the session closes
    pub fn push_geometry(&mut self, id: GeometryId) {
        self.geometry_ids.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::writer::quad_geometry;

    #[test]
    fn test_mode_requires_both_reuse_and_membership() {
        let reuse: HashSet<GeometryId> = [1, 2].into_iter().collect();

        let mut shared = GeometryRecord::new(quad_geometry(1, 1, "IfcWall", 3, false), 0);
        assert_eq!(shared.decide_mode(&reuse), GeometryMode::Instanced);

        let mut single = GeometryRecord::new(quad_geometry(2, 1, "IfcWall", 1, false), 0);
        assert_eq!(single.decide_mode(&reuse), GeometryMode::Duplicated);

        let mut not_member = GeometryRecord::new(quad_geometry(3, 1, "IfcWall", 5, false), 0);
        assert_eq!(not_member.decide_mode(&reuse), GeometryMode::Duplicated);
    }

    #[test]
    fn test_mode_decided_once() {
        let mut reuse: HashSet<GeometryId> = [1].into_iter().collect();
        let mut g = GeometryRecord::new(quad_geometry(1, 1, "IfcWall", 2, false), 0);
        assert_eq!(g.decide_mode(&reuse), GeometryMode::Instanced);
        reuse.clear();
        assert_eq!(g.decide_mode(&reuse), GeometryMode::Instanced);
    }

    #[test]
    fn test_reference_counting() {
        let mut g = GeometryRecord::new(quad_geometry(1, 1, "IfcWall", 3, false), 0);
        assert!(!g.record_reference());
        assert!(!g.record_reference());
        assert_eq!(g.materialized_reuse_count(), 2);
        assert!(g.record_reference());
        assert!(g.is_complete());
        g.mark_materialized(None);
        assert_eq!(g.materialized_reuse_count(), g.reuse_count());
        assert_eq!(g.state(), ReuseState::Materialized { buffer: None });
    }
}

//! Eager octree over the model bounds
//!
//! Every node down to the configured depth is created up front and stored in
//! an arena. Ids are assigned breadth-first, so node `i` lines up with entry
//! `i` of a per-tile count array, and the eight children of a node are
//! contiguous.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::core::error::Error;
use crate::core::types::{BufferId, DVec3, Mat4, Result};
use crate::math::Aabb;

/// Index of a node in the arena
pub type TileId = u32;

/// Load state of a tile
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TileStatus {
    Unqueried,
    Queued,
    Loading,
    Loaded,
    Empty,
}

/// A single octree node
#[derive(Clone, Debug)]
pub struct TileNode {
    pub id: TileId,
    pub level: u8,
    pub bounds: Aabb,
    pub center: DVec3,
    /// Radius of the bounding sphere
    pub radius: f64,
    /// Unit cube to node box, for outline rendering
    pub debug_transform: Mat4,
    pub parent: Option<TileId>,
    /// First of eight contiguous child ids; `None` for leaves
    pub first_child: Option<TileId>,
    population: Option<u32>,
    pub status: TileStatus,
    pub buffers: Vec<BufferId>,
}

impl TileNode {
    fn new(id: TileId, level: u8, bounds: Aabb, parent: Option<TileId>) -> Self {
        Self {
            id,
            level,
            bounds,
            center: bounds.center(),
            radius: bounds.radius(),
            debug_transform: bounds.unit_cube_transform(),
            parent,
            first_child: None,
            population: None,
            status: TileStatus::Unqueried,
            buffers: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.first_child.is_none()
    }

    pub fn children(&self) -> Option<std::ops::Range<TileId>> {
        self.first_child.map(|first| first..first + 8)
    }

    /// Object count reported for this tile, once applied
    pub fn population(&self) -> Option<u32> {
        self.population
    }
}

/// Arena-backed octree
#[derive(Debug)]
pub struct TileIndex {
    nodes: Vec<TileNode>,
    depth: u8,
    lists: HashMap<&'static str, Arc<[TileId]>>,
}

/// Index shared between the scheduler and its tile tasks
pub type SharedTileIndex = Arc<RwLock<TileIndex>>;

impl TileIndex {
    /// Total node count of a full octree of `depth` levels below the root
    pub fn node_count(depth: u8) -> usize {
        (0..=depth as u32).map(|level| 8usize.pow(level)).sum()
    }

    /// Build every node down to `depth`
    pub fn new(bounds: Aabb, depth: u8) -> Self {
        let mut nodes = Vec::with_capacity(Self::node_count(depth));
        nodes.push(TileNode::new(0, 0, bounds, None));

        let mut level_start = 0usize;
        for level in 0..depth {
            let level_end = nodes.len();
            for parent in level_start..level_end {
                let first = nodes.len() as TileId;
                let parent_bounds = nodes[parent].bounds;
                nodes[parent].first_child = Some(first);
                for octant in 0..8u8 {
                    let id = nodes.len() as TileId;
                    nodes.push(TileNode::new(
                        id,
                        level + 1,
                        parent_bounds.child_octant(octant),
                        Some(parent as TileId),
                    ));
                }
            }
            level_start = level_end;
        }

        log::debug!("tile index: depth {}, {} nodes", depth, nodes.len());
        Self {
            nodes,
            depth,
            lists: HashMap::new(),
        }
    }

    pub fn shared(self) -> SharedTileIndex {
        Arc::new(RwLock::new(self))
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> &TileNode {
        &self.nodes[0]
    }

    pub fn node(&self, id: TileId) -> Option<&TileNode> {
        self.nodes.get(id as usize)
    }

    pub fn nodes(&self) -> &[TileNode] {
        &self.nodes
    }

    /// Apply per-tile counts in breadth-first order. Tiles with a zero count
    /// become `Empty`. Counts can only be applied once.
    pub fn apply_population(&mut self, counts: &[u32]) -> Result<()> {
        if counts.len() != self.nodes.len() {
            return Err(Error::TileIndex(format!(
                "{} counts for {} tiles",
                counts.len(),
                self.nodes.len()
            )));
        }
        if self.nodes.iter().any(|n| n.population.is_some()) {
            return Err(Error::TileIndex("population already applied".into()));
        }
        for (node, &count) in self.nodes.iter_mut().zip(counts) {
            node.population = Some(count);
            if count == 0 {
                node.status = TileStatus::Empty;
            }
        }
        Ok(())
    }

    /// Mark every tile empty without counts (count query failed)
    pub fn mark_all_empty(&mut self) {
        for node in &mut self.nodes {
            node.status = TileStatus::Empty;
        }
    }

    pub fn set_status(&mut self, id: TileId, status: TileStatus) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id as usize)
            .ok_or_else(|| Error::TileIndex(format!("no tile {}", id)))?;
        node.status = status;
        Ok(())
    }

    pub fn attach_buffers(&mut self, id: TileId, buffers: &[BufferId]) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id as usize)
            .ok_or_else(|| Error::TileIndex(format!("no tile {}", id)))?;
        node.buffers.extend_from_slice(buffers);
        Ok(())
    }

    pub fn count_status(&self, status: TileStatus) -> usize {
        self.nodes.iter().filter(|n| n.status == status).count()
    }

    /// Depth-first pre-order traversal
    pub fn depth_first(&self, leaves_only: bool) -> Vec<TileId> {
        let mut order = Vec::new();
        let mut stack = vec![0 as TileId];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id as usize];
            match node.children() {
                Some(children) => {
                    if !leaves_only {
                        order.push(id);
                    }
                    stack.extend(children.rev());
                }
                None => order.push(id),
            }
        }
        order
    }

    /// Breadth-first traversal, level by level
    pub fn breadth_first(&self) -> impl Iterator<Item = &TileNode> {
        self.nodes.iter()
    }

    /// Evaluate `predicate` once over the breadth-first order and cache the
    /// matching ids under `name`
    pub fn cache_list<P>(&mut self, name: &'static str, predicate: P) -> Arc<[TileId]>
    where
        P: Fn(&TileNode) -> bool,
    {
        let ids: Arc<[TileId]> = self
            .nodes
            .iter()
            .filter(|n| predicate(n))
            .map(|n| n.id)
            .collect();
        self.lists.insert(name, ids.clone());
        ids
    }

    /// A list previously built with [`TileIndex::cache_list`]
    pub fn list(&self, name: &str) -> Option<Arc<[TileId]>> {
        self.lists.get(name).cloned()
    }
}

/// Read access that survives a panicked writer
pub fn read_index(index: &SharedTileIndex) -> RwLockReadGuard<'_, TileIndex> {
    index.read().unwrap_or_else(|e| e.into_inner())
}

pub fn write_index(index: &SharedTileIndex) -> RwLockWriteGuard<'_, TileIndex> {
    index.write().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(depth: u8) -> TileIndex {
        TileIndex::new(Aabb::new(DVec3::ZERO, DVec3::splat(8.0)), depth)
    }

    #[test]
    fn test_eager_construction() {
        assert_eq!(TileIndex::node_count(0), 1);
        assert_eq!(TileIndex::node_count(2), 73);
        let index = index(2);
        assert_eq!(index.len(), 73);
        assert_eq!(index.nodes().iter().filter(|n| n.is_leaf()).count(), 64);
        assert!(index.nodes().iter().all(|n| n.status == TileStatus::Unqueried));
    }

    #[test]
    fn test_breadth_first_ids() {
        let index = index(2);
        let levels: Vec<u8> = index.breadth_first().map(|n| n.level).collect();
        assert!(levels.windows(2).all(|w| w[0] <= w[1]));
        for (i, node) in index.breadth_first().enumerate() {
            assert_eq!(node.id as usize, i);
        }
        assert_eq!(index.root().children(), Some(1..9));
        assert_eq!(index.node(1).unwrap().children(), Some(9..17));
        assert_eq!(index.node(9).unwrap().parent, Some(1));
    }

    #[test]
    fn test_children_partition_parent() {
        let index = index(1);
        let root = index.root();
        for id in root.children().unwrap() {
            let child = index.node(id).unwrap();
            assert_eq!(child.bounds.size(), DVec3::splat(4.0));
            assert!(root.bounds.contains_point(child.center));
        }
        assert_eq!(index.node(8).unwrap().bounds.min, DVec3::splat(4.0));
        assert!((root.radius - DVec3::splat(8.0).length() * 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_depth_first_preorder() {
        let index = index(2);
        let order = index.depth_first(false);
        assert_eq!(order.len(), 73);
        assert_eq!(&order[..4], &[0, 1, 9, 10]);
        // subtree of node 1 is visited before node 2
        let pos_2 = order.iter().position(|&id| id == 2).unwrap();
        assert_eq!(pos_2, 1 + 1 + 8);

        let leaves = index.depth_first(true);
        assert_eq!(leaves.len(), 64);
        assert_eq!(&leaves[..2], &[9, 10]);
    }

    #[test]
    fn test_population_applied_once() {
        let mut index = index(1);
        let mut counts = vec![0u32; 9];
        counts[0] = 5;
        counts[3] = 2;
        index.apply_population(&counts).unwrap();
        assert_eq!(index.count_status(TileStatus::Empty), 7);
        assert_eq!(index.node(3).unwrap().population(), Some(2));

        assert!(matches!(index.apply_population(&counts), Err(Error::TileIndex(_))));
        assert!(matches!(index.apply_population(&[1, 2]), Err(Error::TileIndex(_))));
    }

    #[test]
    fn test_cached_filtered_list() {
        let mut index = index(1);
        let list = index.cache_list("odd", |n| n.id % 2 == 1);
        assert_eq!(&list[..], &[1, 3, 5, 7]);
        // later mutation does not re-evaluate
        index.set_status(2, TileStatus::Loaded).unwrap();
        assert_eq!(&index.list("odd").unwrap()[..], &[1, 3, 5, 7]);
        assert!(index.list("missing").is_none());
    }

    #[test]
    fn test_shared_access() {
        let shared = index(1).shared();
        write_index(&shared).attach_buffers(4, &[BufferId(11)]).unwrap();
        assert_eq!(read_index(&shared).node(4).unwrap().buffers, vec![BufferId(11)]);
        assert!(write_index(&shared).set_status(99, TileStatus::Loaded).is_err());
    }
}

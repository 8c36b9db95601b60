use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::iter::FusedIterator;

use blockray_common::{Aabb, CellCoord, EntityHandle, Ray};
use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Shape of the indexed world: a cube of side `2^depth` cells whose lowest
/// corner is `min`. Leaves are single cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub min: [i32; 3],
    pub depth: u32,
    /// Maximum number of handles sharing one cell.
    pub leaf_capacity: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            min: [-(1 << 25); 3],
            depth: 26,
            leaf_capacity: 256,
        }
    }
}

impl IndexConfig {
    pub fn side(&self) -> i64 {
        1_i64 << self.depth
    }

    pub fn validate(&self) -> Result<(), IndexError> {
        if self.depth == 0 || self.depth > 31 {
            return Err(IndexError::InvalidConfig(format!(
                "depth must be in 1..=31, got {}",
                self.depth
            )));
        }
        if self.leaf_capacity == 0 {
            return Err(IndexError::InvalidConfig("leaf_capacity must be positive".into()));
        }
        for axis in self.min {
            if axis as i64 + self.side() - 1 > i32::MAX as i64 {
                return Err(IndexError::InvalidConfig(format!(
                    "extent starting at {axis} with depth {} overflows i32",
                    self.depth
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndexError {
    #[error("cell {0:?} is outside the indexed extent")]
    OutOfBounds(CellCoord),
    #[error("cell {cell:?} already holds {capacity} entities")]
    CellFull { cell: CellCoord, capacity: usize },
    #[error("invalid index config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug)]
struct Node {
    origin: [i64; 3],
    size: i64,
    kind: NodeKind,
}

#[derive(Debug)]
enum NodeKind {
    Leaf(Vec<EntityHandle>),
    Internal([Option<Box<Node>>; 8]),
}

impl Node {
    fn new(origin: [i64; 3], size: i64) -> Self {
        let kind = if size == 1 {
            NodeKind::Leaf(Vec::new())
        } else {
            NodeKind::Internal(Default::default())
        };
        Self { origin, size, kind }
    }

    fn aabb(&self) -> Aabb {
        let min = DVec3::new(
            self.origin[0] as f64,
            self.origin[1] as f64,
            self.origin[2] as f64,
        );
        Aabb::new(min, min + DVec3::splat(self.size as f64))
    }

    /// Octant of `cell` inside this node and that octant's origin.
    fn octant(&self, cell: [i64; 3]) -> (usize, [i64; 3]) {
        let half = self.size / 2;
        let mut index = 0;
        let mut origin = self.origin;
        for axis in 0..3 {
            if cell[axis] >= self.origin[axis] + half {
                index |= 1 << axis;
                origin[axis] += half;
            }
        }
        (index, origin)
    }

    fn is_empty(&self) -> bool {
        match &self.kind {
            NodeKind::Leaf(bucket) => bucket.is_empty(),
            NodeKind::Internal(children) => children.iter().all(Option::is_none),
        }
    }

    fn insert(&mut self, cell: [i64; 3], handle: EntityHandle, created: &mut usize) {
        let (octant, child_origin) = self.octant(cell);
        let half = self.size / 2;
        match &mut self.kind {
            NodeKind::Leaf(bucket) => bucket.push(handle),
            NodeKind::Internal(children) => {
                let child = children[octant].get_or_insert_with(|| {
                    *created += 1;
                    Box::new(Node::new(child_origin, half))
                });
                child.insert(cell, handle, created);
            }
        }
    }

    /// Remove `handle` from the leaf at `cell`, pruning emptied children.
    fn remove(&mut self, cell: [i64; 3], handle: EntityHandle, pruned: &mut usize) -> bool {
        let (octant, _) = self.octant(cell);
        match &mut self.kind {
            NodeKind::Leaf(bucket) => match bucket.iter().position(|h| *h == handle) {
                Some(i) => {
                    bucket.remove(i);
                    true
                }
                None => false,
            },
            NodeKind::Internal(children) => {
                let Some(child) = children[octant].as_mut() else {
                    return false;
                };
                let found = child.remove(cell, handle, pruned);
                if found && child.is_empty() {
                    children[octant] = None;
                    *pruned += 1;
                }
                found
            }
        }
    }

    fn bucket(&self, cell: [i64; 3]) -> Option<&[EntityHandle]> {
        let mut node = self;
        loop {
            match &node.kind {
                NodeKind::Leaf(bucket) => return Some(bucket.as_slice()),
                NodeKind::Internal(children) => {
                    let (octant, _) = node.octant(cell);
                    node = children[octant].as_deref()?;
                }
            }
        }
    }
}

/// Depth-bounded octree of entity handles keyed by integer cell.
///
/// Nodes are created on first insert into an empty subtree and pruned as soon
/// as a subtree empties. A handle lives in at most one leaf; `locations`
/// remembers which.
#[derive(Debug)]
pub struct SpatialIndex {
    config: IndexConfig,
    root: Option<Box<Node>>,
    locations: HashMap<EntityHandle, CellCoord>,
    nodes: usize,
}

impl SpatialIndex {
    pub fn new(config: IndexConfig) -> Result<Self, IndexError> {
        config.validate()?;
        Ok(Self {
            config,
            root: None,
            locations: HashMap::new(),
            nodes: 0,
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// World-space box covered by the tree.
    pub fn extent(&self) -> Aabb {
        let min = DVec3::new(
            self.config.min[0] as f64,
            self.config.min[1] as f64,
            self.config.min[2] as f64,
        );
        Aabb::new(min, min + DVec3::splat(self.config.side() as f64))
    }

    pub fn in_extent(&self, coord: CellCoord) -> bool {
        let side = self.config.side();
        widen(coord)
            .iter()
            .zip(self.config.min)
            .all(|(c, min)| *c >= min as i64 && *c < min as i64 + side)
    }

    /// Number of indexed handles.
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Number of allocated tree nodes, root included.
    pub fn node_count(&self) -> usize {
        self.nodes
    }

    pub fn contains(&self, handle: EntityHandle) -> bool {
        self.locations.contains_key(&handle)
    }

    /// Cell under which `handle` was last inserted.
    pub fn location(&self, handle: EntityHandle) -> Option<CellCoord> {
        self.locations.get(&handle).copied()
    }

    /// All indexed handles with their cells, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityHandle, CellCoord)> + '_ {
        self.locations.iter().map(|(h, c)| (*h, *c))
    }

    /// Handles stored in the leaf at `coord`.
    pub fn handles_at(&self, coord: CellCoord) -> &[EntityHandle] {
        if !self.in_extent(coord) {
            return &[];
        }
        self.root
            .as_deref()
            .and_then(|root| root.bucket(widen(coord)))
            .unwrap_or(&[])
    }

    /// Add `handle` to the leaf at `coord`.
    ///
    /// A handle already indexed elsewhere is moved; one already at `coord`
    /// is left alone. Out-of-extent and full cells are reported and leave
    /// the index unchanged.
    pub fn insert(&mut self, coord: CellCoord, handle: EntityHandle) -> Result<(), IndexError> {
        if !self.in_extent(coord) {
            return Err(IndexError::OutOfBounds(coord));
        }
        let previous = self.location(handle);
        if previous == Some(coord) {
            return Ok(());
        }
        let capacity = self.config.leaf_capacity;
        if self.handles_at(coord).len() >= capacity {
            return Err(IndexError::CellFull {
                cell: coord,
                capacity,
            });
        }
        if let Some(old) = previous {
            self.remove(old, handle);
        }

        let side = self.config.side();
        let min = self.config.min.map(i64::from);
        let mut created = 0;
        let root = self.root.get_or_insert_with(|| {
            created += 1;
            Box::new(Node::new(min, side))
        });
        root.insert(widen(coord), handle, &mut created);
        self.nodes += created;
        self.locations.insert(handle, coord);
        Ok(())
    }

    /// Remove `handle` from the leaf at `coord`. Returns `false`, changing
    /// nothing, when the handle is not stored at `coord`.
    pub fn remove(&mut self, coord: CellCoord, handle: EntityHandle) -> bool {
        if self.location(handle) != Some(coord) {
            return false;
        }
        let Some(root) = self.root.as_mut() else {
            return false;
        };
        let mut pruned = 0;
        let found = root.remove(widen(coord), handle, &mut pruned);
        if found {
            if root.is_empty() {
                self.root = None;
                pruned += 1;
            }
            self.nodes -= pruned;
            self.locations.remove(&handle);
        }
        found
    }

    /// Drop every handle and node.
    pub fn clear(&mut self) {
        self.root = None;
        self.locations.clear();
        self.nodes = 0;
    }

    /// Handles whose cell the ray segment `[0, max_range]` passes through,
    /// nearest first, paired with the distance at which the ray enters the
    /// cell. `direction` need not be normalized; a zero direction yields
    /// nothing.
    pub fn query_along_ray(&self, origin: DVec3, direction: DVec3, max_range: f64) -> RayHits<'_> {
        match Ray::new(origin, direction) {
            Some(ray) => self.query_ray(&ray, max_range),
            None => RayHits::empty(Ray {
                origin,
                direction: DVec3::X,
            }),
        }
    }

    /// Like [`query_along_ray`](Self::query_along_ray) for an already
    /// normalized ray.
    pub fn query_ray(&self, ray: &Ray, max_range: f64) -> RayHits<'_> {
        let mut hits = RayHits::empty(*ray);
        hits.max_range = max_range;
        if let Some(root) = self.root.as_deref() {
            if let Some(t) = root.aabb().ray_entry(ray, max_range) {
                hits.push(t, Pending::Node(root));
            }
        }
        hits
    }
}

fn widen(c: CellCoord) -> [i64; 3] {
    [c.x as i64, c.y as i64, c.z as i64]
}

#[derive(Debug)]
enum Pending<'a> {
    Node(&'a Node),
    Hit(EntityHandle),
}

#[derive(Debug)]
struct Queued<'a> {
    distance: f64,
    seq: u64,
    item: Pending<'a>,
}

impl PartialEq for Queued<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued<'_> {}

impl PartialOrd for Queued<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Lazy best-first walk of the octree along a ray.
///
/// Subtrees are expanded only when they are the nearest pending item, so
/// taking the first few hits touches only the front of the ray. Children
/// whose box the segment misses are never queued.
#[derive(Debug)]
pub struct RayHits<'a> {
    ray: Ray,
    max_range: f64,
    heap: BinaryHeap<Reverse<Queued<'a>>>,
    seq: u64,
}

impl<'a> RayHits<'a> {
    fn empty(ray: Ray) -> Self {
        Self {
            ray,
            max_range: 0.0,
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    fn push(&mut self, distance: f64, item: Pending<'a>) {
        self.seq += 1;
        self.heap.push(Reverse(Queued {
            distance,
            seq: self.seq,
            item,
        }));
    }

    fn expand(&mut self, node: &'a Node, distance: f64) {
        match &node.kind {
            NodeKind::Leaf(bucket) => {
                for handle in bucket {
                    self.push(distance, Pending::Hit(*handle));
                }
            }
            NodeKind::Internal(children) => {
                for child in children.iter().flatten() {
                    if let Some(t) = child.aabb().ray_entry(&self.ray, self.max_range) {
                        self.push(t, Pending::Node(child));
                    }
                }
            }
        }
    }
}

impl Iterator for RayHits<'_> {
    type Item = (f64, EntityHandle);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(Reverse(queued)) = self.heap.pop() {
            match queued.item {
                Pending::Hit(handle) => return Some((queued.distance, handle)),
                Pending::Node(node) => self.expand(node, queued.distance),
            }
        }
        None
    }
}

impl FusedIterator for RayHits<'_> {}

use std::collections::BTreeMap;

use blockray_common::{Aabb, CellCoord, EntityHandle, Ray};
use glam::DVec3;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::host::{
    BlockHit, BlockHitKind, CollisionError, CollisionWorld, EntityKind, EntityLookup,
    EntitySnapshot, ShipId,
};

/// A lifecycle record produced by every entity mutation, in tick order.
///
/// These are the notifications a host sends to position sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorldEvent {
    Spawned {
        handle: EntityHandle,
        cell: CellCoord,
    },
    Moved {
        handle: EntityHandle,
        old: CellCoord,
        new: CellCoord,
    },
    Removed {
        handle: EntityHandle,
        cell: CellCoord,
    },
    /// Simulation advanced one tick.
    Stepped { tick: u64 },
}

/// Per-entity data stored in the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityData {
    pub kind: EntityKind,
    pub position: DVec3,
    pub health: f32,
    pub max_health: f32,
    pub armor: f32,
}

impl EntityData {
    pub fn cell(&self) -> CellCoord {
        CellCoord::from_position(self.position)
    }
}

/// A rigid body with its own block grid, translated by `offset`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ship {
    pub offset: DVec3,
    blocks: BTreeMap<CellCoord, String>,
}

impl Ship {
    /// World-space bounding box of the ship's blocks.
    pub fn bounds(&self) -> Option<Aabb> {
        let mut cells = self.blocks.keys();
        let first = Aabb::from_cell(*cells.next()?);
        let local = cells.fold(first, |acc, c| acc.union(&Aabb::from_cell(*c)));
        Some(Aabb::new(local.min + self.offset, local.max + self.offset))
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

/// In-memory reference host.
///
/// Holds static blocks, ships and entities, and keeps an append-only log of
/// entity lifecycle events. BTreeMaps keep iteration deterministic.
#[derive(Debug, Clone, Default)]
pub struct World {
    entities: BTreeMap<EntityHandle, EntityData>,
    blocks: BTreeMap<CellCoord, String>,
    ships: BTreeMap<ShipId, Ship>,
    next_ship: u64,
    tick: u64,
    event_log: Vec<WorldEvent>,
    collision_fault: Option<String>,
}

impl World {
    /// Create an empty world at tick 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap in a lock so the world can be shared with worker threads.
    pub fn into_shared(self) -> std::sync::Arc<RwLock<World>> {
        std::sync::Arc::new(RwLock::new(self))
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Drain and return the event log.
    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.event_log)
    }

    /// Read-only access to the event log.
    pub fn events(&self) -> &[WorldEvent] {
        &self.event_log
    }

    pub fn entities(&self) -> &BTreeMap<EntityHandle, EntityData> {
        &self.entities
    }

    /// Every entity with the cell it currently occupies.
    pub fn entity_cells(&self) -> impl Iterator<Item = (EntityHandle, CellCoord)> + '_ {
        self.entities.iter().map(|(h, d)| (*h, d.cell()))
    }

    pub fn get(&self, handle: EntityHandle) -> Option<&EntityData> {
        self.entities.get(&handle)
    }

    /// Advance the simulation by one tick.
    pub fn step(&mut self) {
        self.tick += 1;
        self.event_log.push(WorldEvent::Stepped { tick: self.tick });
    }

    /// Spawn a generic entity at full health.
    pub fn spawn_entity(
        &mut self,
        category: impl Into<String>,
        display_name: impl Into<String>,
        position: DVec3,
    ) -> EntityHandle {
        let kind = EntityKind::Generic {
            category: category.into(),
            display_name: display_name.into(),
        };
        self.spawn_with_kind(kind, position, 20.0)
    }

    pub fn spawn_player(&mut self, name: impl Into<String>, position: DVec3) -> EntityHandle {
        self.spawn_with_kind(EntityKind::Player { name: name.into() }, position, 20.0)
    }

    fn spawn_with_kind(&mut self, kind: EntityKind, position: DVec3, max_health: f32) -> EntityHandle {
        let handle = EntityHandle::new();
        self.spawn_with_handle(
            handle,
            EntityData {
                kind,
                position,
                health: max_health,
                max_health,
                armor: 0.0,
            },
        );
        handle
    }

    /// Spawn with a caller-chosen handle.
    pub fn spawn_with_handle(&mut self, handle: EntityHandle, data: EntityData) {
        let cell = data.cell();
        self.entities.insert(handle, data);
        self.event_log.push(WorldEvent::Spawned { handle, cell });
    }

    /// Remove an entity. Returns the data if it existed.
    pub fn despawn(&mut self, handle: EntityHandle) -> Option<EntityData> {
        let data = self.entities.remove(&handle)?;
        self.event_log.push(WorldEvent::Removed {
            handle,
            cell: data.cell(),
        });
        Some(data)
    }

    /// Move an entity. A `Moved` event is logged only when the cell changes.
    pub fn move_entity(&mut self, handle: EntityHandle, position: DVec3) -> bool {
        let Some(data) = self.entities.get_mut(&handle) else {
            tracing::trace!(%handle, "move for unknown entity ignored");
            return false;
        };
        let old = data.cell();
        data.position = position;
        let new = data.cell();
        if old != new {
            self.event_log.push(WorldEvent::Moved { handle, old, new });
        }
        true
    }

    pub fn set_health(&mut self, handle: EntityHandle, health: f32, armor: f32) -> bool {
        match self.entities.get_mut(&handle) {
            Some(data) => {
                data.health = health.clamp(0.0, data.max_health);
                data.armor = armor;
                true
            }
            None => false,
        }
    }

    pub fn set_block(&mut self, cell: CellCoord, namespace: impl Into<String>) {
        self.blocks.insert(cell, namespace.into());
    }

    pub fn clear_block(&mut self, cell: CellCoord) -> Option<String> {
        self.blocks.remove(&cell)
    }

    pub fn block(&self, cell: CellCoord) -> Option<&str> {
        self.blocks.get(&cell).map(String::as_str)
    }

    /// Create an empty ship whose local origin sits at `offset`.
    pub fn add_ship(&mut self, offset: DVec3) -> ShipId {
        self.next_ship += 1;
        let id = ShipId(self.next_ship);
        self.ships.insert(
            id,
            Ship {
                offset,
                blocks: BTreeMap::new(),
            },
        );
        id
    }

    /// Place a block in a ship's local grid.
    pub fn set_ship_block(&mut self, ship: ShipId, local: CellCoord, namespace: impl Into<String>) -> bool {
        match self.ships.get_mut(&ship) {
            Some(s) => {
                s.blocks.insert(local, namespace.into());
                true
            }
            None => false,
        }
    }

    pub fn move_ship(&mut self, ship: ShipId, offset: DVec3) -> bool {
        match self.ships.get_mut(&ship) {
            Some(s) => {
                s.offset = offset;
                true
            }
            None => false,
        }
    }

    pub fn ship(&self, ship: ShipId) -> Option<&Ship> {
        self.ships.get(&ship)
    }

    /// Make every collision query fail with `Unavailable(reason)` until cleared.
    pub fn set_collision_fault(&mut self, reason: Option<String>) {
        match &reason {
            Some(reason) => tracing::info!(%reason, "collision fault set"),
            None => tracing::info!("collision fault cleared"),
        }
        self.collision_fault = reason;
    }

    /// Nearest static or ship block along the ray. Static blocks win ties.
    pub fn raycast_blocks(&self, ray: &Ray, max_range: f64) -> Option<BlockHit> {
        let mut best = march(ray, max_range, |c| self.blocks.contains_key(&c)).map(|(distance, pos)| {
            BlockHit {
                distance,
                kind: BlockHitKind::Block {
                    pos,
                    namespace: self.blocks[&pos].clone(),
                },
            }
        });

        for (id, ship) in &self.ships {
            let Some(bounds) = ship.bounds() else {
                continue;
            };
            let limit = best.as_ref().map_or(max_range, |b| b.distance);
            let Some(entry) = bounds.ray_entry(ray, limit) else {
                continue;
            };
            // March in the ship's local grid starting at the bounding-box entry.
            let local = Ray {
                origin: ray.at(entry) - ship.offset,
                direction: ray.direction,
            };
            let hit = march(&local, limit - entry, |c| ship.blocks.contains_key(&c));
            if let Some((t, pos)) = hit {
                let distance = entry + t;
                if best.as_ref().is_none_or(|b| distance < b.distance) {
                    best = Some(BlockHit {
                        distance,
                        kind: BlockHitKind::ShipBlock {
                            ship: *id,
                            ship_bounds: bounds,
                            pos,
                            namespace: ship.blocks[&pos].clone(),
                        },
                    });
                }
            }
        }
        best
    }
}

/// Voxel traversal (Amanatides & Woo). Returns the entry distance and cell of
/// the first cell for which `solid` holds, starting with the origin's cell.
fn march<F>(ray: &Ray, max_range: f64, mut solid: F) -> Option<(f64, CellCoord)>
where
    F: FnMut(CellCoord) -> bool,
{
    let mut cell = CellCoord::from_position(ray.origin).as_ivec3();
    let mut step = [0_i32; 3];
    let mut inv = [0.0_f64; 3];
    let mut t_max = [f64::INFINITY; 3];

    // Crossings are computed from the origin each step, the same arithmetic
    // `Aabb::ray_entry` uses, so equal faces give bit-identical distances.
    let crossing = |axis: usize, cell: i32, step: i32, inv: f64| {
        let boundary = if step > 0 { cell + 1 } else { cell };
        (boundary as f64 - ray.origin[axis]) * inv
    };

    for axis in 0..3 {
        let d = ray.direction[axis];
        if d != 0.0 {
            step[axis] = if d > 0.0 { 1 } else { -1 };
            inv[axis] = 1.0 / d;
            t_max[axis] = crossing(axis, cell[axis], step[axis], inv[axis]);
        }
    }

    let mut t = 0.0;
    loop {
        if solid(cell.into()) {
            return Some((t, cell.into()));
        }
        let axis = if t_max[0] <= t_max[1] && t_max[0] <= t_max[2] {
            0
        } else if t_max[1] <= t_max[2] {
            1
        } else {
            2
        };
        if t_max[axis] > max_range {
            return None;
        }
        t = t_max[axis];
        cell[axis] += step[axis];
        t_max[axis] = crossing(axis, cell[axis], step[axis], inv[axis]);
    }
}

impl CollisionWorld for World {
    fn resolve(
        &self,
        ray: &Ray,
        max_range: f64,
        _excluding: Option<EntityHandle>,
    ) -> Result<Option<BlockHit>, CollisionError> {
        if let Some(reason) = &self.collision_fault {
            tracing::debug!(%reason, "collision query refused");
            return Err(CollisionError::Unavailable(reason.clone()));
        }
        Ok(self.raycast_blocks(ray, max_range))
    }
}

impl EntityLookup for World {
    fn snapshot(&self, handle: EntityHandle) -> Option<EntitySnapshot> {
        self.entities.get(&handle).map(|d| EntitySnapshot {
            handle,
            kind: d.kind.clone(),
            position: d.position,
            health: d.health,
            max_health: d.max_health,
            armor: d.armor,
        })
    }
}

impl CollisionWorld for RwLock<World> {
    fn resolve(
        &self,
        ray: &Ray,
        max_range: f64,
        excluding: Option<EntityHandle>,
    ) -> Result<Option<BlockHit>, CollisionError> {
        self.read().resolve(ray, max_range, excluding)
    }
}

impl EntityLookup for RwLock<World> {
    fn snapshot(&self, handle: EntityHandle) -> Option<EntitySnapshot> {
        self.read().snapshot(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ray_x(origin: [f64; 3]) -> Ray {
        Ray::new(DVec3::from_array(origin), DVec3::X).unwrap()
    }

    #[test]
    fn world_starts_empty() {
        let w = World::new();
        assert_eq!(w.tick(), 0);
        assert_eq!(w.entity_count(), 0);
        assert!(w.events().is_empty());
    }

    #[test]
    fn spawn_move_despawn_are_logged() {
        let mut w = World::new();
        let h = w.spawn_entity("minecraft:zombie", "Zombie", DVec3::new(10.5, 64.0, 10.5));
        assert!(w.move_entity(h, DVec3::new(10.9, 64.0, 10.5))); // same cell
        assert!(w.move_entity(h, DVec3::new(11.2, 64.0, 10.5)));
        w.step();
        w.despawn(h);

        let events = w.drain_events();
        assert_eq!(
            events,
            vec![
                WorldEvent::Spawned {
                    handle: h,
                    cell: CellCoord::new(10, 64, 10)
                },
                WorldEvent::Moved {
                    handle: h,
                    old: CellCoord::new(10, 64, 10),
                    new: CellCoord::new(11, 64, 10)
                },
                WorldEvent::Stepped { tick: 1 },
                WorldEvent::Removed {
                    handle: h,
                    cell: CellCoord::new(11, 64, 10)
                },
            ]
        );
        assert!(w.events().is_empty());
    }

    #[test]
    fn move_unknown_entity_is_rejected() {
        let mut w = World::new();
        assert!(!w.move_entity(EntityHandle::new(), DVec3::ZERO));
        assert!(w.events().is_empty());
    }

    #[test]
    fn set_health_clamps_to_max() {
        let mut w = World::new();
        let h = w.spawn_player("Alex", DVec3::ZERO);
        assert!(w.set_health(h, 99.0, 5.0));
        let snap = w.snapshot(h).unwrap();
        assert_eq!(snap.health, 20.0);
        assert_eq!(snap.armor, 5.0);
        assert_eq!(snap.category(), "player");
    }

    #[test]
    fn march_finds_block_entry_distance() {
        let mut w = World::new();
        w.set_block(CellCoord::new(5, 64, 10), "minecraft:stone");
        let hit = w.raycast_blocks(&ray_x([0.0, 64.0, 10.0]), 50.0).unwrap();
        assert_eq!(hit.distance, 5.0);
        assert_eq!(
            hit.kind,
            BlockHitKind::Block {
                pos: CellCoord::new(5, 64, 10),
                namespace: "minecraft:stone".into()
            }
        );
    }

    #[test]
    fn march_respects_range() {
        let mut w = World::new();
        w.set_block(CellCoord::new(30, 64, 10), "minecraft:stone");
        assert!(w.raycast_blocks(&ray_x([0.0, 64.0, 10.0]), 20.0).is_none());
    }

    #[test]
    fn march_negative_direction() {
        let mut w = World::new();
        w.set_block(CellCoord::new(-4, 0, 0), "minecraft:dirt");
        let ray = Ray::new(DVec3::new(0.5, 0.5, 0.5), DVec3::NEG_X).unwrap();
        let hit = w.raycast_blocks(&ray, 10.0).unwrap();
        assert!((hit.distance - 3.5).abs() < 1e-9);
    }

    #[test]
    fn ship_blocks_use_local_coordinates() {
        let mut w = World::new();
        let ship = w.add_ship(DVec3::new(20.0, 60.0, 8.0));
        assert!(w.set_ship_block(ship, CellCoord::new(0, 4, 2), "minecraft:oak_planks"));
        let bounds = w.ship(ship).unwrap().bounds().unwrap();
        assert_eq!(bounds.min, DVec3::new(20.0, 64.0, 10.0));

        let hit = w.raycast_blocks(&ray_x([0.0, 64.5, 10.5]), 100.0).unwrap();
        assert!((hit.distance - 20.0).abs() < 1e-9);
        match hit.kind {
            BlockHitKind::ShipBlock { ship: id, pos, .. } => {
                assert_eq!(id, ship);
                assert_eq!(pos, CellCoord::new(0, 4, 2));
            }
            other => panic!("expected ship block, got {other:?}"),
        }
    }

    #[test]
    fn static_block_in_front_of_ship_wins() {
        let mut w = World::new();
        let ship = w.add_ship(DVec3::new(20.0, 64.0, 10.0));
        w.set_ship_block(ship, CellCoord::new(0, 0, 0), "minecraft:oak_planks");
        w.set_block(CellCoord::new(12, 64, 10), "minecraft:glass");
        let hit = w.raycast_blocks(&ray_x([0.0, 64.5, 10.5]), 100.0).unwrap();
        assert!(matches!(hit.kind, BlockHitKind::Block { .. }));
        assert_eq!(hit.distance, 12.0);
    }

    #[test]
    fn moving_a_ship_moves_its_hits() {
        let mut w = World::new();
        let ship = w.add_ship(DVec3::new(20.0, 64.0, 10.0));
        w.set_ship_block(ship, CellCoord::new(0, 0, 0), "minecraft:oak_planks");
        assert!(w.move_ship(ship, DVec3::new(8.0, 64.0, 10.0)));
        let hit = w.raycast_blocks(&ray_x([0.0, 64.5, 10.5]), 100.0).unwrap();
        assert!((hit.distance - 8.0).abs() < 1e-9);
    }

    #[test]
    fn collision_fault_surfaces_as_error() {
        let mut w = World::new();
        w.set_collision_fault(Some("chunk loader stalled".into()));
        let res = w.resolve(&ray_x([0.0; 3]), 10.0, None);
        assert!(matches!(res, Err(CollisionError::Unavailable(_))));
    }

    #[test]
    fn clearing_the_fault_restores_queries() {
        let mut w = World::new();
        w.set_block(CellCoord::new(3, 0, 0), "minecraft:stone");
        w.set_collision_fault(Some("chunk loader stalled".into()));
        assert!(w.resolve(&ray_x([0.5, 0.5, 0.5]), 10.0, None).is_err());
        w.set_collision_fault(None);
        let hit = w.resolve(&ray_x([0.5, 0.5, 0.5]), 10.0, None).unwrap().unwrap();
        assert_eq!(hit.distance, 2.5);
    }

    /// Block entry distances must agree exactly with the slab test the
    /// index uses for entity cells, on every axis the ray crosses.
    #[test]
    fn march_matches_box_entry_on_diagonal_rays() {
        let directions = [
            DVec3::new(1.0, 0.7, 0.3),
            DVec3::new(-0.4, 1.0, -0.9),
            DVec3::new(0.3, -0.2, 1.0),
        ];
        let origin = DVec3::new(0.1, 64.2, 0.3);
        for dir in directions {
            let ray = Ray::new(origin, dir).unwrap();
            for t in 1..40 {
                let cell = CellCoord::from_position(ray.at(t as f64 + 0.25));
                let mut w = World::new();
                w.set_block(cell, "minecraft:stone");
                let hit = w.raycast_blocks(&ray, 100.0).unwrap();
                let entry = Aabb::from_cell(cell).ray_entry(&ray, 100.0).unwrap();
                assert_eq!(hit.distance, entry, "{dir:?} at {cell:?}");
            }
        }
    }

    #[test]
    fn shared_world_implements_collaborators() {
        let shared = World::new().into_shared();
        let h = shared.write().spawn_player("Steve", DVec3::new(1.0, 2.0, 3.0));
        let lookup: &dyn EntityLookup = &*shared;
        assert_eq!(lookup.snapshot(h).unwrap().position, DVec3::new(1.0, 2.0, 3.0));
    }
}

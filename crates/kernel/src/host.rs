//! Collaborator contracts the host simulation fulfils.
//!
//! The raycast engine never looks at world geometry or entity state directly;
//! it goes through these traits so the host keeps ownership of both.

use blockray_common::{Aabb, CellCoord, EntityHandle, Ray};
use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Identifier of a ship: an independently moving rigid body carrying its own
/// block grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShipId(pub u64);

/// Nearest block intersection reported by the collision collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockHit {
    pub distance: f64,
    pub kind: BlockHitKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockHitKind {
    /// A block of the static world, in world coordinates.
    Block { pos: CellCoord, namespace: String },
    /// A block belonging to a ship; `pos` is in the ship's local grid.
    ShipBlock {
        ship: ShipId,
        ship_bounds: Aabb,
        pos: CellCoord,
        namespace: String,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CollisionError {
    #[error("collision backend unavailable: {0}")]
    Unavailable(String),
    #[error("ray entered unloaded terrain at {0:?}")]
    Unloaded(CellCoord),
}

/// Resolves a ray against static and ship block geometry.
pub trait CollisionWorld: Send + Sync {
    /// Nearest block hit within `max_range`, or `None`.
    ///
    /// `excluding` names the requesting entity so the host can ignore geometry
    /// that belongs to it.
    fn resolve(
        &self,
        ray: &Ray,
        max_range: f64,
        excluding: Option<EntityHandle>,
    ) -> Result<Option<BlockHit>, CollisionError>;
}

/// Host-side classification of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityKind {
    Player { name: String },
    Generic { category: String, display_name: String },
}

/// Live view of one entity at the moment of lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot {
    pub handle: EntityHandle,
    pub kind: EntityKind,
    pub position: DVec3,
    pub health: f32,
    pub max_health: f32,
    pub armor: f32,
}

impl EntitySnapshot {
    /// Category used for eligibility filtering. Players report `"player"`.
    pub fn category(&self) -> &str {
        match &self.kind {
            EntityKind::Player { .. } => "player",
            EntityKind::Generic { category, .. } => category,
        }
    }
}

/// Looks up live entity data by handle.
pub trait EntityLookup: Send + Sync {
    /// `None` once the entity is gone.
    fn snapshot(&self, handle: EntityHandle) -> Option<EntitySnapshot>;
}

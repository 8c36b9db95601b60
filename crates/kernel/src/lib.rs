//! Host kernel: the collaborator contracts blockray relies on, and an
//! in-memory reference world that fulfils them.
//!
//! # Invariants
//! - The host owns entity data; the index only ever sees `EntityHandle`s.
//! - Lifecycle events are appended in tick order and never rewritten.

pub mod host;
pub mod world;

pub use host::{
    BlockHit, BlockHitKind, CollisionError, CollisionWorld, EntityKind, EntityLookup,
    EntitySnapshot, ShipId,
};
pub use world::{EntityData, Ship, World, WorldEvent};

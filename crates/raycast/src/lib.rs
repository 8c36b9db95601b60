//! Raycast resolution: nearest of block geometry and indexed entities.
//!
//! # Invariants
//! - Every query resolves to exactly one `HitResult`.
//! - On an exact distance tie, block geometry wins over an entity.
//! - Collaborator failures degrade to `Miss`; they never escape.

mod engine;

pub use engine::{EngineConfig, RaycastEngine};

pub fn crate_info() -> &'static str {
    "blockray-raycast v0.1.0"
}

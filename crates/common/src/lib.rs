//! Shared types for the blockray entity index and raycast service.
//!
//! # Invariants
//! - A `Query` is validated on construction and never mutated afterwards.
//! - `Ray::direction` is always unit length, so ray parameters are distances.

pub mod hit;
pub mod query;
pub mod types;

pub use hit::{CorrelationId, HitResult, ResultEvent};
pub use query::{Query, QueryError, QueryLimits, Requester};
pub use types::{Aabb, CellCoord, EntityHandle, Ray};

pub fn crate_info() -> &'static str {
    "blockray-common v0.1.0"
}

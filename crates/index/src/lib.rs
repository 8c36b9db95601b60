//! Entity spatial index: a sparse octree over unit cells, the reader-writer
//! guard that shares it with query workers, and the sync layer that keeps it
//! in step with the host.
//!
//! # Invariants
//! - A handle is stored in at most one leaf, and only inside the extent.
//! - Nodes exist only on the path to a non-empty leaf.
//! - Ray traversal yields handles in non-decreasing distance order.
//! - Only `PositionSync` mutates a guarded index, one mutation per
//!   notification.

mod guard;
mod octree;
mod sync;

pub use guard::{IndexGuard, IndexView};
pub use octree::{IndexConfig, IndexError, RayHits, SpatialIndex};
pub use sync::{PositionSync, SyncStats};

pub fn crate_info() -> &'static str {
    "blockray-index v0.1.0"
}

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use blockray_common::{EntityHandle, HitResult, Query};
use blockray_index::IndexGuard;
use blockray_kernel::{BlockHit, BlockHitKind, CollisionWorld, EntityKind, EntityLookup, EntitySnapshot};
use serde::{Deserialize, Serialize};

/// Tuning for entity candidate selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Candidates collected per read lock before live data is checked.
    pub candidate_window: usize,
    /// Entity categories that rays pass through.
    pub excluded_categories: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            candidate_window: 16,
            excluded_categories: Vec::new(),
        }
    }
}

/// Resolves one query into one hit.
///
/// Asks the collision collaborator for the nearest block first, then walks
/// the entity index only up to that distance. An entity wins only when it is
/// strictly nearer than the block.
pub struct RaycastEngine {
    index: Arc<IndexGuard>,
    collision: Arc<dyn CollisionWorld>,
    entities: Arc<dyn EntityLookup>,
    config: EngineConfig,
}

impl RaycastEngine {
    pub fn new(
        index: Arc<IndexGuard>,
        collision: Arc<dyn CollisionWorld>,
        entities: Arc<dyn EntityLookup>,
        config: EngineConfig,
    ) -> Self {
        Self {
            index,
            collision,
            entities,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resolve(&self, query: &Query) -> HitResult {
        let requester = query.requester().entity();
        let Some(block) = self.resolve_blocks(query, requester) else {
            return HitResult::Miss;
        };
        let bound = match &block {
            Some(hit) => Bound::Before(hit.distance),
            None => Bound::Within(query.max_range()),
        };

        if let Some((distance, snapshot)) = self.nearest_entity(query, requester, bound) {
            tracing::debug!(distance, handle = %snapshot.handle, "entity hit");
            return classify_entity(distance, snapshot);
        }
        match block {
            Some(hit) => {
                tracing::debug!(distance = hit.distance, "block hit");
                classify_block(hit)
            }
            None => HitResult::Miss,
        }
    }

    /// Outer `None` means the collaborator failed and the query is a miss.
    fn resolve_blocks(&self, query: &Query, requester: Option<EntityHandle>) -> Option<Option<BlockHit>> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.collision.resolve(query.ray(), query.max_range(), requester)
        }));
        match outcome {
            Ok(Ok(hit)) => Some(hit.filter(|h| h.distance <= query.max_range())),
            Ok(Err(err)) => {
                tracing::warn!(%err, "collision query failed");
                None
            }
            Err(_) => {
                tracing::warn!("collision query panicked");
                None
            }
        }
    }

    /// Nearest live, eligible entity inside `bound`.
    ///
    /// Candidates are gathered in windows under the read lock; host data is
    /// looked up after the lock is released. A window made up entirely of
    /// stale or ineligible handles triggers another pass that skips them.
    fn nearest_entity(
        &self,
        query: &Query,
        requester: Option<EntityHandle>,
        bound: Bound,
    ) -> Option<(f64, EntitySnapshot)> {
        let window = self.config.candidate_window.max(1);
        let mut rejected: HashSet<EntityHandle> = HashSet::new();
        loop {
            let candidates: Vec<(f64, EntityHandle)> = self.index.read(|idx| {
                idx.query_ray(query.ray(), bound.limit())
                    .take_while(|(d, _)| bound.admits(*d))
                    .filter(|(_, h)| Some(*h) != requester && !rejected.contains(h))
                    .take(window)
                    .collect()
            });
            let exhausted = candidates.len() < window;

            for (distance, handle) in candidates {
                match self.entities.snapshot(handle) {
                    Some(snapshot) if self.eligible(&snapshot) => return Some((distance, snapshot)),
                    Some(_) => {}
                    None => tracing::debug!(%handle, "stale index entry skipped"),
                }
                rejected.insert(handle);
            }
            if exhausted {
                return None;
            }
        }
    }

    fn eligible(&self, snapshot: &EntitySnapshot) -> bool {
        let category = snapshot.category();
        !self.config.excluded_categories.iter().any(|c| c == category)
    }
}

/// Relative slack under which an entity and a block are at the same distance.
const TIE_EPSILON: f64 = 1e-9;

/// How far along the ray an entity may be and still win.
#[derive(Debug, Clone, Copy)]
enum Bound {
    /// Strictly before a block hit; ties go to the block. Distances within
    /// rounding of the block's count as ties.
    Before(f64),
    /// Anywhere up to the query range.
    Within(f64),
}

impl Bound {
    fn limit(self) -> f64 {
        match self {
            Self::Before(d) | Self::Within(d) => d,
        }
    }

    fn admits(self, distance: f64) -> bool {
        match self {
            Self::Before(d) => distance < d - TIE_EPSILON * d.max(1.0),
            Self::Within(d) => distance <= d,
        }
    }
}

fn classify_block(hit: BlockHit) -> HitResult {
    match hit.kind {
        BlockHitKind::Block { pos, namespace } => HitResult::Block {
            distance: hit.distance,
            x: pos.x,
            y: pos.y,
            z: pos.z,
            namespace,
        },
        BlockHitKind::ShipBlock {
            ship,
            ship_bounds,
            pos,
            namespace,
        } => HitResult::ShipBlock {
            distance: hit.distance,
            ship_id: ship.0,
            ship_bounds,
            x: pos.x,
            y: pos.y,
            z: pos.z,
            namespace,
        },
    }
}

fn classify_entity(distance: f64, snapshot: EntitySnapshot) -> HitResult {
    let [x, y, z] = snapshot.position.to_array();
    match snapshot.kind {
        EntityKind::Player { name } => HitResult::Player {
            distance,
            name,
            x,
            y,
            z,
            health: snapshot.health,
            max_health: snapshot.max_health,
            armor: snapshot.armor,
        },
        EntityKind::Generic {
            category,
            display_name,
        } => HitResult::Entity {
            distance,
            category,
            name: display_name,
            x,
            y,
            z,
            health: snapshot.health,
            max_health: snapshot.max_health,
            armor: snapshot.armor,
        },
    }
}

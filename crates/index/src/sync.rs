use std::sync::Arc;

use blockray_common::{CellCoord, EntityHandle};
use blockray_kernel::WorldEvent;

use crate::guard::IndexGuard;
use crate::octree::IndexError;

/// Counters for what position sync has applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub spawns: u64,
    pub moves: u64,
    pub removes: u64,
    /// Host and index disagreed about where an entity was.
    pub anomalies: u64,
    /// Inserts the index refused (out of extent, full cell).
    pub rejected: u64,
}

/// Feeds host lifecycle notifications into the index.
///
/// Lives on the host's simulation thread and is the only writer. Every
/// notification becomes exactly one mutation. Disagreements with the index
/// are logged and counted; none of them fail the host.
pub struct PositionSync {
    index: Arc<IndexGuard>,
    stats: SyncStats,
}

impl PositionSync {
    pub fn new(index: Arc<IndexGuard>) -> Self {
        Self {
            index,
            stats: SyncStats::default(),
        }
    }

    pub fn index(&self) -> &Arc<IndexGuard> {
        &self.index
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// An entity came into existence at `coord`.
    pub fn on_spawn(&mut self, handle: EntityHandle, coord: CellCoord) {
        self.stats.spawns += 1;
        let (previous, result) = self.index.mutate(|idx| {
            let previous = idx.location(handle);
            (previous, idx.insert(coord, handle))
        });
        if let Some(prev) = previous.filter(|p| *p != coord) {
            self.stats.anomalies += 1;
            tracing::warn!(%handle, ?prev, ?coord, "spawn for an entity already indexed elsewhere");
        }
        if let Err(err) = result {
            self.reject(handle, err);
        }
    }

    /// An entity crossed from `old` into `new`.
    ///
    /// Remove and insert happen inside one mutation. If the index had the
    /// entity somewhere other than `old`, the remove is a no-op and the
    /// insert still lands it at `new`. If `new` cannot be indexed the entity
    /// ends up unindexed rather than left at a stale cell.
    pub fn on_move(&mut self, handle: EntityHandle, old: CellCoord, new: CellCoord) {
        if old == new {
            tracing::trace!(%handle, ?old, "move within one cell ignored");
            return;
        }
        self.stats.moves += 1;
        let _span = tracing::debug_span!("sync_move", %handle).entered();
        let (removed, stored, result) = self.index.mutate(|idx| {
            let stored = idx.location(handle);
            let removed = idx.remove(old, handle);
            let result = idx.insert(new, handle);
            if result.is_err() {
                if let Some(at) = idx.location(handle) {
                    idx.remove(at, handle);
                }
            }
            (removed, stored, result)
        });
        if !removed {
            self.stats.anomalies += 1;
            tracing::warn!(?old, ?new, ?stored, "move from a cell the index did not have");
        }
        if let Err(err) = result {
            self.reject(handle, err);
        }
    }

    /// An entity stopped existing.
    ///
    /// If the index holds it at a different cell than reported, the drift is
    /// logged and the entity is purged from wherever it actually is.
    pub fn on_remove(&mut self, handle: EntityHandle, coord: CellCoord) {
        self.stats.removes += 1;
        let (removed, stale) = self.index.mutate(|idx| {
            if idx.remove(coord, handle) {
                return (true, None);
            }
            let stale = idx.location(handle);
            if let Some(at) = stale {
                idx.remove(at, handle);
            }
            (false, stale)
        });
        if !removed {
            self.stats.anomalies += 1;
            tracing::warn!(%handle, ?coord, ?stale, "remove for an entity not indexed at that cell");
        }
    }

    /// Dispatch one host lifecycle event.
    pub fn apply(&mut self, event: &WorldEvent) {
        match event {
            WorldEvent::Spawned { handle, cell } => self.on_spawn(*handle, *cell),
            WorldEvent::Moved { handle, old, new } => self.on_move(*handle, *old, *new),
            WorldEvent::Removed { handle, cell } => self.on_remove(*handle, *cell),
            WorldEvent::Stepped { tick } => tracing::trace!(tick, "host tick"),
        }
    }

    /// Apply events in order.
    pub fn apply_all<'a>(&mut self, events: impl IntoIterator<Item = &'a WorldEvent>) {
        for event in events {
            self.apply(event);
        }
    }

    /// Replace the index contents with the host's current entity set, as one
    /// mutation. Returns how many entities were indexed.
    pub fn rebuild(&mut self, entities: impl IntoIterator<Item = (EntityHandle, CellCoord)>) -> usize {
        let rejected = self.index.mutate(|idx| {
            idx.clear();
            entities
                .into_iter()
                .filter_map(|(handle, cell)| idx.insert(cell, handle).err().map(|e| (handle, e)))
                .collect::<Vec<_>>()
        });
        for (handle, err) in rejected {
            self.reject(handle, err);
        }
        let indexed = self.index.len();
        tracing::info!(indexed, "index rebuilt from host");
        indexed
    }

    fn reject(&mut self, handle: EntityHandle, err: IndexError) {
        self.stats.rejected += 1;
        tracing::warn!(%handle, %err, "entity left unindexed");
    }
}

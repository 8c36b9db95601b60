use std::ops::Deref;

use parking_lot::RwLock;

use crate::octree::{IndexConfig, IndexError, SpatialIndex};

struct Versioned {
    generation: u64,
    index: SpatialIndex,
}

/// Single-writer / many-reader access to a [`SpatialIndex`].
///
/// Backed by a task-fair `parking_lot::RwLock`: reads run in parallel, a
/// mutation runs alone, and once a writer is waiting new readers queue behind
/// it, so the host thread is never starved by query load. Every mutation
/// bumps a generation counter that reads can observe.
pub struct IndexGuard {
    inner: RwLock<Versioned>,
}

/// What a read closure sees: the index as of one generation.
pub struct IndexView<'a> {
    generation: u64,
    index: &'a SpatialIndex,
}

impl IndexView<'_> {
    /// Number of mutations applied before this read began.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Deref for IndexView<'_> {
    type Target = SpatialIndex;

    fn deref(&self) -> &SpatialIndex {
        self.index
    }
}

impl IndexGuard {
    pub fn new(config: IndexConfig) -> Result<Self, IndexError> {
        Ok(Self::from_index(SpatialIndex::new(config)?))
    }

    pub fn from_index(index: SpatialIndex) -> Self {
        Self {
            inner: RwLock::new(Versioned {
                generation: 0,
                index,
            }),
        }
    }

    /// Run a read-only traversal. Concurrent with other reads, never with a
    /// mutation; the closure sees every mutation that completed before it
    /// acquired the lock and none that started after.
    pub fn read<R>(&self, f: impl FnOnce(&IndexView<'_>) -> R) -> R {
        let guard = self.inner.read();
        let view = IndexView {
            generation: guard.generation,
            index: &guard.index,
        };
        f(&view)
    }

    /// Apply one mutation exclusively. Composite changes (remove + insert)
    /// go in a single closure so readers never see the intermediate state.
    ///
    /// Only position sync writes to the index.
    pub(crate) fn mutate<R>(&self, f: impl FnOnce(&mut SpatialIndex) -> R) -> R {
        let mut guard = self.inner.write();
        guard.generation += 1;
        let generation = guard.generation;
        let out = f(&mut guard.index);
        tracing::trace!(generation, len = guard.index.len(), "index mutated");
        out
    }

    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    pub fn len(&self) -> usize {
        self.read(|index| index.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

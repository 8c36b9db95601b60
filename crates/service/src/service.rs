use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use blockray_common::{CorrelationId, HitResult, Query, QueryError, QueryLimits, Requester, ResultEvent};
use blockray_index::IndexGuard;
use blockray_kernel::{CollisionWorld, EntityLookup};
use blockray_raycast::RaycastEngine;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use glam::DVec3;
use parking_lot::{Mutex, RwLock};

use crate::config::{Config, ConfigError};
use crate::sink::EventSink;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("query pool is saturated, retry later")]
    Busy,
    #[error("query service is shutting down")]
    ShuttingDown,
    #[error("failed to start query service: {0}")]
    Startup(String),
}

impl From<ConfigError> for ServiceError {
    fn from(err: ConfigError) -> Self {
        Self::Startup(err.to_string())
    }
}

/// Snapshot of service counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceStats {
    /// Queries accepted into the queue.
    pub submitted: u64,
    /// Submissions refused because the queue was full.
    pub rejected_busy: u64,
    /// Results handed to the sink successfully.
    pub completed: u64,
    /// Results the sink refused.
    pub delivery_failures: u64,
    /// Accepted queries abandoned at shutdown.
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    rejected_busy: AtomicU64,
    completed: AtomicU64,
    delivery_failures: AtomicU64,
    dropped: AtomicU64,
}

struct Job {
    id: CorrelationId,
    query: Query,
}

/// State shared by every worker.
struct Pool {
    engine: RaycastEngine,
    sink: Arc<dyn EventSink>,
    abort: AtomicBool,
    counters: Counters,
}

impl Pool {
    fn run(&self, jobs: Receiver<Job>) {
        for job in jobs.iter() {
            if self.abort.load(Ordering::Acquire) {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let span = tracing::info_span!("raycast", correlation_id = %job.id);
            let _entered = span.enter();

            let hit = panic::catch_unwind(AssertUnwindSafe(|| self.engine.resolve(&job.query)))
                .unwrap_or_else(|_| {
                    tracing::warn!("raycast panicked, reporting a miss");
                    HitResult::Miss
                });
            if self.abort.load(Ordering::Acquire) {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            tracing::debug!(result_kind = hit.kind(), distance = ?hit.distance(), "query resolved");

            let event = ResultEvent {
                correlation_id: job.id,
                hit,
            };
            // A sink that panics loses this result but must not take the worker with it.
            match panic::catch_unwind(AssertUnwindSafe(move || self.sink.deliver(event))) {
                Ok(Ok(())) => {
                    self.counters.completed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(err)) => {
                    self.counters.delivery_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(%err, requester = job.query.requester().id(), "result dropped");
                }
                Err(_) => {
                    self.counters.delivery_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(requester = job.query.requester().id(), "sink panicked, result dropped");
                }
            }
        }
    }
}

/// Signals the shutdown path when a worker thread exits, including by panic.
struct ExitSignal(Sender<()>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let _ = self.0.try_send(());
    }
}

/// Asynchronous raycast API for guest scripts.
///
/// `submit` validates, enqueues and returns a correlation id without
/// blocking; a fixed pool of worker threads resolves queries and pushes each
/// result to the sink exactly once. The queue is bounded: when it is full,
/// `submit` fails with [`ServiceError::Busy`] instead of growing.
pub struct QueryService {
    limits: QueryLimits,
    shutdown_timeout: Duration,
    sender: RwLock<Option<Sender<Job>>>,
    receiver: Receiver<Job>,
    exits: Receiver<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pool: Arc<Pool>,
}

impl QueryService {
    /// Validate `config` and spawn the worker pool.
    pub fn startup(
        config: &Config,
        index: Arc<IndexGuard>,
        collision: Arc<dyn CollisionWorld>,
        entities: Arc<dyn EntityLookup>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        let engine = RaycastEngine::new(index, collision, entities, config.engine.clone());
        let pool = Arc::new(Pool {
            engine,
            sink,
            abort: AtomicBool::new(false),
            counters: Counters::default(),
        });

        let worker_count = config.service.workers;
        let (sender, receiver) = bounded::<Job>(config.service.queue_capacity);
        let (exit_tx, exits) = bounded::<()>(worker_count);

        let mut workers = Vec::with_capacity(worker_count);
        for n in 0..worker_count {
            let pool = Arc::clone(&pool);
            let jobs = receiver.clone();
            let signal = ExitSignal(exit_tx.clone());
            let spawned = std::thread::Builder::new()
                .name(format!("blockray-worker-{n}"))
                .spawn(move || {
                    let _signal = signal;
                    pool.run(jobs);
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    // Unwind the workers already running before reporting.
                    drop(sender);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(ServiceError::Startup(format!("spawning worker {n}: {err}")));
                }
            }
        }

        tracing::info!(
            workers = worker_count,
            queue_capacity = config.service.queue_capacity,
            "query service started"
        );
        Ok(Self {
            limits: config.limits,
            shutdown_timeout: config.service.shutdown_timeout(),
            sender: RwLock::new(Some(sender)),
            receiver,
            exits,
            workers: Mutex::new(workers),
            pool,
        })
    }

    /// Validate and enqueue a raycast. Never blocks.
    ///
    /// Input errors and a full queue are reported here; an accepted query's
    /// result arrives later at the sink, tagged with the returned id.
    pub fn submit(
        &self,
        origin: DVec3,
        direction: DVec3,
        max_range: f64,
        requester_id: &str,
    ) -> Result<CorrelationId, ServiceError> {
        let query = Query::new(origin, direction, max_range, Requester::new(requester_id), &self.limits)?;
        let sender = self.sender.read();
        let Some(sender) = sender.as_ref() else {
            return Err(ServiceError::ShuttingDown);
        };

        let id = CorrelationId::new();
        match sender.try_send(Job { id, query }) {
            Ok(()) => {
                self.pool.counters.submitted.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(correlation_id = %id, requester = requester_id, "query accepted");
                Ok(id)
            }
            Err(TrySendError::Full(_)) => {
                self.pool.counters.rejected_busy.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(requester = requester_id, "query rejected, pool busy");
                Err(ServiceError::Busy)
            }
            Err(TrySendError::Disconnected(_)) => Err(ServiceError::ShuttingDown),
        }
    }

    pub fn stats(&self) -> ServiceStats {
        let c = &self.pool.counters;
        ServiceStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            rejected_busy: c.rejected_busy.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            delivery_failures: c.delivery_failures.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
        }
    }

    /// Queries waiting for a worker.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_running(&self) -> bool {
        self.sender.read().is_some()
    }

    /// Stop accepting queries and wind down the pool.
    ///
    /// Queued work keeps draining until the shutdown timeout; whatever is
    /// still pending then is dropped undelivered. Workers stuck inside a
    /// collaborator past the deadline are detached. Safe to call repeatedly.
    pub fn shutdown(&self) {
        let Some(sender) = self.sender.write().take() else {
            return;
        };
        drop(sender);
        let mut workers = std::mem::take(&mut *self.workers.lock());
        let total = workers.len();
        tracing::info!(pending = self.receiver.len(), "query service shutting down");

        let deadline = Instant::now() + self.shutdown_timeout;
        let mut exited = 0;
        while exited < total && self.exits.recv_deadline(deadline).is_ok() {
            exited += 1;
        }

        if exited < total {
            self.pool.abort.store(true, Ordering::Release);
            let mut abandoned = 0_u64;
            while self.receiver.try_recv().is_ok() {
                abandoned += 1;
            }
            self.pool.counters.dropped.fetch_add(abandoned, Ordering::Relaxed);
            tracing::warn!(
                abandoned,
                stuck_workers = total - exited,
                "shutdown deadline passed, dropping pending queries"
            );
            workers.retain(|handle| handle.is_finished());
        }

        for handle in workers {
            if handle.join().is_err() {
                tracing::warn!("query worker panicked");
            }
        }
        let stats = self.stats();
        tracing::info!(
            completed = stats.completed,
            dropped = stats.dropped,
            delivery_failures = stats.delivery_failures,
            "query service stopped"
        );
    }
}

impl Drop for QueryService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

//! Resizable worker thread pool.
//!
//! [`WorkerPool`] is the live handle that [`PoolInspectorService`] reads
//! and re-tunes. It follows the classic executor admission policy:
//!
//! ```text
//! execute(job)
//!     |
//!     +-- workers < core ----------------> start a worker with the job
//!     +-- queue accepts -----------------> enqueue
//!     +-- workers < max -----------------> start an extra worker with the job
//!     +-- otherwise ---------------------> PoolError::Rejected
//! ```
//!
//! Workers above the core size retire after `keep_alive` of idleness.
//! Workers above a lowered max size retire at their next idle check.
//!
//! Sizing lives under one mutex so `core <= max` is enforced atomically.
//! Counters are mirrored into atomics so snapshots never take the lock;
//! a snapshot is therefore not a consistent cut across counters.
//!
//! [`PoolInspectorService`]: crate::service::PoolInspectorService

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use dynpool_types::RemainingCapacity;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Default idle time after which a worker above the core size retires.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Errors raised by a [`WorkerPool`].
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Requested sizing violates `core <= max` or `max >= 1`.
    #[error("pool {pool}: invalid sizing core={core} max={max} (need core <= max and max >= 1)")]
    InvalidSizing {
        /// Pool name.
        pool: String,
        /// Requested core size.
        core: usize,
        /// Requested max size.
        max: usize,
    },

    /// All workers are busy, the queue is full, and the pool is at max size.
    #[error("pool {pool} rejected a task: saturated")]
    Rejected {
        /// Pool name.
        pool: String,
    },

    /// The pool no longer accepts work.
    #[error("pool {pool} is shut down")]
    Shutdown {
        /// Pool name.
        pool: String,
    },

    /// The OS refused to start a worker thread.
    #[error("pool {pool} failed to start a worker: {source}")]
    Spawn {
        /// Pool name.
        pool: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Queueing discipline of a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueKind {
    /// FIFO queue without a capacity limit.
    #[default]
    Unbounded,
    /// FIFO queue holding at most `capacity` tasks.
    Bounded {
        /// Maximum number of queued tasks.
        capacity: usize,
    },
    /// Direct handoff: a task is only queued when an idle worker can take it.
    Handoff,
}

impl QueueKind {
    /// The `queue_type` label reported in snapshots.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Unbounded => "UnboundedQueue",
            Self::Bounded { .. } => "BoundedQueue",
            Self::Handoff => "HandoffQueue",
        }
    }

    /// Free slots given `queued` waiting tasks.
    pub const fn remaining(self, queued: usize) -> RemainingCapacity {
        match self {
            Self::Unbounded => RemainingCapacity::Unbounded,
            Self::Bounded { capacity } => RemainingCapacity::Bounded(capacity.saturating_sub(queued)),
            Self::Handoff => RemainingCapacity::Bounded(0),
        }
    }
}

/// Construction parameters for a [`WorkerPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolOptions {
    /// Workers kept alive even when idle.
    pub core_size: usize,
    /// Upper bound on workers.
    pub max_size: usize,
    /// Queueing discipline.
    pub queue: QueueKind,
    /// Idle time after which a worker above core retires.
    pub keep_alive: Duration,
    /// Worker thread name prefix; defaults to the pool name.
    pub thread_name_prefix: Option<String>,
}

impl WorkerPoolOptions {
    /// Options with the given sizing, an unbounded queue, and the default keep-alive.
    pub const fn new(core_size: usize, max_size: usize) -> Self {
        Self {
            core_size,
            max_size,
            queue: QueueKind::Unbounded,
            keep_alive: DEFAULT_KEEP_ALIVE,
            thread_name_prefix: None,
        }
    }

    /// Use the given queueing discipline.
    #[must_use]
    pub const fn with_queue(mut self, queue: QueueKind) -> Self {
        self.queue = queue;
        self
    }

    /// Use the given keep-alive for surplus workers.
    #[must_use]
    pub const fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

/// Mutable pool state, guarded by [`Shared::state`].
struct State {
    core_size: usize,
    max_size: usize,
    workers: usize,
    idle: usize,
    queue: VecDeque<Job>,
    spawned_total: u64,
}

/// State shared between pool handles and worker threads.
struct Shared {
    name: String,
    queue_kind: QueueKind,
    keep_alive: Duration,
    thread_name_prefix: String,
    state: Mutex<State>,
    work_available: Condvar,
    shutdown: AtomicBool,
    core_size: AtomicUsize,
    max_size: AtomicUsize,
    pool_size: AtomicUsize,
    queue_size: AtomicUsize,
    active_count: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mirror the locked counters into the lock-free snapshot fields.
    fn publish(&self, state: &State) {
        self.core_size.store(state.core_size, Ordering::Release);
        self.max_size.store(state.max_size, Ordering::Release);
        self.pool_size.store(state.workers, Ordering::Release);
        self.queue_size.store(state.queue.len(), Ordering::Release);
    }

    fn queue_accepts(&self, state: &State) -> bool {
        match self.queue_kind {
            QueueKind::Unbounded => true,
            QueueKind::Bounded { capacity } => state.queue.len() < capacity,
            QueueKind::Handoff => state.idle > state.queue.len(),
        }
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn begin_shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            debug!(pool = %self.name, "pool shutting down");
        }
        // Take the lock so no worker sits between its shutdown check and wait.
        drop(self.lock());
        self.work_available.notify_all();
    }

    fn spawn_worker(self: &Arc<Self>, state: &mut State, first: Option<Job>) -> Result<(), PoolError> {
        let worker_id = state.spawned_total;
        state.spawned_total = state.spawned_total.wrapping_add(1);

        let shared = Arc::clone(self);
        thread::Builder::new()
            .name(format!("{}-{worker_id}", self.thread_name_prefix))
            .spawn(move || shared.run_worker(first))
            .map_err(|source| PoolError::Spawn {
                pool: self.name.clone(),
                source,
            })?;

        // The new thread blocks on the lock we hold, so counting it now is safe.
        state.workers = state.workers.saturating_add(1);
        self.publish(state);
        Ok(())
    }

    fn run_worker(&self, first: Option<Job>) {
        let mut next = first.or_else(|| self.next_task());
        while let Some(job) = next {
            self.active_count.fetch_add(1, Ordering::AcqRel);
            let outcome = panic::catch_unwind(AssertUnwindSafe(job));
            self.active_count.fetch_sub(1, Ordering::AcqRel);
            if outcome.is_err() {
                warn!(pool = %self.name, "task panicked, worker kept alive");
            }
            next = self.next_task();
        }
    }

    /// Block until a task is available, or return `None` when this worker
    /// should retire.
    fn next_task(&self) -> Option<Job> {
        let mut state = self.lock();
        loop {
            if state.workers > state.max_size {
                self.retire(&mut state);
                return None;
            }
            if let Some(job) = state.queue.pop_front() {
                self.publish(&state);
                return Some(job);
            }
            if self.is_shutdown() {
                self.retire(&mut state);
                return None;
            }

            let surplus = state.workers > state.core_size;
            state.idle = state.idle.saturating_add(1);
            if surplus {
                let (guard, wait) = self
                    .work_available
                    .wait_timeout(state, self.keep_alive)
                    .unwrap_or_else(PoisonError::into_inner);
                state = guard;
                state.idle = state.idle.saturating_sub(1);
                if wait.timed_out() && state.queue.is_empty() && state.workers > state.core_size {
                    self.retire(&mut state);
                    return None;
                }
            } else {
                state = self
                    .work_available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
                state.idle = state.idle.saturating_sub(1);
            }
        }
    }

    fn retire(&self, state: &mut State) {
        state.workers = state.workers.saturating_sub(1);
        self.publish(state);
        debug!(pool = %self.name, workers = state.workers, "worker retired");
    }

    /// Start workers for queued tasks after the core size grew.
    fn prestart_for_queue(self: &Arc<Self>, state: &mut State) {
        let missing = state.core_size.saturating_sub(state.workers);
        let wanted = missing.min(state.queue.len());
        for _ in 0..wanted {
            if let Err(e) = self.spawn_worker(state, None) {
                warn!(pool = %self.name, error = %e, "could not prestart worker");
                break;
            }
        }
    }

    fn update_sizing<F>(self: &Arc<Self>, choose: F) -> Result<(), PoolError>
    where
        F: FnOnce(usize, usize) -> (usize, usize),
    {
        let mut state = self.lock();
        let (core, max) = choose(state.core_size, state.max_size);
        validate_sizing(&self.name, core, max)?;

        let grew = core > state.core_size;
        state.core_size = core;
        state.max_size = max;
        if grew {
            self.prestart_for_queue(&mut state);
        }
        self.publish(&state);
        drop(state);

        // Idle workers re-check their retirement conditions.
        self.work_available.notify_all();
        debug!(pool = %self.name, core, max, "pool resized");
        Ok(())
    }
}

/// Shuts the pool down once the last [`WorkerPool`] handle is dropped.
///
/// Worker threads hold [`Shared`] directly, not this guard, so they do not
/// keep the pool alive.
struct LifetimeGuard {
    shared: Arc<Shared>,
}

impl Drop for LifetimeGuard {
    fn drop(&mut self) {
        self.shared.begin_shutdown();
    }
}

/// Cloneable handle to a resizable pool of worker threads.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<Shared>,
    _lifetime: Arc<LifetimeGuard>,
}

impl WorkerPool {
    /// Create a pool. No worker threads start until work arrives.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidSizing`] if `core_size > max_size` or
    /// `max_size == 0`.
    pub fn new(name: &str, options: WorkerPoolOptions) -> Result<Self, PoolError> {
        validate_sizing(name, options.core_size, options.max_size)?;

        let shared = Arc::new(Shared {
            name: name.to_owned(),
            queue_kind: options.queue,
            keep_alive: options.keep_alive,
            thread_name_prefix: options.thread_name_prefix.unwrap_or_else(|| name.to_owned()),
            state: Mutex::new(State {
                core_size: options.core_size,
                max_size: options.max_size,
                workers: 0,
                idle: 0,
                queue: VecDeque::new(),
                spawned_total: 0,
            }),
            work_available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            core_size: AtomicUsize::new(options.core_size),
            max_size: AtomicUsize::new(options.max_size),
            pool_size: AtomicUsize::new(0),
            queue_size: AtomicUsize::new(0),
            active_count: AtomicUsize::new(0),
        });

        Ok(Self {
            _lifetime: Arc::new(LifetimeGuard {
                shared: Arc::clone(&shared),
            }),
            shared,
        })
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Queueing discipline.
    pub fn queue_kind(&self) -> QueueKind {
        self.shared.queue_kind
    }

    /// Submit a task.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Shutdown`] after [`shutdown`](Self::shutdown),
    /// [`PoolError::Rejected`] when saturated, or [`PoolError::Spawn`] if a
    /// needed worker thread could not be started.
    pub fn execute<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let shared = &self.shared;
        if shared.is_shutdown() {
            return Err(PoolError::Shutdown {
                pool: shared.name.clone(),
            });
        }

        let job: Job = Box::new(job);
        let mut state = shared.lock();

        if state.workers < state.core_size {
            return shared.spawn_worker(&mut state, Some(job));
        }

        if shared.queue_accepts(&state) {
            state.queue.push_back(job);
            if state.workers == 0 {
                // core_size == 0: someone still has to drain the queue.
                if let Err(e) = shared.spawn_worker(&mut state, None) {
                    warn!(pool = %shared.name, error = %e, "queued task has no worker");
                }
            }
            shared.publish(&state);
            drop(state);
            shared.work_available.notify_one();
            return Ok(());
        }

        if state.workers < state.max_size {
            return shared.spawn_worker(&mut state, Some(job));
        }

        Err(PoolError::Rejected {
            pool: shared.name.clone(),
        })
    }

    /// Current core size.
    pub fn core_size(&self) -> usize {
        self.shared.core_size.load(Ordering::Acquire)
    }

    /// Current max size.
    pub fn max_size(&self) -> usize {
        self.shared.max_size.load(Ordering::Acquire)
    }

    /// Workers currently running a task.
    pub fn active_count(&self) -> usize {
        self.shared.active_count.load(Ordering::Acquire)
    }

    /// Workers currently alive.
    pub fn pool_size(&self) -> usize {
        self.shared.pool_size.load(Ordering::Acquire)
    }

    /// Tasks waiting in the queue.
    pub fn queue_size(&self) -> usize {
        self.shared.queue_size.load(Ordering::Acquire)
    }

    /// Free queue slots.
    pub fn remaining_capacity(&self) -> RemainingCapacity {
        self.shared.queue_kind.remaining(self.queue_size())
    }

    /// Change the core size, keeping the max size.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidSizing`] if `core_size` exceeds the
    /// current max size. The pool is left unchanged.
    pub fn set_core_size(&self, core_size: usize) -> Result<(), PoolError> {
        self.shared.update_sizing(|_, max| (core_size, max))
    }

    /// Change the max size, keeping the core size.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidSizing`] if `max_size` is zero or below
    /// the current core size. The pool is left unchanged.
    pub fn set_max_size(&self, max_size: usize) -> Result<(), PoolError> {
        self.shared.update_sizing(|core, _| (core, max_size))
    }

    /// Change both sizes in one step.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidSizing`] if `core_size > max_size` or
    /// `max_size == 0`. The pool is left unchanged.
    pub fn resize(&self, core_size: usize, max_size: usize) -> Result<(), PoolError> {
        self.shared.update_sizing(|_, _| (core_size, max_size))
    }

    /// Stop accepting work. Queued tasks still run; workers then exit.
    pub fn shutdown(&self) {
        self.shared.begin_shutdown();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }
}

impl core::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.shared.name)
            .field("queue", &self.shared.queue_kind)
            .field("core_size", &self.core_size())
            .field("max_size", &self.max_size())
            .field("pool_size", &self.pool_size())
            .finish_non_exhaustive()
    }
}

fn validate_sizing(pool: &str, core: usize, max: usize) -> Result<(), PoolError> {
    if max == 0 || core > max {
        return Err(PoolError::InvalidSizing {
            pool: pool.to_owned(),
            core,
            max,
        });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::mpsc;
    use std::time::Instant;

    use super::*;

    fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    /// Submit a task that blocks until the returned sender is used or dropped.
    fn submit_blocking(pool: &WorkerPool) -> Result<mpsc::Sender<()>, PoolError> {
        let (release, gate) = mpsc::channel::<()>();
        pool.execute(move || {
            let _ = gate.recv();
        })?;
        Ok(release)
    }

    #[test]
    fn new_rejects_bad_sizing() {
        assert!(matches!(
            WorkerPool::new("p", WorkerPoolOptions::new(5, 2)),
            Err(PoolError::InvalidSizing { core: 5, max: 2, .. })
        ));
        assert!(WorkerPool::new("p", WorkerPoolOptions::new(0, 0)).is_err());
        assert!(WorkerPool::new("p", WorkerPoolOptions::new(0, 1)).is_ok());
    }

    #[test]
    fn fresh_pool_reports_zero_counters() {
        let pool = WorkerPool::new(
            "fresh",
            WorkerPoolOptions::new(2, 4).with_queue(QueueKind::Bounded { capacity: 8 }),
        )
        .unwrap();
        assert_eq!(pool.core_size(), 2);
        assert_eq!(pool.max_size(), 4);
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.pool_size(), 0);
        assert_eq!(pool.queue_size(), 0);
        assert_eq!(pool.remaining_capacity(), RemainingCapacity::Bounded(8));
    }

    #[test]
    fn queue_labels_and_capacity() {
        assert_eq!(QueueKind::Unbounded.remaining(100), RemainingCapacity::Unbounded);
        assert_eq!(QueueKind::Handoff.remaining(0), RemainingCapacity::Bounded(0));
        assert_eq!(
            QueueKind::Bounded { capacity: 3 }.remaining(1),
            RemainingCapacity::Bounded(2)
        );
        assert_eq!(QueueKind::Handoff.label(), "HandoffQueue");
    }

    #[test]
    fn runs_submitted_tasks() {
        let pool = WorkerPool::new("run", WorkerPoolOptions::new(2, 2)).unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            pool.execute(move || {
                let _ = tx.send(i);
            })
            .unwrap();
        }
        let mut seen: Vec<i32> = (0..10)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert!(pool.pool_size() <= 2);
    }

    #[test]
    fn saturated_bounded_pool_rejects() {
        let pool = WorkerPool::new(
            "tight",
            WorkerPoolOptions::new(1, 1).with_queue(QueueKind::Bounded { capacity: 1 }),
        )
        .unwrap();

        let release = submit_blocking(&pool).unwrap();
        assert!(wait_until(Duration::from_secs(5), || pool.active_count() == 1));

        pool.execute(|| {}).unwrap();
        assert_eq!(pool.queue_size(), 1);
        assert_eq!(pool.remaining_capacity(), RemainingCapacity::Bounded(0));

        assert!(matches!(pool.execute(|| {}), Err(PoolError::Rejected { .. })));

        drop(release);
        assert!(wait_until(Duration::from_secs(5), || {
            pool.queue_size() == 0 && pool.active_count() == 0
        }));
    }

    #[test]
    fn raising_max_admits_extra_workers() {
        let pool = WorkerPool::new(
            "grow",
            WorkerPoolOptions::new(1, 1).with_queue(QueueKind::Bounded { capacity: 1 }),
        )
        .unwrap();
        let first = submit_blocking(&pool).unwrap();
        assert!(wait_until(Duration::from_secs(5), || pool.active_count() == 1));
        pool.execute(|| {}).unwrap();

        pool.set_max_size(2).unwrap();
        let second = submit_blocking(&pool).unwrap();
        assert_eq!(pool.pool_size(), 2);

        drop(first);
        drop(second);
    }

    #[test]
    fn growing_core_starts_workers_for_queued_tasks() {
        let pool = WorkerPool::new("prestart", WorkerPoolOptions::new(1, 4)).unwrap();
        let blocker = submit_blocking(&pool).unwrap();
        assert!(wait_until(Duration::from_secs(5), || pool.active_count() == 1));

        let (tx, rx) = mpsc::channel();
        for i in 0..2 {
            let tx = tx.clone();
            pool.execute(move || {
                let _ = tx.send(i);
            })
            .unwrap();
        }
        assert_eq!(pool.queue_size(), 2);

        pool.set_core_size(3).unwrap();
        for _ in 0..2 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert!(pool.pool_size() >= 2);
        drop(blocker);
    }

    #[test]
    fn invalid_resize_leaves_pool_unchanged() {
        let pool = WorkerPool::new("fixed", WorkerPoolOptions::new(2, 10)).unwrap();

        assert!(pool.resize(12, 10).is_err());
        assert!(pool.set_core_size(11).is_err());
        assert!(pool.set_max_size(1).is_err());
        assert!(pool.set_max_size(0).is_err());
        assert_eq!((pool.core_size(), pool.max_size()), (2, 10));

        pool.resize(12, 15).unwrap();
        assert_eq!((pool.core_size(), pool.max_size()), (12, 15));
    }

    #[test]
    fn surplus_workers_retire_after_keep_alive() {
        let pool = WorkerPool::new(
            "elastic",
            WorkerPoolOptions::new(1, 2)
                .with_queue(QueueKind::Handoff)
                .with_keep_alive(Duration::from_millis(50)),
        )
        .unwrap();

        let a = submit_blocking(&pool).unwrap();
        let b = submit_blocking(&pool).unwrap();
        assert_eq!(pool.pool_size(), 2);

        drop(a);
        drop(b);
        assert!(wait_until(Duration::from_secs(5), || pool.pool_size() == 1));
    }

    #[test]
    fn lowering_max_retires_idle_workers() {
        let pool = WorkerPool::new("shrink", WorkerPoolOptions::new(3, 3)).unwrap();
        let gates: Vec<_> = (0..3).map(|_| submit_blocking(&pool).unwrap()).collect();
        assert_eq!(pool.pool_size(), 3);
        drop(gates);
        assert!(wait_until(Duration::from_secs(5), || pool.active_count() == 0));

        pool.resize(1, 1).unwrap();
        assert!(wait_until(Duration::from_secs(5), || pool.pool_size() == 1));
    }

    #[test]
    #[allow(clippy::panic)]
    fn panicking_task_does_not_kill_worker() {
        let pool = WorkerPool::new("sturdy", WorkerPoolOptions::new(1, 1)).unwrap();
        pool.execute(|| panic!("task failure")).unwrap();

        let (tx, rx) = mpsc::channel();
        pool.execute(move || {
            let _ = tx.send(());
        })
        .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(pool.pool_size(), 1);
    }

    #[test]
    fn shutdown_drains_queue_and_rejects_new_work() {
        let pool = WorkerPool::new("closing", WorkerPoolOptions::new(1, 1)).unwrap();
        let blocker = submit_blocking(&pool).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.execute(move || {
            let _ = tx.send(());
        })
        .unwrap();

        pool.shutdown();
        assert!(pool.is_shutdown());
        assert!(matches!(pool.execute(|| {}), Err(PoolError::Shutdown { .. })));

        drop(blocker);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(wait_until(Duration::from_secs(5), || pool.pool_size() == 0));
    }
}

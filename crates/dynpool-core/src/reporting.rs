//! Periodic reporting of pool snapshots to the registry.
//!
//! Each cycle of [`ReportingJob`] runs three steps in order:
//!
//! 1. snapshot every pool through the [`PoolInspectorService`];
//! 2. replace the registry batch with the full result;
//! 3. publish each pool's individual record.
//!
//! Failures are per call. A failed batch write or a failed record write is
//! logged and collected in the [`CycleReport`]; the remaining records are
//! still attempted and the schedule continues.
//!
//! Cycles never overlap: the next tick is only awaited after the current
//! cycle finishes, and ticks missed while a cycle overran are skipped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::registry::{Registry, RegistryError};
use crate::service::PoolInspectorService;
use crate::shutdown;

/// Default reporting cadence.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(20);

/// Scheduling parameters of a [`ReportingJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportingOptions {
    /// Time between cycle starts.
    pub interval: Duration,
    /// Start cycles on wall-clock multiples of `interval` (e.g. :00, :20, :40).
    pub align_to_interval: bool,
}

impl Default for ReportingOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REPORT_INTERVAL,
            align_to_interval: true,
        }
    }
}

/// Which registry write failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishTarget {
    /// The full batch.
    Batch,
    /// One pool's individual record.
    Pool(String),
}

/// A registry write that failed during a cycle.
#[derive(Debug)]
pub struct PublishFailure {
    /// What was being written.
    pub target: PublishTarget,
    /// Why it failed.
    pub error: RegistryError,
}

/// Outcome of one reporting cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Pools snapshotted.
    pub pools: usize,
    /// Whether the batch write succeeded.
    pub batch_published: bool,
    /// Individual records written.
    pub records_published: usize,
    /// Every failed write, in order.
    pub failures: Vec<PublishFailure>,
}

impl CycleReport {
    /// Whether every write in the cycle succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Drives the snapshot -> publish flow on a fixed cadence.
pub struct ReportingJob<R> {
    service: Arc<PoolInspectorService>,
    registry: Arc<R>,
    options: ReportingOptions,
}

impl<R: Registry> ReportingJob<R> {
    /// Create a job reporting `service`'s pools into `registry`.
    pub const fn new(
        service: Arc<PoolInspectorService>,
        registry: Arc<R>,
        options: ReportingOptions,
    ) -> Self {
        Self {
            service,
            registry,
            options,
        }
    }

    /// Scheduling parameters.
    pub const fn options(&self) -> ReportingOptions {
        self.options
    }

    /// Run one reporting cycle now.
    pub async fn run_cycle(&self) -> CycleReport {
        let app_name = self.service.app_name();
        info!(app_name, "reporting pool state");

        let snapshots = self.service.snapshot_all();
        let mut report = CycleReport {
            pools: snapshots.len(),
            ..CycleReport::default()
        };

        match self.registry.publish_batch(&snapshots).await {
            Ok(()) => {
                report.batch_published = true;
                info!(app_name, pools = snapshots.len(), "pool batch published");
            }
            Err(error) => {
                warn!(app_name, error = %error, "failed to publish pool batch");
                report.failures.push(PublishFailure {
                    target: PublishTarget::Batch,
                    error,
                });
            }
        }

        for snapshot in &snapshots {
            match self.registry.publish_one(snapshot).await {
                Ok(()) => {
                    report.records_published = report.records_published.saturating_add(1);
                    debug!(
                        app_name,
                        pool = snapshot.pool_name,
                        core_size = snapshot.core_size,
                        max_size = snapshot.max_size,
                        active_count = snapshot.active_count,
                        pool_size = snapshot.pool_size,
                        queue_size = snapshot.queue_size,
                        remaining_capacity = %snapshot.remaining_capacity,
                        "pool record published"
                    );
                }
                Err(error) => {
                    warn!(
                        app_name,
                        pool = snapshot.pool_name,
                        error = %error,
                        "failed to publish pool record"
                    );
                    report.failures.push(PublishFailure {
                        target: PublishTarget::Pool(snapshot.pool_name.clone()),
                        error,
                    });
                }
            }
        }

        info!(
            app_name,
            records_published = report.records_published,
            failures = report.failures.len(),
            "reporting cycle finished"
        );
        report
    }

    /// Run cycles until `shutdown` fires. Returns the number of cycles run.
    ///
    /// A cycle in flight when shutdown is requested runs to completion.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> u64 {
        // tokio intervals reject a zero period.
        let interval = self.options.interval.max(Duration::from_millis(1));
        info!(
            app_name = self.service.app_name(),
            interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            aligned = self.options.align_to_interval,
            "reporting job started"
        );

        if self.options.align_to_interval {
            let delay = delay_until_aligned(Utc::now(), interval);
            debug!(
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "waiting for aligned start"
            );
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = shutdown::requested(&mut shutdown) => {
                    info!(cycles = 0, "reporting job stopped");
                    return 0;
                }
            }
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut cycles: u64 = 0;
        loop {
            tokio::select! {
                biased;
                () = shutdown::requested(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }
            let report = self.run_cycle().await;
            cycles = cycles.saturating_add(1);
            if !report.is_clean() {
                warn!(
                    cycle = cycles,
                    failures = report.failures.len(),
                    "reporting cycle completed with failures"
                );
            }
        }

        info!(cycles, "reporting job stopped");
        cycles
    }
}

/// Time from `now` until the next wall-clock instant that is a whole
/// multiple of `interval` since the Unix epoch. Zero when `now` is aligned.
pub fn delay_until_aligned(now: DateTime<Utc>, interval: Duration) -> Duration {
    let interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    let now_ms = u64::try_from(now.timestamp_millis()).unwrap_or(0);
    match now_ms.checked_rem(interval_ms) {
        Some(0) | None => Duration::ZERO,
        Some(rem) => Duration::from_millis(interval_ms.saturating_sub(rem)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::TimeZone;
    use dynpool_types::PoolConfig;

    use super::*;
    use crate::pool::{WorkerPool, WorkerPoolOptions};
    use crate::registry::InMemoryRegistry;
    use crate::service::PoolSet;

    /// Logs the order of writes.
    #[derive(Default)]
    struct RecordingRegistry {
        calls: Mutex<Vec<&'static str>>,
    }

    impl RecordingRegistry {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Registry for RecordingRegistry {
        async fn publish_batch(&self, _snapshots: &[PoolConfig]) -> Result<(), RegistryError> {
            self.calls.lock().unwrap().push("batch");
            Ok(())
        }

        async fn publish_one(&self, _config: &PoolConfig) -> Result<(), RegistryError> {
            self.calls.lock().unwrap().push("one");
            Ok(())
        }

        async fn read_batch(&self) -> Result<Vec<PoolConfig>, RegistryError> {
            Ok(Vec::new())
        }

        async fn read_one(&self, _app: &str, _pool: &str) -> Result<Option<PoolConfig>, RegistryError> {
            Ok(None)
        }
    }

    /// Batch writes that take longer than the reporting interval.
    struct SlowRegistry {
        write_time: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        batches: AtomicUsize,
    }

    impl SlowRegistry {
        fn new(write_time: Duration) -> Self {
            Self {
                write_time,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                batches: AtomicUsize::new(0),
            }
        }
    }

    impl Registry for SlowRegistry {
        async fn publish_batch(&self, _snapshots: &[PoolConfig]) -> Result<(), RegistryError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst).saturating_add(1);
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.write_time).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.batches.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn publish_one(&self, _config: &PoolConfig) -> Result<(), RegistryError> {
            Ok(())
        }

        async fn read_batch(&self) -> Result<Vec<PoolConfig>, RegistryError> {
            Ok(Vec::new())
        }

        async fn read_one(&self, _app: &str, _pool: &str) -> Result<Option<PoolConfig>, RegistryError> {
            Ok(None)
        }
    }

    fn service() -> Arc<PoolInspectorService> {
        let pools: PoolSet = [("io", 2, 10), ("cpu", 4, 4)]
            .into_iter()
            .map(|(name, core, max)| {
                (
                    name.to_owned(),
                    WorkerPool::new(name, WorkerPoolOptions::new(core, max)).unwrap(),
                )
            })
            .collect();
        Arc::new(PoolInspectorService::new("orders", pools))
    }

    fn job(registry: &Arc<InMemoryRegistry>, options: ReportingOptions) -> ReportingJob<InMemoryRegistry> {
        ReportingJob::new(service(), Arc::clone(registry), options)
    }

    #[tokio::test]
    async fn cycle_publishes_batch_then_every_record() {
        let registry = Arc::new(InMemoryRegistry::default());
        let report = job(&registry, ReportingOptions::default()).run_cycle().await;

        assert!(report.is_clean());
        assert!(report.batch_published);
        assert_eq!(report.pools, 2);
        assert_eq!(report.records_published, 2);

        let batch = registry.read_batch().await.unwrap();
        assert_eq!(batch.len(), 2);
        let io = registry.read_one("orders", "io").await.unwrap().unwrap();
        assert_eq!((io.core_size, io.max_size), (2, 10));
        assert!(registry.read_one("orders", "cpu").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cycle_writes_batch_before_records() {
        let registry = Arc::new(RecordingRegistry::default());
        let job = ReportingJob::new(service(), Arc::clone(&registry), ReportingOptions::default());

        assert!(job.run_cycle().await.is_clean());
        assert_eq!(registry.calls(), vec!["batch", "one", "one"]);
    }

    #[tokio::test]
    async fn failing_pool_does_not_block_others() {
        let registry = Arc::new(InMemoryRegistry::default());
        registry.fail_pool("io");
        let report = job(&registry, ReportingOptions::default()).run_cycle().await;

        assert!(report.batch_published);
        assert_eq!(report.records_published, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            report.failures.first().map(|f| f.target.clone()),
            Some(PublishTarget::Pool("io".to_owned()))
        );
        assert!(registry.read_one("orders", "cpu").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failing_batch_still_publishes_records() {
        let registry = Arc::new(InMemoryRegistry::default());
        registry.fail_batch(true);
        let report = job(&registry, ReportingOptions::default()).run_cycle().await;

        assert!(!report.batch_published);
        assert_eq!(report.records_published, 2);
        assert_eq!(
            report.failures.first().map(|f| f.target.clone()),
            Some(PublishTarget::Batch)
        );
    }

    #[tokio::test]
    async fn empty_service_clears_batch() {
        let registry = Arc::new(InMemoryRegistry::default());
        registry
            .publish_batch(&[dynpool_types::PoolConfig::new("orders", "stale")])
            .await
            .unwrap();

        let empty = Arc::new(PoolInspectorService::new("orders", PoolSet::new()));
        let job = ReportingJob::new(empty, Arc::clone(&registry), ReportingOptions::default());
        let report = job.run_cycle().await;

        assert_eq!(report.pools, 0);
        assert!(registry.read_batch().await.unwrap().is_empty());
    }

    #[test]
    fn alignment_to_twenty_seconds() {
        let interval = Duration::from_secs(20);
        let at = |s| Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, s).unwrap();
        assert_eq!(delay_until_aligned(at(0), interval), Duration::ZERO);
        assert_eq!(delay_until_aligned(at(20), interval), Duration::ZERO);
        assert_eq!(delay_until_aligned(at(5), interval), Duration::from_secs(15));
        assert_eq!(delay_until_aligned(at(59), interval), Duration::from_secs(1));
    }

    #[test]
    fn zero_interval_never_waits() {
        assert_eq!(delay_until_aligned(Utc::now(), Duration::ZERO), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn runs_on_cadence_until_shutdown() {
        let registry = Arc::new(InMemoryRegistry::default());
        let job = Arc::new(job(
            &registry,
            ReportingOptions {
                interval: Duration::from_secs(20),
                align_to_interval: false,
            },
        ));
        let (stop, signal) = shutdown::channel();

        let handle = tokio::spawn({
            let job = Arc::clone(&job);
            async move { job.run(signal).await }
        });

        // Ticks fire at 0s, 20s, 40s and 60s.
        tokio::time::sleep(Duration::from_secs(61)).await;
        stop.send(true).unwrap();
        let cycles = handle.await.unwrap();

        assert!((3..=4).contains(&cycles), "unexpected cycle count {cycles}");
        assert_eq!(registry.read_batch().await.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn overrunning_cycles_never_overlap() {
        let registry = Arc::new(SlowRegistry::new(Duration::from_secs(50)));
        let job = Arc::new(ReportingJob::new(
            service(),
            Arc::clone(&registry),
            ReportingOptions {
                interval: Duration::from_secs(20),
                align_to_interval: false,
            },
        ));
        let (stop, signal) = shutdown::channel();

        let handle = tokio::spawn({
            let job = Arc::clone(&job);
            async move { job.run(signal).await }
        });

        // Cycles start at 0s, 50s, 100s and 150s; the one in flight at
        // shutdown finishes at 200s.
        tokio::time::sleep(Duration::from_secs(185)).await;
        stop.send(true).unwrap();
        let cycles = handle.await.unwrap();

        assert_eq!(cycles, 4);
        assert_eq!(registry.batches.load(Ordering::SeqCst), 4);
        assert_eq!(registry.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_before_aligned_start_runs_nothing() {
        let registry = Arc::new(InMemoryRegistry::default());
        let job = job(&registry, ReportingOptions::default());
        let (stop, signal) = shutdown::channel();
        stop.send(true).unwrap();

        let cycles = job.run(signal).await;
        // An aligned instant may coincide with now, in which case one tick can race in.
        assert!(cycles <= 1);
    }
}

//! Optional per-context counters, enabled by the `metrics` feature.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters updated by an execution context as it runs.
#[derive(Debug)]
pub struct Metrics {
    /// Jobs accepted by the context's queue.
    pub jobs_posted: AtomicU64,
    /// Jobs taken off the queue and executed.
    pub jobs_executed: AtomicU64,
    pub timer_waits_started: AtomicU64,
    /// Waits completed because their deadline passed.
    pub timer_waits_fired: AtomicU64,
    /// Waits completed early by `Timer::cancel`.
    pub timer_waits_cancelled: AtomicU64,
    /// Time when metrics collection started.
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            jobs_posted: AtomicU64::new(0),
            jobs_executed: AtomicU64::new(0),
            timer_waits_started: AtomicU64::new(0),
            timer_waits_fired: AtomicU64::new(0),
            timer_waits_cancelled: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Returns a snapshot of current metrics values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_posted: self.jobs_posted.load(Ordering::Relaxed),
            jobs_executed: self.jobs_executed.load(Ordering::Relaxed),
            timer_waits_started: self.timer_waits_started.load(Ordering::Relaxed),
            timer_waits_fired: self.timer_waits_fired.load(Ordering::Relaxed),
            timer_waits_cancelled: self.timer_waits_cancelled.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub jobs_posted: u64,
    pub jobs_executed: u64,
    pub timer_waits_started: u64,
    pub timer_waits_fired: u64,
    pub timer_waits_cancelled: u64,
    pub elapsed_seconds: f64,
}

impl MetricsSnapshot {
    /// Calculates jobs per second throughput.
    pub fn jobs_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.jobs_executed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Approximates queue depth (posted - executed).
    pub fn pending_jobs(&self) -> i64 {
        self.jobs_posted as i64 - self.jobs_executed as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExecutionContext, Executor, Job, Timer};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_metrics_creation() {
        let snapshot = Metrics::new().snapshot();
        assert_eq!(snapshot.jobs_posted, 0);
        assert_eq!(snapshot.jobs_executed, 0);
        assert_eq!(snapshot.timer_waits_fired, 0);
        assert!(snapshot.elapsed_seconds >= 0.0);
    }

    #[test]
    fn test_throughput_calculation() {
        let metrics = Metrics::new();
        metrics.jobs_posted.fetch_add(100, Ordering::Relaxed);
        metrics.jobs_executed.fetch_add(98, Ordering::Relaxed);

        thread::sleep(Duration::from_millis(10));
        let snapshot = metrics.snapshot();

        assert!(snapshot.jobs_per_second() > 0.0);
        assert_eq!(snapshot.pending_jobs(), 2);
    }

    #[test]
    fn test_context_records_jobs_and_timers() {
        let ctx = ExecutionContext::new();
        ctx.executor().post(Job::new(|| {}));
        let fired = Timer::new(&ctx);
        fired.async_wait(|_: crate::Result<()>| {});
        let cancelled = Timer::after(&ctx, Duration::from_secs(3600));
        cancelled.async_wait(|_: crate::Result<()>| {});
        cancelled.cancel();

        ctx.run();
        let snapshot = ctx.metrics();
        assert_eq!(snapshot.timer_waits_started, 2);
        assert_eq!(snapshot.timer_waits_fired, 1);
        assert_eq!(snapshot.timer_waits_cancelled, 1);
        // One plain job plus two completion jobs
        assert_eq!(snapshot.jobs_posted, 3);
        assert_eq!(snapshot.jobs_executed, 3);
    }
}

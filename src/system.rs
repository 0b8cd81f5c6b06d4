//! The process-wide system executor.
//!
//! Backed by a lazily created execution context with one worker thread per
//! available core. A permanent work guard keeps its run loop alive for the
//! life of the process.

use crate::execution_context::{ExecutionContext, IoExecutor};
use crate::executor::{AnyExecutor, Executor, WorkGuard};
use crate::job::Job;
use crate::worker::WorkerPool;
use lazy_static::lazy_static;
use std::thread;
use tracing::debug;

struct SystemContext {
    executor: IoExecutor,
    _work: WorkGuard,
    _workers: WorkerPool,
    _context: ExecutionContext,
}

impl SystemContext {
    fn new() -> Self {
        let context = ExecutionContext::new();
        let executor = context.executor();
        let work = WorkGuard::new(executor.clone());
        let threads = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let workers = WorkerPool::new(&context, threads);
        debug!(threads, "system executor started");

        SystemContext {
            executor,
            _work: work,
            _workers: workers,
            _context: context,
        }
    }
}

lazy_static! {
    static ref SYSTEM: SystemContext = SystemContext::new();
}

/// Executor for work that is not tied to any particular context.
///
/// Jobs run on a shared pool of background threads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn post(&self, job: Job) {
        SYSTEM.executor.post(job);
    }

    fn running_in_this_thread(&self) -> bool {
        SYSTEM.executor.running_in_this_thread()
    }

    fn on_work_started(&self) {
        SYSTEM.executor.on_work_started();
    }

    fn on_work_finished(&self) {
        SYSTEM.executor.on_work_finished();
    }
}

impl From<SystemExecutor> for AnyExecutor {
    fn from(executor: SystemExecutor) -> Self {
        AnyExecutor::new(executor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_system_executor_runs_jobs_in_background() {
        let (tx, rx) = mpsc::channel();
        SystemExecutor.post(Job::new(move || {
            tx.send(SystemExecutor.running_in_this_thread()).unwrap();
        }));

        let inside = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(inside);
        assert!(!SystemExecutor.running_in_this_thread());
    }
}

//! The executor abstraction shared by contexts, strands and the system executor.

use crate::job::Job;
use std::fmt;
use std::sync::Arc;

/// An object that accepts jobs for later execution by a run loop.
///
/// Implementations track outstanding work so that the owning run loop does
/// not report "no work" while a caller still expects jobs to arrive.
pub trait Executor: Send + Sync + 'static {
    /// Queues the job. Never runs it inline.
    fn post(&self, job: Job);

    /// Runs the job inline when this thread is already running the executor,
    /// otherwise queues it.
    fn dispatch(&self, job: Job) {
        if self.running_in_this_thread() {
            job.execute();
        } else {
            self.post(job);
        }
    }

    /// Returns true if the calling thread is currently executing a job of
    /// this executor.
    fn running_in_this_thread(&self) -> bool;

    fn on_work_started(&self);

    fn on_work_finished(&self);
}

/// A type-erased, reference-counted executor handle.
#[derive(Clone)]
pub struct AnyExecutor {
    inner: Arc<dyn Executor>,
}

impl AnyExecutor {
    pub fn new<E: Executor>(executor: E) -> Self {
        AnyExecutor {
            inner: Arc::new(executor),
        }
    }
}

impl Executor for AnyExecutor {
    fn post(&self, job: Job) {
        self.inner.post(job);
    }

    fn dispatch(&self, job: Job) {
        self.inner.dispatch(job);
    }

    fn running_in_this_thread(&self) -> bool {
        self.inner.running_in_this_thread()
    }

    fn on_work_started(&self) {
        self.inner.on_work_started();
    }

    fn on_work_finished(&self) {
        self.inner.on_work_finished();
    }
}

impl fmt::Debug for AnyExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyExecutor").finish_non_exhaustive()
    }
}

/// Keeps an executor's outstanding-work count raised while alive.
#[derive(Debug)]
pub struct WorkGuard {
    executor: AnyExecutor,
}

impl WorkGuard {
    pub fn new(executor: impl Into<AnyExecutor>) -> Self {
        let executor = executor.into();
        executor.on_work_started();
        WorkGuard { executor }
    }

    pub fn executor(&self) -> &AnyExecutor {
        &self.executor
    }
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        self.executor.on_work_finished();
    }
}

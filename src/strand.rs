//! Strands: serialized execution on top of another executor.
//!
//! A strand keeps its own lock-free FIFO of jobs and a count of jobs not yet
//! finished. Only the submission that raises the count from zero schedules a
//! drain on the underlying executor; each drain runs exactly one job and
//! reschedules itself while jobs remain. At most one strand job therefore
//! runs at any time, in submission order.

use crate::call_stack::{self, CallStackGuard};
use crate::executor::{AnyExecutor, Executor};
use crate::job::Job;
use crossbeam::queue::SegQueue;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

struct StrandInner {
    executor: AnyExecutor,
    queue: SegQueue<Job>,
    pending: AtomicUsize,
}

impl StrandInner {
    fn key(&self) -> usize {
        self as *const Self as usize
    }

    fn schedule(self: &Arc<Self>) {
        let drain = Drain {
            strand: Some(Arc::clone(self)),
        };
        self.executor
            .post(Job::labeled("strand", move || drain.run()));
    }

    fn run_one(self: &Arc<Self>) {
        let _release = Release(self);
        if let Some(job) = self.queue.pop() {
            let _running = CallStackGuard::enter(self.key());
            trace!(label = job.label(), "executing strand job");
            job.execute();
        }
    }

    /// Drops every queued job. Used when the underlying executor discarded
    /// the drain without running it.
    fn abandon(&self) {
        let mut dropped = 0;
        while let Some(job) = self.queue.pop() {
            drop(job);
            dropped += 1;
        }
        self.pending.store(0, Ordering::Release);
        trace!(dropped, "strand drain discarded");
    }
}

/// Releases the running slot after a job; reschedules if more are queued.
struct Release<'a>(&'a Arc<StrandInner>);

impl Drop for Release<'_> {
    fn drop(&mut self) {
        if self.0.pending.fetch_sub(1, Ordering::AcqRel) > 1 {
            self.0.schedule();
        }
    }
}

/// The drain job posted to the underlying executor.
struct Drain {
    strand: Option<Arc<StrandInner>>,
}

impl Drain {
    fn run(mut self) {
        if let Some(strand) = self.strand.take() {
            strand.run_one();
        }
    }
}

impl Drop for Drain {
    fn drop(&mut self) {
        if let Some(strand) = self.strand.take() {
            strand.abandon();
        }
    }
}

/// An executor that runs its jobs one at a time, in FIFO order.
#[derive(Clone)]
pub struct Strand {
    inner: Arc<StrandInner>,
}

impl Strand {
    pub fn new(executor: impl Into<AnyExecutor>) -> Self {
        Strand {
            inner: Arc::new(StrandInner {
                executor: executor.into(),
                queue: SegQueue::new(),
                pending: AtomicUsize::new(0),
            }),
        }
    }

    /// The executor the strand's jobs ultimately run on.
    pub fn inner_executor(&self) -> &AnyExecutor {
        &self.inner.executor
    }
}

impl Executor for Strand {
    fn post(&self, job: Job) {
        self.inner.queue.push(job);
        if self.inner.pending.fetch_add(1, Ordering::AcqRel) == 0 {
            self.inner.schedule();
        }
    }

    fn running_in_this_thread(&self) -> bool {
        call_stack::contains(self.inner.key())
    }

    fn on_work_started(&self) {
        self.inner.executor.on_work_started();
    }

    fn on_work_finished(&self) {
        self.inner.executor.on_work_finished();
    }
}

impl From<Strand> for AnyExecutor {
    fn from(strand: Strand) -> Self {
        AnyExecutor::new(strand)
    }
}

impl PartialEq for Strand {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Strand {}

impl fmt::Debug for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strand")
            .field("pending", &self.inner.pending.load(Ordering::Relaxed))
            .finish()
    }
}

//! Worker threads driving an execution context.
//!
//! Each worker calls [`ExecutionContext::run`] until the context stops or runs
//! out of work. A panic escaping a job (an unhandled frame panic) is logged
//! and counted; the worker then re-enters the run loop.

use crate::execution_context::{ContextInner, ExecutionContext};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

/// A thread running one context's run loop.
pub struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn new(id: usize, context: Arc<ContextInner>, panics: Arc<AtomicUsize>) -> Self {
        let handle = thread::spawn(move || Worker::run_loop(id, context, panics));

        Worker {
            id,
            handle: Some(handle),
        }
    }

    fn run_loop(id: usize, context: Arc<ContextInner>, panics: Arc<AtomicUsize>) {
        debug!(worker = id, "worker started");
        loop {
            match catch_unwind(AssertUnwindSafe(|| context.run())) {
                Ok(executed) => {
                    debug!(worker = id, executed, "worker finished");
                    break;
                }
                Err(payload) => {
                    let message = crate::error::panic_message(&*payload);
                    error!(worker = id, %message, "job panicked on worker thread");
                    panics.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }

    /// Returns the worker's ID.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Waits for the worker thread to finish.
    fn join(mut self) -> thread::Result<()> {
        if let Some(handle) = self.handle.take() {
            handle.join()
        } else {
            Ok(())
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            // Panics are counted by the run loop
            let _ = handle.join();
        }
    }
}

/// A fixed set of threads all running the same execution context.
///
/// Dropping the pool waits for its threads like [`WorkerPool::join`], so it
/// blocks until the context stops or runs out of work.
pub struct WorkerPool {
    workers: Vec<Worker>,
    panics: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Starts `num_threads` threads calling `run` on `ctx`.
    pub fn new(ctx: &ExecutionContext, num_threads: usize) -> Self {
        let panics = Arc::new(AtomicUsize::new(0));
        let workers = (0..num_threads)
            .map(|id| Worker::new(id, Arc::clone(ctx.inner()), Arc::clone(&panics)))
            .collect();

        WorkerPool { workers, panics }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    /// Waits for every worker to return from the run loop.
    ///
    /// Fails with the number of panics observed by the workers.
    pub fn join(self) -> Result<(), usize> {
        for worker in self.workers {
            // Panics are caught inside the loop; a join error is not expected
            let _ = worker.join();
        }
        match self.panics.load(Ordering::SeqCst) {
            0 => Ok(()),
            n => Err(n),
        }
    }
}

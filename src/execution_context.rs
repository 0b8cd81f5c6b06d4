//! The execution context: a run loop over a queue of ready jobs and timers.
//!
//! An `ExecutionContext` owns the ready queue, the timer queue and the
//! outstanding-work count. Any number of threads may call [`ExecutionContext::run`]
//! concurrently; jobs are handed out in FIFO order. The context reports "no
//! work" (and stops) once nothing is queued, no timer wait is pending and no
//! frame bound to it is still alive.

use crate::call_stack::{self, CallStackGuard};
use crate::counter::Counter;
use crate::error::{Error, Result};
use crate::executor::{AnyExecutor, Executor};
use crate::handler::Handler;
use crate::job::Job;
use crate::timer::{PendingWait, TimerQueue};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

#[cfg(feature = "metrics")]
use crate::metrics::{Metrics, MetricsSnapshot};
#[cfg(feature = "metrics")]
use std::sync::atomic::Ordering;

#[derive(Default)]
struct State {
    ready: VecDeque<Job>,
    timers: TimerQueue,
    stopped: bool,
    shut_down: bool,
}

pub(crate) struct ContextInner {
    state: Mutex<State>,
    wakeup: Condvar,
    outstanding: Counter,
    #[cfg(feature = "metrics")]
    metrics: Metrics,
}

/// Decrements the outstanding-work count once a job finishes, even if the
/// job unwinds.
struct JobFinished<'a>(&'a ContextInner);

impl Drop for JobFinished<'_> {
    fn drop(&mut self) {
        self.0.work_finished();
    }
}

impl ContextInner {
    fn new() -> Self {
        ContextInner {
            state: Mutex::new(State::default()),
            wakeup: Condvar::new(),
            outstanding: Counter::new(0),
            #[cfg(feature = "metrics")]
            metrics: Metrics::new(),
        }
    }

    fn key(&self) -> usize {
        self as *const Self as usize
    }

    pub(crate) fn post(&self, job: Job) {
        let mut state = self.state.lock();
        if state.shut_down {
            drop(state);
            trace!(label = job.label(), "context shut down; dropping job");
            drop(job);
            return;
        }
        self.outstanding.increment();
        state.ready.push_back(job);
        self.wakeup.notify_one();
        #[cfg(feature = "metrics")]
        self.metrics.jobs_posted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn work_started(&self) {
        self.outstanding.increment();
    }

    /// Must not be called while holding the state lock.
    pub(crate) fn work_finished(&self) {
        if self.outstanding.decrement() {
            let _state = self.state.lock();
            self.wakeup.notify_all();
        }
    }

    pub(crate) fn run(self: &Arc<Self>) -> usize {
        let mut executed = 0;
        while self.run_one(true) == 1 {
            executed += 1;
        }
        executed
    }

    /// Executes at most one job, waiting for one to become ready if `block`.
    pub(crate) fn run_one(self: &Arc<Self>, block: bool) -> usize {
        let _running = CallStackGuard::enter(self.key());
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return 0;
            }

            let expired = state.timers.take_expired(Instant::now());
            if !expired.is_empty() {
                drop(state);
                #[cfg(feature = "metrics")]
                self.metrics
                    .timer_waits_fired
                    .fetch_add(expired.len() as u64, Ordering::Relaxed);
                self.complete_waits(expired, || Ok(()));
                state = self.state.lock();
                continue;
            }

            if let Some(job) = state.ready.pop_front() {
                drop(state);
                self.execute(job);
                return 1;
            }

            if self.outstanding.is_complete() {
                state.stopped = true;
                self.wakeup.notify_all();
                debug!("execution context out of work; stopping");
                return 0;
            }

            if !block {
                return 0;
            }

            match state.timers.next_deadline() {
                Some(deadline) => {
                    self.wakeup.wait_until(&mut state, deadline);
                }
                None => self.wakeup.wait(&mut state),
            }
        }
    }

    fn execute(&self, job: Job) {
        let _finished = JobFinished(self);
        trace!(label = job.label(), "executing job");
        #[cfg(feature = "metrics")]
        self.metrics.jobs_executed.fetch_add(1, Ordering::Relaxed);
        job.execute();
    }

    pub(crate) fn enqueue_wait(
        &self,
        timer_id: u64,
        deadline: Instant,
        handler: Handler<Result<()>>,
    ) {
        let mut state = self.state.lock();
        if state.shut_down {
            drop(state);
            drop(handler);
            return;
        }
        self.outstanding.increment();
        state.timers.insert(deadline, timer_id, handler);
        self.wakeup.notify_all();
        #[cfg(feature = "metrics")]
        self.metrics.timer_waits_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Completes every pending wait of the timer with `OperationAborted`.
    pub(crate) fn cancel_waits(self: &Arc<Self>, timer_id: u64) -> usize {
        let waits = self.state.lock().timers.take_for_timer(timer_id);
        let cancelled = waits.len();
        #[cfg(feature = "metrics")]
        self.metrics
            .timer_waits_cancelled
            .fetch_add(cancelled as u64, Ordering::Relaxed);
        self.complete_waits(waits, || Err(Error::OperationAborted));
        cancelled
    }

    /// Drops every pending wait of the timer without invoking its handler.
    pub(crate) fn discard_waits(&self, timer_id: u64) {
        let waits = self.state.lock().timers.take_for_timer(timer_id);
        let discarded = waits.len();
        drop(waits);
        for _ in 0..discarded {
            self.work_finished();
        }
    }

    fn complete_waits(
        self: &Arc<Self>,
        waits: Vec<PendingWait>,
        outcome: impl Fn() -> Result<()>,
    ) {
        let fallback = AnyExecutor::from(IoExecutor {
            inner: Arc::clone(self),
        });
        for wait in waits {
            trace!(timer = wait.timer_id, "completing timer wait");
            wait.handler.post(&fallback, outcome());
            self.work_finished();
        }
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        self.wakeup.notify_all();
    }

    fn restart(&self) {
        self.state.lock().stopped = false;
    }

    fn stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Stops the context and destroys every queued job and pending wait.
    ///
    /// Suspended frames whose only resumer is destroyed here unwind.
    fn shutdown(&self) {
        let (jobs, waits) = {
            let mut state = self.state.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            state.stopped = true;
            self.wakeup.notify_all();
            (std::mem::take(&mut state.ready), state.timers.drain())
        };

        let dropped = jobs.len() + waits.len();
        debug!(
            jobs = jobs.len(),
            waits = waits.len(),
            "shutting down execution context"
        );
        drop(jobs);
        drop(waits);
        for _ in 0..dropped {
            self.work_finished();
        }
    }
}

/// An event loop that executes jobs, fires timers and resumes frames.
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        ExecutionContext {
            inner: Arc::new(ContextInner::new()),
        }
    }

    /// Returns a handle that submits jobs to this context.
    pub fn executor(&self) -> IoExecutor {
        IoExecutor {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Runs jobs until the context is stopped or runs out of work.
    ///
    /// Blocks while work is outstanding but nothing is ready (pending timers,
    /// live frames). Returns the number of jobs executed.
    pub fn run(&self) -> usize {
        self.inner.run()
    }

    /// Runs at most one job, blocking until one is ready or the context
    /// runs out of work.
    pub fn run_one(&self) -> usize {
        self.inner.run_one(true)
    }

    /// Runs ready jobs without blocking.
    pub fn poll(&self) -> usize {
        let mut executed = 0;
        while self.inner.run_one(false) == 1 {
            executed += 1;
        }
        executed
    }

    /// Runs at most one ready job without blocking.
    pub fn poll_one(&self) -> usize {
        self.inner.run_one(false)
    }

    /// Stops the run loop. Threads inside `run` return as soon as possible.
    pub fn stop(&self) {
        debug!("execution context stop requested");
        self.inner.stop();
    }

    pub fn stopped(&self) -> bool {
        self.inner.stopped()
    }

    /// Clears the stopped flag so the context can be run again.
    pub fn restart(&self) {
        self.inner.restart();
    }

    /// Returns the current number of outstanding work units.
    pub fn outstanding_work(&self) -> usize {
        self.inner.outstanding.value()
    }

    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub(crate) fn inner(&self) -> &Arc<ContextInner> {
        &self.inner
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        ExecutionContext::new()
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("outstanding_work", &self.outstanding_work())
            .field("stopped", &self.stopped())
            .finish()
    }
}

/// Executor handle for an [`ExecutionContext`].
#[derive(Clone)]
pub struct IoExecutor {
    inner: Arc<ContextInner>,
}

impl Executor for IoExecutor {
    fn post(&self, job: Job) {
        self.inner.post(job);
    }

    fn running_in_this_thread(&self) -> bool {
        call_stack::contains(self.inner.key())
    }

    fn on_work_started(&self) {
        self.inner.work_started();
    }

    fn on_work_finished(&self) {
        self.inner.work_finished();
    }
}

impl From<IoExecutor> for AnyExecutor {
    fn from(executor: IoExecutor) -> Self {
        AnyExecutor::new(executor)
    }
}

impl PartialEq for IoExecutor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for IoExecutor {}

impl fmt::Debug for IoExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoExecutor")
            .field("context", &(self.inner.key() as *const ()))
            .finish()
    }
}

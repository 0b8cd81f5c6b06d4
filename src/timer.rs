//! Deadline timers bound to an execution context.
//!
//! A wait counts as outstanding work on its context until it completes, is
//! cancelled, or is discarded because the timer (or the context) is dropped.

use crate::error::Result;
use crate::execution_context::{ContextInner, ExecutionContext};
use crate::handler::{CompletionToken, Handler};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Roughly thirty years; stands in for deadlines that overflow `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// A timer whose waits complete once its expiry passes.
///
/// ```no_run
/// use fiberspawn::{ExecutionContext, Timer};
/// use std::time::Duration;
///
/// let ctx = ExecutionContext::new();
/// let timer = Timer::after(&ctx, Duration::from_millis(10));
/// timer.async_wait(|result: fiberspawn::Result<()>| {
///     assert!(result.is_ok());
/// });
/// ctx.run();
/// ```
pub struct Timer {
    id: u64,
    context: Arc<ContextInner>,
    expiry: Mutex<Instant>,
}

impl Timer {
    /// Creates a timer that has already expired.
    pub fn new(ctx: &ExecutionContext) -> Self {
        Timer::at(ctx, Instant::now())
    }

    pub fn after(ctx: &ExecutionContext, duration: Duration) -> Self {
        Timer::at(ctx, deadline_after(duration))
    }

    pub fn at(ctx: &ExecutionContext, deadline: Instant) -> Self {
        Timer {
            id: NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed),
            context: Arc::clone(ctx.inner()),
            expiry: Mutex::new(deadline),
        }
    }

    pub fn expiry(&self) -> Instant {
        *self.expiry.lock()
    }

    /// Sets a new expiry, cancelling pending waits.
    ///
    /// Returns the number of waits cancelled.
    pub fn expires_at(&self, deadline: Instant) -> usize {
        let cancelled = self.cancel();
        *self.expiry.lock() = deadline;
        cancelled
    }

    pub fn expires_after(&self, duration: Duration) -> usize {
        self.expires_at(deadline_after(duration))
    }

    /// Completes every pending wait with
    /// [`Error::OperationAborted`](crate::Error::OperationAborted).
    pub fn cancel(&self) -> usize {
        self.context.cancel_waits(self.id)
    }

    /// Starts an asynchronous wait for the current expiry.
    ///
    /// With a [`YieldContext`](crate::YieldContext) as the token the calling
    /// frame is suspended and the outcome is returned directly.
    pub fn async_wait<K>(&self, token: K) -> K::Output
    where
        K: CompletionToken<Result<()>>,
    {
        let deadline = self.expiry();
        token.initiate(|handler| self.context.enqueue_wait(self.id, deadline, handler))
    }
}

fn deadline_after(duration: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(duration).unwrap_or(now + FAR_FUTURE)
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.context.discard_waits(self.id);
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("id", &self.id)
            .field("expiry", &self.expiry())
            .finish()
    }
}

/// A wait registered with the context's timer queue.
pub(crate) struct PendingWait {
    pub(crate) timer_id: u64,
    pub(crate) handler: Handler<Result<()>>,
}

/// Pending waits ordered by deadline, then by registration order.
#[derive(Default)]
pub(crate) struct TimerQueue {
    waits: BTreeMap<(Instant, u64), PendingWait>,
    next_seq: u64,
}

impl TimerQueue {
    pub(crate) fn insert(
        &mut self,
        deadline: Instant,
        timer_id: u64,
        handler: Handler<Result<()>>,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.waits
            .insert((deadline, seq), PendingWait { timer_id, handler });
    }

    /// Removes and returns every wait whose deadline is not after `now`.
    pub(crate) fn take_expired(&mut self, now: Instant) -> Vec<PendingWait> {
        if self.waits.is_empty() {
            return Vec::new();
        }
        let later = self.waits.split_off(&(now, u64::MAX));
        let expired = std::mem::replace(&mut self.waits, later);
        expired.into_values().collect()
    }

    pub(crate) fn take_for_timer(&mut self, timer_id: u64) -> Vec<PendingWait> {
        let keys: Vec<(Instant, u64)> = self
            .waits
            .iter()
            .filter(|(_, wait)| wait.timer_id == timer_id)
            .map(|(key, _)| *key)
            .collect();
        keys.into_iter()
            .filter_map(|key| self.waits.remove(&key))
            .collect()
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.waits.keys().next().map(|(deadline, _)| *deadline)
    }

    pub(crate) fn drain(&mut self) -> Vec<PendingWait> {
        std::mem::take(&mut self.waits).into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn noop() -> Handler<Result<()>> {
        Handler::new(|_| {})
    }

    #[test]
    fn test_queue_orders_by_deadline() {
        let now = Instant::now();
        let mut queue = TimerQueue::default();
        queue.insert(now + Duration::from_secs(2), 2, noop());
        queue.insert(now, 1, noop());
        queue.insert(now + Duration::from_secs(5), 3, noop());

        assert_eq!(queue.next_deadline(), Some(now));
        let expired = queue.take_expired(now + Duration::from_secs(2));
        let ids: Vec<u64> = expired.iter().map(|w| w.timer_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(queue.next_deadline(), Some(now + Duration::from_secs(5)));
    }

    #[test]
    fn test_queue_take_for_timer() {
        let now = Instant::now();
        let mut queue = TimerQueue::default();
        queue.insert(now, 7, noop());
        queue.insert(now, 8, noop());
        queue.insert(now + Duration::from_secs(1), 7, noop());

        assert_eq!(queue.take_for_timer(7).len(), 2);
        assert_eq!(queue.drain().len(), 1);
        assert!(queue.next_deadline().is_none());
    }

    #[test]
    fn test_elapsed_wait_completes_ok() {
        let ctx = ExecutionContext::new();
        let timer = Timer::new(&ctx);
        let fired = Arc::new(AtomicUsize::new(0));

        let fired_clone = fired.clone();
        timer.async_wait(move |result: Result<()>| {
            assert!(result.is_ok());
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ctx.outstanding_work(), 1);

        assert_eq!(ctx.run(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(ctx.stopped());
    }

    #[test]
    fn test_cancel_aborts_wait() {
        let ctx = ExecutionContext::new();
        let timer = Timer::after(&ctx, Duration::from_secs(3600));
        let aborted = Arc::new(AtomicUsize::new(0));

        let aborted_clone = aborted.clone();
        timer.async_wait(move |result: Result<()>| {
            if matches!(result, Err(ref e) if e.is_aborted()) {
                aborted_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert_eq!(timer.cancel(), 1);
        assert_eq!(timer.cancel(), 0);
        assert_eq!(ctx.run(), 1);
        assert_eq!(aborted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_expires_after_cancels_pending() {
        let ctx = ExecutionContext::new();
        let timer = Timer::after(&ctx, Duration::from_secs(3600));
        timer.async_wait(|result: Result<()>| assert!(result.is_err()));

        let before = timer.expiry();
        assert_eq!(timer.expires_after(Duration::ZERO), 1);
        assert!(timer.expiry() <= before);
        assert_eq!(ctx.run(), 1);
    }

    #[test]
    fn test_drop_discards_wait() {
        let ctx = ExecutionContext::new();
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let timer = Timer::after(&ctx, Duration::from_secs(3600));
            let fired_clone = fired.clone();
            timer.async_wait(move |_: Result<()>| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            });
            assert_eq!(ctx.outstanding_work(), 1);
        }

        assert_eq!(ctx.outstanding_work(), 0);
        assert_eq!(ctx.run(), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(Arc::strong_count(&fired), 1);
    }

    #[test]
    fn test_overflowing_duration_saturates() {
        let ctx = ExecutionContext::new();
        let timer = Timer::after(&ctx, Duration::MAX);
        assert!(timer.expiry() > Instant::now());
    }
}

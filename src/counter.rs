//! Outstanding-work counter.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A thread-safe counter tracking outstanding work on an execution context.
///
/// Queued jobs, pending timer waits and live coroutine frames each hold one
/// unit; the context reports "out of work" only once the value drops to zero.
#[derive(Clone, Debug, Default)]
pub struct Counter {
    inner: Arc<AtomicUsize>,
}

impl Counter {
    /// Creates a new counter with the specified initial value.
    pub fn new(initial: usize) -> Self {
        Counter {
            inner: Arc::new(AtomicUsize::new(initial)),
        }
    }

    /// Increments the counter by one.
    pub fn increment(&self) {
        self.inner.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrements the counter by one.
    ///
    /// Returns true if the counter reached zero.
    pub fn decrement(&self) -> bool {
        let old_val = self.inner.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(old_val > 0, "work counter underflow");
        old_val == 1
    }

    /// Returns the current value of the counter.
    pub fn value(&self) -> usize {
        self.inner.load(Ordering::SeqCst)
    }

    /// Checks if the counter has reached zero.
    pub fn is_complete(&self) -> bool {
        self.value() == 0
    }
}

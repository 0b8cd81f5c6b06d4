//! Per-thread record of the executors currently running jobs on this thread.

use std::cell::RefCell;

thread_local! {
    static RUNNING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks an executor as running on the current thread until dropped.
pub(crate) struct CallStackGuard {
    key: usize,
}

impl CallStackGuard {
    pub(crate) fn enter(key: usize) -> Self {
        RUNNING.with_borrow_mut(|stack| stack.push(key));
        CallStackGuard { key }
    }
}

impl Drop for CallStackGuard {
    fn drop(&mut self) {
        RUNNING.with_borrow_mut(|stack| {
            if let Some(pos) = stack.iter().rposition(|k| *k == self.key) {
                stack.remove(pos);
            }
        });
    }
}

/// Returns true if the executor identified by `key` is running on this thread.
pub(crate) fn contains(key: usize) -> bool {
    RUNNING.with_borrow(|stack| stack.contains(&key))
}

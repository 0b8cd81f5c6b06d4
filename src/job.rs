//! Job definitions and execution logic.
//!
//! Jobs are the units of work queued on executors. Every entry into a
//! coroutine frame, every resumption and every posted completion handler
//! travels through an executor as a `Job`.

use std::fmt;

/// A deferred invocation submitted to an executor.
pub struct Job {
    /// The work to be executed
    work: Box<dyn FnOnce() + Send + 'static>,
    /// Short description used in trace output
    label: &'static str,
}

impl Job {
    /// Creates a new job with the given work function.
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::labeled("job", work)
    }

    /// Creates a new job carrying a label for trace output.
    pub fn labeled<F>(label: &'static str, work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Job {
            work: Box::new(work),
            label,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Executes the job, consuming it.
    pub fn execute(self) {
        (self.work)();
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("label", &self.label).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_job_execution() {
        let executed = Arc::new(AtomicBool::new(false));
        let executed_clone = executed.clone();

        let job = Job::new(move || {
            executed_clone.store(true, Ordering::SeqCst);
        });

        assert_eq!(job.label(), "job");
        job.execute();
        assert!(executed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_job_dropped_without_running() {
        let executed = Arc::new(AtomicBool::new(false));
        let executed_clone = executed.clone();

        let job = Job::labeled("resume", move || {
            executed_clone.store(true, Ordering::SeqCst);
        });
        assert_eq!(format!("{:?}", job), "Job { label: \"resume\" }");

        drop(job);
        assert!(!executed.load(Ordering::SeqCst));
    }
}

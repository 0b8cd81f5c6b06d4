//! Coroutine frames.
//!
//! A frame is a stackful coroutine (a corosensei [`Coroutine`] on its own
//! guard-paged stack) permanently bound to one executor. The frame is owned by
//! a [`FrameCell`], which serializes resumptions: whoever holds the parked
//! fiber may run it, and a resumption that arrives while the fiber is running
//! is recorded and replayed as soon as it suspends.
//!
//! Only completion handlers of pending operations (and the job currently
//! running the fiber) keep a frame alive. When the last of them is dropped the
//! fiber is dropped with it and corosensei unwinds its stack, releasing the
//! routine's locals without invoking the completion handler.

use crate::context::{FrameEnv, YieldContext};
use crate::error::{Error, Result};
use crate::executor::{AnyExecutor, WorkGuard};
use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Stack size used when no [`StackConfig`] is given.
pub const DEFAULT_STACK_SIZE: usize = 512 * 1024;

/// Smallest stack a frame will be given.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Largest stack size accepted; larger requests fail with
/// [`Error::StackAllocation`].
pub const MAX_STACK_SIZE: usize = isize::MAX as usize;

/// Stack configuration for a spawned frame.
///
/// Deserializes from `{"size": 65536}`; a missing size means the default.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct StackConfig {
    /// Usable stack size in bytes. Values below [`MIN_STACK_SIZE`] are raised.
    pub size: usize,
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig {
            size: DEFAULT_STACK_SIZE,
        }
    }
}

impl StackConfig {
    pub fn with_size(size: usize) -> Self {
        StackConfig {
            size: size.max(MIN_STACK_SIZE),
        }
    }

    pub(crate) fn allocate(&self) -> Result<DefaultStack> {
        let size = self.size.max(MIN_STACK_SIZE);
        // Page rounding plus the guard page must not overflow inside corosensei
        if size > MAX_STACK_SIZE {
            return Err(Error::StackAllocation {
                size,
                source: io::Error::new(io::ErrorKind::InvalidInput, "stack size too large"),
            });
        }
        DefaultStack::new(size).map_err(|source| Error::StackAllocation { size, source })
    }
}

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a coroutine frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(u64);

impl FrameId {
    pub(crate) fn next() -> Self {
        FrameId(NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

/// Lifecycle of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FiberState {
    /// Spawned; the entry job has not run yet.
    Created,
    Running,
    /// Parked until its pending operation completes.
    Suspended,
    Completed,
}

pub(crate) type FrameYielder = Yielder<(), ()>;

/// Called once when the routine returns (`None`) or panics (the payload).
pub(crate) type Finish = Box<dyn FnOnce(Option<Box<dyn Any + Send>>) + Send>;

struct CurrentFrame {
    id: FrameId,
    executor: AnyExecutor,
}

thread_local! {
    static CURRENT_FRAME: RefCell<Option<CurrentFrame>> = const { RefCell::new(None) };
}

/// Returns the id of the frame running on this thread, if any.
pub fn current_frame() -> Option<FrameId> {
    CURRENT_FRAME.with_borrow(|current| current.as_ref().map(|frame| frame.id))
}

/// Returns the executor of the frame running on this thread, if any.
pub(crate) fn current_executor() -> Option<AnyExecutor> {
    CURRENT_FRAME.with_borrow(|current| current.as_ref().map(|frame| frame.executor.clone()))
}

pub(crate) enum Resumed {
    Suspended,
    Finished(Option<Box<dyn Any + Send>>),
}

/// A stackful coroutine bound to an executor.
///
/// Field order is drop order: the coroutine unwinds first, then the
/// completion callback is dropped, then the executor's work count is released.
pub(crate) struct Fiber {
    coroutine: Coroutine<(), (), (), DefaultStack>,
    id: FrameId,
    state: FiberState,
    finish: Option<Finish>,
    work: WorkGuard,
}

// The coroutine itself is !Send. Its routine and captures are Send, and a
// fiber is only ever resumed by the holder of its cell slot.
unsafe impl Send for Fiber {}

impl Fiber {
    fn resume(&mut self) -> Resumed {
        self.state = FiberState::Running;
        let previous = CURRENT_FRAME.with_borrow_mut(|current| {
            current.replace(CurrentFrame {
                id: self.id,
                executor: self.work.executor().clone(),
            })
        });

        let coroutine = &mut self.coroutine;
        let result = catch_unwind(AssertUnwindSafe(|| coroutine.resume(())));

        CURRENT_FRAME.with_borrow_mut(|current| *current = previous);

        match result {
            Ok(CoroutineResult::Yield(())) => {
                self.state = FiberState::Suspended;
                Resumed::Suspended
            }
            Ok(CoroutineResult::Return(())) => {
                self.state = FiberState::Completed;
                Resumed::Finished(None)
            }
            Err(payload) => {
                self.state = FiberState::Completed;
                Resumed::Finished(Some(payload))
            }
        }
    }

    fn finish(&mut self, panic: Option<Box<dyn Any + Send>>) {
        if let Some(finish) = self.finish.take() {
            finish(panic);
        }
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        if self.state != FiberState::Completed {
            debug!(frame = %self.id, state = ?self.state, "unwinding abandoned frame");
        }
    }
}

enum Slot {
    Parked(Box<Fiber>),
    Running,
    /// Resumed while running; replayed once the fiber suspends.
    Notified,
    Done,
}

/// Shared owner of a frame; see the module documentation.
pub(crate) struct FrameCell {
    id: FrameId,
    slot: Mutex<Slot>,
}

impl FrameCell {
    /// Allocates a frame that runs `body` on `stack` once first resumed.
    pub(crate) fn new<F>(
        id: FrameId,
        executor: AnyExecutor,
        stack: DefaultStack,
        body: F,
        finish: Finish,
    ) -> Arc<Self>
    where
        F: for<'y> FnOnce(YieldContext<'y>) + Send + 'static,
    {
        Arc::new_cyclic(|weak: &Weak<FrameCell>| {
            let cell = weak.clone();
            let env_executor = executor.clone();
            let coroutine = Coroutine::with_stack(stack, move |yielder: &FrameYielder, ()| {
                let env = FrameEnv {
                    id,
                    executor: env_executor,
                    cell,
                    yielder,
                };
                body(YieldContext::new(&env));
            });

            let fiber = Fiber {
                coroutine,
                id,
                state: FiberState::Created,
                finish: Some(finish),
                work: WorkGuard::new(executor),
            };
            FrameCell {
                id,
                slot: Mutex::new(Slot::Parked(Box::new(fiber))),
            }
        })
    }

    pub(crate) fn id(&self) -> FrameId {
        self.id
    }

    /// Runs the frame until it next suspends or finishes.
    ///
    /// Must be called on a thread running the frame's executor.
    pub(crate) fn resume(self: Arc<Self>) {
        let mut fiber = {
            let mut slot = self.slot.lock();
            match std::mem::replace(&mut *slot, Slot::Running) {
                Slot::Parked(fiber) => fiber,
                Slot::Running | Slot::Notified => {
                    *slot = Slot::Notified;
                    return;
                }
                Slot::Done => {
                    *slot = Slot::Done;
                    return;
                }
            }
        };

        loop {
            trace!(frame = %self.id, "resuming frame");
            match fiber.resume() {
                Resumed::Suspended => {
                    let mut slot = self.slot.lock();
                    if matches!(*slot, Slot::Notified) {
                        *slot = Slot::Running;
                        continue;
                    }
                    *slot = Slot::Parked(fiber);
                    drop(slot);
                    trace!(frame = %self.id, "frame suspended");
                    return;
                }
                Resumed::Finished(panic) => {
                    *self.slot.lock() = Slot::Done;
                    debug!(frame = %self.id, panicked = panic.is_some(), "frame completed");
                    fiber.finish(panic);
                    return;
                }
            }
        }
    }

    #[cfg(test)]
    fn state(&self) -> Option<FiberState> {
        match &*self.slot.lock() {
            Slot::Parked(fiber) => Some(fiber.state),
            Slot::Running | Slot::Notified => Some(FiberState::Running),
            Slot::Done => None,
        }
    }
}

impl fmt::Debug for FrameCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameCell").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExecutionContext;
    use crate::handler::Handler;
    use crate::job::Job;
    use crate::executor::Executor;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    fn frame<F>(ctx: &ExecutionContext, body: F, finished: Arc<AtomicUsize>) -> Arc<FrameCell>
    where
        F: for<'y> FnOnce(YieldContext<'y>) + Send + 'static,
    {
        let finish: Finish = Box::new(move |panic: Option<Box<dyn Any + Send>>| {
            assert!(panic.is_none());
            finished.fetch_add(1, Ordering::SeqCst);
        });
        FrameCell::new(
            FrameId::next(),
            ctx.executor().into(),
            StackConfig::default().allocate().unwrap(),
            body,
            finish,
        )
    }

    fn start(ctx: &ExecutionContext, cell: &Arc<FrameCell>) {
        let cell = Arc::clone(cell);
        ctx.executor()
            .post(Job::labeled("spawn", move || FrameCell::resume(cell)));
    }

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_stack_config_defaults() {
        assert_eq!(StackConfig::default().size, DEFAULT_STACK_SIZE);
        assert_eq!(StackConfig::with_size(1).size, MIN_STACK_SIZE);
        assert_eq!(StackConfig::with_size(65536).size, 65536);

        let config: StackConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, StackConfig::default());
        let config: StackConfig = serde_json::from_str(r#"{"size": 65536}"#).unwrap();
        assert_eq!(config.size, 65536);
    }

    #[test]
    fn test_oversized_stack_is_rejected() {
        let result = StackConfig { size: usize::MAX }.allocate();
        assert!(matches!(
            result,
            Err(Error::StackAllocation { size: usize::MAX, .. })
        ));
    }

    #[test]
    fn test_frame_ids_are_unique() {
        let a = FrameId::next();
        let b = FrameId::next();
        assert_ne!(a, b);
        assert_eq!(format!("{}", a), format!("frame#{}", a.as_u64()));
    }

    #[test]
    fn test_frame_runs_to_completion() {
        let ctx = ExecutionContext::new();
        let finished = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(None));

        let seen_clone = seen.clone();
        let cell = frame(
            &ctx,
            move |y| {
                assert_eq!(current_frame(), Some(y.frame_id()));
                *seen_clone.lock() = Some(y.frame_id());
            },
            finished.clone(),
        );
        assert_eq!(cell.state(), Some(FiberState::Created));
        assert_eq!(ctx.outstanding_work(), 1);

        start(&ctx, &cell);
        assert_eq!(ctx.run(), 1);
        assert_eq!(cell.state(), None);
        assert_eq!(*seen.lock(), Some(cell.id()));
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(current_frame().is_none());
    }

    #[test]
    fn test_resume_while_running_is_replayed() {
        let ctx = ExecutionContext::new();
        let finished = Arc::new(AtomicUsize::new(0));
        let value = Arc::new(AtomicUsize::new(0));

        let value_clone = value.clone();
        let cell = frame(
            &ctx,
            move |y| {
                // Completing inline resumes the frame before it has suspended
                let v = y.suspend_with(|handler: Handler<usize>| handler.complete(42));
                value_clone.store(v, Ordering::SeqCst);
            },
            finished.clone(),
        );

        start(&ctx, &cell);
        assert_eq!(ctx.run(), 1);
        assert_eq!(value.load(Ordering::SeqCst), 42);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropping_last_resumer_unwinds_frame() {
        let ctx = ExecutionContext::new();
        let finished = Arc::new(AtomicUsize::new(0));
        let unwound = Arc::new(AtomicBool::new(false));
        let parked: Arc<Mutex<Option<Handler<()>>>> = Arc::new(Mutex::new(None));

        let unwound_clone = unwound.clone();
        let parked_clone = parked.clone();
        let cell = frame(
            &ctx,
            move |y| {
                let _guard = SetOnDrop(unwound_clone);
                y.suspend_with(|handler: Handler<()>| *parked_clone.lock() = Some(handler));
                unreachable!("frame must not be resumed");
            },
            finished.clone(),
        );
        let weak = Arc::downgrade(&cell);
        start(&ctx, &cell);
        drop(cell);

        assert_eq!(ctx.run_one(), 1);
        assert!(weak.upgrade().is_some());
        assert!(!unwound.load(Ordering::SeqCst));
        assert_eq!(ctx.outstanding_work(), 1);

        drop(parked.lock().take());
        assert!(weak.upgrade().is_none());
        assert!(unwound.load(Ordering::SeqCst));
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.outstanding_work(), 0);
    }
}

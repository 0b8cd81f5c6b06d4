//! The yield context handed to every spawned routine.

use crate::executor::{AnyExecutor, Executor};
use crate::fiber::{FrameCell, FrameId, FrameYielder};
use crate::handler::{CompletionToken, Handler};
use crate::job::Job;
use parking_lot::Mutex;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use tracing::trace;

/// Per-frame state living on the frame's own stack.
pub(crate) struct FrameEnv<'y> {
    pub(crate) id: FrameId,
    pub(crate) executor: AnyExecutor,
    pub(crate) cell: Weak<FrameCell>,
    pub(crate) yielder: &'y FrameYielder,
}

/// Capability to suspend the running frame until an operation completes.
///
/// Passing a `YieldContext` to an operation that takes a
/// [`CompletionToken`] suspends the frame and returns the operation's
/// result once it resumes:
///
/// ```no_run
/// use fiberspawn::{spawn, ExecutionContext, Timer};
/// use std::time::Duration;
///
/// let ctx = ExecutionContext::new();
/// let timer = std::sync::Arc::new(Timer::after(&ctx, Duration::from_millis(5)));
/// spawn(&ctx, move |y| {
///     timer.async_wait(y).expect("timer cancelled");
/// })
/// .unwrap();
/// ctx.run();
/// ```
///
/// The context is tied to the routine invocation and cannot leave the frame's
/// thread.
#[derive(Clone, Copy)]
pub struct YieldContext<'y> {
    env: &'y FrameEnv<'y>,
    _not_send: PhantomData<*const ()>,
}

impl<'y> YieldContext<'y> {
    pub(crate) fn new(env: &'y FrameEnv<'y>) -> Self {
        YieldContext {
            env,
            _not_send: PhantomData,
        }
    }

    /// The executor every resumption of this frame runs on.
    pub fn executor(&self) -> AnyExecutor {
        self.env.executor.clone()
    }

    pub fn frame_id(&self) -> FrameId {
        self.env.id
    }

    /// Suspends the frame until the handler passed to `initiation` is invoked,
    /// then returns the value it was invoked with.
    ///
    /// The handler resumes the frame through the frame's executor. If it is
    /// dropped without being invoked, the frame is unwound instead.
    pub fn suspend_with<T, I>(self, initiation: I) -> T
    where
        T: Send + 'static,
        I: FnOnce(Handler<T>),
    {
        let result = Arc::new(Mutex::new(None));
        let handler = {
            let cell = match self.env.cell.upgrade() {
                Some(cell) => cell,
                None => panic!("{} suspended after its cell was released", self.env.id),
            };
            let result = Arc::clone(&result);
            let executor = self.env.executor.clone();
            Handler::with_executor(self.env.executor.clone(), move |value: T| {
                *result.lock() = Some(value);
                executor.dispatch(Job::labeled("resume", move || FrameCell::resume(cell)));
            })
        };

        trace!(frame = %self.env.id, "frame suspending");
        initiation(handler);
        self.env.yielder.suspend(());

        let value = result.lock().take();
        match value {
            Some(value) => value,
            None => panic!("{} resumed without a result", self.env.id),
        }
    }

    /// Lets other queued work on the frame's executor run before continuing.
    pub fn yield_now(self) {
        let executor = self.executor();
        self.suspend_with(move |handler: Handler<()>| handler.post(&executor, ()));
    }
}

impl<T: Send + 'static> CompletionToken<T> for YieldContext<'_> {
    type Output = T;

    fn initiate<I>(self, initiation: I) -> T
    where
        I: FnOnce(Handler<T>),
    {
        self.suspend_with(initiation)
    }
}

impl fmt::Debug for YieldContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YieldContext")
            .field("frame", &self.env.id)
            .field("executor", &self.env.executor)
            .finish()
    }
}

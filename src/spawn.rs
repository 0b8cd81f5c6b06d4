//! Spawning routines as coroutine frames.
//!
//! `spawn` turns a target into an executor binding plus an optional
//! completion handler, allocates a frame bound to that executor and posts the
//! frame's first entry. The routine never starts inline.

use crate::context::YieldContext;
use crate::error::{Error, Result, panic_message};
use crate::execution_context::{ExecutionContext, IoExecutor};
use crate::executor::{AnyExecutor, Executor};
use crate::fiber::{self, Finish, FrameCell, FrameId, StackConfig};
use crate::handler::{Bound, Handler};
use crate::job::Job;
use crate::strand::Strand;
use crate::system::SystemExecutor;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Anything a routine can be spawned on.
///
/// Yields the executor the frame is bound to and, for targets that carry
/// one, the handler that receives the routine's result.
pub trait SpawnTarget<R> {
    fn into_binding(self) -> (AnyExecutor, Option<Handler<Result<R>>>);
}

impl<R> SpawnTarget<R> for &ExecutionContext {
    fn into_binding(self) -> (AnyExecutor, Option<Handler<Result<R>>>) {
        (self.executor().into(), None)
    }
}

impl<R> SpawnTarget<R> for IoExecutor {
    fn into_binding(self) -> (AnyExecutor, Option<Handler<Result<R>>>) {
        (self.into(), None)
    }
}

impl<R> SpawnTarget<R> for Strand {
    fn into_binding(self) -> (AnyExecutor, Option<Handler<Result<R>>>) {
        (self.into(), None)
    }
}

impl<R> SpawnTarget<R> for SystemExecutor {
    fn into_binding(self) -> (AnyExecutor, Option<Handler<Result<R>>>) {
        (self.into(), None)
    }
}

impl<R> SpawnTarget<R> for AnyExecutor {
    fn into_binding(self) -> (AnyExecutor, Option<Handler<Result<R>>>) {
        (self, None)
    }
}

/// Spawns alongside the calling frame, on the same executor.
impl<R> SpawnTarget<R> for YieldContext<'_> {
    fn into_binding(self) -> (AnyExecutor, Option<Handler<Result<R>>>) {
        (self.executor(), None)
    }
}

/// Runs the frame on the bound executor and hands the result to the handler.
impl<R, H, E> SpawnTarget<R> for Bound<H, E>
where
    R: Send + 'static,
    H: FnOnce(Result<R>) + Send + 'static,
    E: Into<AnyExecutor>,
{
    fn into_binding(self) -> (AnyExecutor, Option<Handler<Result<R>>>) {
        let (executor, handler) = self.into_parts();
        let executor = executor.into();
        (
            executor.clone(),
            Some(Handler::with_executor(executor, handler)),
        )
    }
}

/// Spawns `routine` on `target` with the default stack.
///
/// ```no_run
/// use fiberspawn::{bind_executor, spawn, ExecutionContext, Strand};
///
/// let ctx = ExecutionContext::new();
/// let strand = Strand::new(ctx.executor());
/// spawn(
///     bind_executor(strand, |result: fiberspawn::Result<u32>| {
///         assert_eq!(result.unwrap(), 7);
///     }),
///     |_y| 7,
/// )
/// .unwrap();
/// assert_eq!(ctx.run(), 1);
/// ```
pub fn spawn<T, F, R>(target: T, routine: F) -> Result<()>
where
    T: SpawnTarget<R>,
    F: for<'y> FnOnce(YieldContext<'y>) -> R + Send + 'static,
    R: Send + 'static,
{
    spawn_with_stack(target, routine, StackConfig::default())
}

/// Spawns `routine` on `target` with a stack sized by `stack`.
pub fn spawn_with_stack<T, F, R>(target: T, routine: F, stack: StackConfig) -> Result<()>
where
    T: SpawnTarget<R>,
    F: for<'y> FnOnce(YieldContext<'y>) -> R + Send + 'static,
    R: Send + 'static,
{
    let (executor, handler) = target.into_binding();
    let stack = stack.allocate()?;
    let id = FrameId::next();

    let output = Arc::new(Mutex::new(None));
    let body = {
        let output = Arc::clone(&output);
        move |y: YieldContext<'_>| {
            let value = routine(y);
            *output.lock() = Some(value);
        }
    };

    let fallback = executor.clone();
    let finish: Finish = Box::new(move |panic: Option<Box<dyn Any + Send>>| {
        match (panic, handler) {
            (None, Some(handler)) => {
                if let Some(value) = output.lock().take() {
                    handler.dispatch(&fallback, Ok(value));
                }
            }
            (None, None) => trace!(frame = %id, "discarding result of detached frame"),
            (Some(payload), Some(handler)) => {
                let message = panic_message(&*payload);
                warn!(frame = %id, %message, "spawned routine panicked");
                handler.dispatch(&fallback, Err(Error::Panicked(message)));
            }
            (Some(payload), None) => {
                error!(
                    frame = %id,
                    message = %panic_message(&*payload),
                    "unhandled panic in spawned routine"
                );
                std::panic::resume_unwind(payload);
            }
        }
    });

    let cell = FrameCell::new(id, executor.clone(), stack, body, finish);
    debug!(frame = %cell.id(), executor = ?executor, "spawning frame");
    executor.post(Job::labeled("spawn", move || FrameCell::resume(cell)));
    Ok(())
}

/// Spawns `routine` on the ambient executor: the executor of the frame
/// running on this thread, or the process-wide [`SystemExecutor`].
pub fn spawn_default<F, R>(routine: F) -> Result<()>
where
    F: for<'y> FnOnce(YieldContext<'y>) -> R + Send + 'static,
    R: Send + 'static,
{
    match fiber::current_executor() {
        Some(executor) => spawn(executor, routine),
        None => spawn(SystemExecutor, routine),
    }
}

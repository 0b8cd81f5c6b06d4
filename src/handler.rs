//! Completion handlers and completion tokens.
//!
//! An asynchronous operation hands its result to a [`Handler`]. What the
//! caller passes to the operation is a [`CompletionToken`], which decides
//! how that handler is built and what the initiating call returns:
//!
//! - a closure is invoked with the result and the call returns `()`;
//! - a [`Bound`] closure (see [`bind_executor`]) is run on its executor;
//! - a [`YieldContext`](crate::YieldContext) suspends the calling frame and
//!   the call returns the result.

use crate::executor::{AnyExecutor, Executor};
use crate::job::Job;
use std::fmt;

/// A one-shot continuation with an optional associated executor.
pub struct Handler<T> {
    executor: Option<AnyExecutor>,
    callback: Box<dyn FnOnce(T) + Send>,
}

impl<T: Send + 'static> Handler<T> {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        Handler {
            executor: None,
            callback: Box::new(callback),
        }
    }

    pub fn with_executor<F>(executor: AnyExecutor, callback: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        Handler {
            executor: Some(executor),
            callback: Box::new(callback),
        }
    }

    /// The executor this handler must run on, if it specified one.
    pub fn associated_executor(&self) -> Option<&AnyExecutor> {
        self.executor.as_ref()
    }

    /// Invokes the continuation on the calling thread.
    pub fn complete(self, value: T) {
        (self.callback)(value);
    }

    /// Queues the continuation on its associated executor, or on `fallback`
    /// when it has none.
    pub fn post(self, fallback: &AnyExecutor, value: T) {
        let executor = self.target(fallback);
        executor.post(Job::labeled("completion", move || self.complete(value)));
    }

    /// Like [`Handler::post`], but runs inline when the target executor is
    /// already running on this thread.
    pub fn dispatch(self, fallback: &AnyExecutor, value: T) {
        let executor = self.target(fallback);
        executor.dispatch(Job::labeled("completion", move || self.complete(value)));
    }

    fn target(&self, fallback: &AnyExecutor) -> AnyExecutor {
        match &self.executor {
            Some(executor) => executor.clone(),
            None => fallback.clone(),
        }
    }
}

impl<T> fmt::Debug for Handler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

/// Decides how an asynchronous operation delivers its result of type `T`.
pub trait CompletionToken<T: Send + 'static> {
    /// What the initiating call returns.
    type Output;

    /// Builds the handler, passes it to `initiation` and produces the output.
    fn initiate<I>(self, initiation: I) -> Self::Output
    where
        I: FnOnce(Handler<T>);
}

impl<T, F> CompletionToken<T> for F
where
    T: Send + 'static,
    F: FnOnce(T) + Send + 'static,
{
    type Output = ();

    fn initiate<I>(self, initiation: I)
    where
        I: FnOnce(Handler<T>),
    {
        initiation(Handler::new(self));
    }
}

/// A handler paired with the executor it must run on.
#[derive(Clone, Debug)]
pub struct Bound<H, E> {
    executor: E,
    handler: H,
}

/// Associates `handler` with `executor`.
///
/// As a completion token the handler is run through `executor`. As a spawn
/// target the frame runs on `executor` and `handler` receives its result.
pub fn bind_executor<E, H>(executor: E, handler: H) -> Bound<H, E> {
    Bound { executor, handler }
}

impl<H, E> Bound<H, E> {
    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn into_parts(self) -> (E, H) {
        (self.executor, self.handler)
    }
}

impl<T, H, E> CompletionToken<T> for Bound<H, E>
where
    T: Send + 'static,
    H: FnOnce(T) + Send + 'static,
    E: Into<AnyExecutor>,
{
    type Output = ();

    fn initiate<I>(self, initiation: I)
    where
        I: FnOnce(Handler<T>),
    {
        let (executor, handler) = self.into_parts();
        initiation(Handler::with_executor(executor.into(), handler));
    }
}

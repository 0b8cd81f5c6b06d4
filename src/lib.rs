//! # fiberspawn - Stackful Coroutines on Executors
//!
//! Spawns routines as stackful coroutines (fibers) bound to an executor. Each
//! routine receives a [`YieldContext`]; passing it to an asynchronous
//! operation suspends the routine until the operation completes and returns
//! the result, so callback-driven code reads sequentially.
//!
//! ## Architecture
//!
//! - **Execution context**: a run loop over a FIFO of ready jobs plus a timer
//!   queue, driven by any number of threads calling `run`
//! - **Executors**: handles that submit jobs to a context, a [`Strand`] that
//!   serializes them, and the background [`SystemExecutor`]
//! - **Frames**: corosensei coroutines with guard-paged stacks, bound to one
//!   executor for their whole life and resumed only through it
//! - **Completion tokens**: the same operation accepts a closure, an
//!   executor-bound closure or a yield context
//!
//! ## Example
//!
//! ```no_run
//! use fiberspawn::{bind_executor, spawn, ExecutionContext, Timer};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let ctx = ExecutionContext::new();
//! let timer = Arc::new(Timer::after(&ctx, Duration::from_millis(10)));
//!
//! spawn(
//!     bind_executor(ctx.executor(), |result: fiberspawn::Result<&str>| {
//!         println!("routine finished: {:?}", result);
//!     }),
//!     move |y| {
//!         timer.async_wait(y).expect("timer cancelled");
//!         "done"
//!     },
//! )
//! .unwrap();
//!
//! ctx.run();
//! ```

mod call_stack;

pub mod context;
pub mod counter;
pub mod error;
pub mod execution_context;
pub mod executor;
pub mod fiber;
pub mod handler;
pub mod job;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod spawn;
pub mod strand;
pub mod system;
pub mod timer;
pub mod worker;

pub use context::YieldContext;
pub use counter::Counter;
pub use error::{Error, Result};
pub use execution_context::{ExecutionContext, IoExecutor};
pub use executor::{AnyExecutor, Executor, WorkGuard};
pub use fiber::{FrameId, StackConfig, current_frame};
pub use handler::{Bound, CompletionToken, Handler, bind_executor};
pub use job::Job;
pub use spawn::{SpawnTarget, spawn, spawn_default, spawn_with_stack};
pub use strand::Strand;
pub use system::SystemExecutor;
pub use timer::Timer;
pub use worker::WorkerPool;

use fiberspawn::{ExecutionContext, Result, Strand, Timer, WorkerPool, bind_executor, spawn};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("fiberspawn - stackful coroutines on executors");

    // Example 1: A routine that waits on a timer without blocking the thread
    let ctx = ExecutionContext::new();
    let timer = Arc::new(Timer::after(&ctx, Duration::from_millis(50)));
    let start = Instant::now();

    let waiting = timer.clone();
    spawn(
        bind_executor(
            ctx.executor(),
            |result: Result<Result<Duration>>| match result.and_then(|r| r) {
                Ok(elapsed) => info!(?elapsed, "timer routine finished"),
                Err(err) => info!(%err, "timer routine failed"),
            },
        ),
        move |y| -> Result<Duration> {
            info!(frame = %y.frame_id(), "waiting on timer");
            waiting.async_wait(y)?;
            Ok(start.elapsed())
        },
    )
    .expect("failed to spawn timer routine");

    let executed = ctx.run();
    info!(executed, "example 1 complete");

    // Example 2: Frames sharing a strand across worker threads
    let ctx = ExecutionContext::new();
    let strand = Strand::new(ctx.executor());
    let total = Arc::new(AtomicUsize::new(0));
    let num_frames = 100;

    for i in 0..num_frames {
        let total = total.clone();
        spawn(strand.clone(), move |y| {
            y.yield_now();
            // Plain read-modify-write; the strand never runs two frames at once
            let current = total.load(Ordering::Relaxed);
            total.store(current + i, Ordering::Relaxed);
        })
        .expect("failed to spawn strand routine");
    }

    let start = Instant::now();
    let pool = WorkerPool::new(&ctx, 4);
    if let Err(panics) = pool.join() {
        info!(panics, "worker threads reported panics");
    }
    let expected: usize = (0..num_frames).sum();
    info!(
        total = total.load(Ordering::Relaxed),
        expected,
        elapsed = ?start.elapsed(),
        "example 2 complete"
    );
}

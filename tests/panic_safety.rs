use fiberspawn::{Error, ExecutionContext, Result, Timer, WorkerPool, bind_executor, spawn};
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[test]
fn test_panic_reaches_completion_handler() {
    let ctx = ExecutionContext::new();
    let outcome = Arc::new(Mutex::new(None));

    let outcome_clone = outcome.clone();
    spawn(
        bind_executor(ctx.executor(), move |result: Result<()>| {
            *outcome_clone.lock() = Some(result);
        }),
        |_y| panic!("Intentional panic for testing"),
    )
    .unwrap();

    assert_eq!(ctx.run(), 1);
    assert!(ctx.stopped());
    match outcome.lock().take() {
        Some(Err(Error::Panicked(message))) => {
            assert_eq!(message, "Intentional panic for testing")
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(ctx.outstanding_work(), 0);
}

#[test]
fn test_panic_after_suspension_reaches_handler() {
    let ctx = ExecutionContext::new();
    let timer = Arc::new(Timer::after(&ctx, Duration::from_millis(1)));
    let panicked = Arc::new(AtomicBool::new(false));

    let timer_clone = timer.clone();
    let panicked_clone = panicked.clone();
    spawn(
        bind_executor(ctx.executor(), move |result: Result<u32>| {
            panicked_clone.store(matches!(result, Err(Error::Panicked(_))), Ordering::SeqCst);
        }),
        move |y| -> u32 {
            timer_clone.async_wait(y).unwrap();
            panic!("Boom after wait");
        },
    )
    .unwrap();

    assert_eq!(ctx.run(), 2);
    assert!(panicked.load(Ordering::SeqCst));
}

#[test]
fn test_unhandled_panic_escapes_run_and_context_recovers() {
    let ctx = ExecutionContext::new();
    spawn::<_, _, ()>(&ctx, |_y| panic!("Boom")).unwrap();

    let result = catch_unwind(AssertUnwindSafe(|| ctx.run()));
    assert!(result.is_err());
    assert_eq!(ctx.outstanding_work(), 0);

    // Context is still usable afterwards
    let success = Arc::new(AtomicBool::new(false));
    let success_clone = success.clone();
    spawn(&ctx, move |_y| {
        success_clone.store(true, Ordering::SeqCst);
    })
    .unwrap();

    assert_eq!(ctx.run(), 1);
    assert!(success.load(Ordering::SeqCst), "Subsequent frame failed to run");
}

#[test]
fn test_worker_recovery_after_panic() {
    let ctx = ExecutionContext::new();
    let completed = Arc::new(AtomicUsize::new(0));

    spawn::<_, _, ()>(&ctx, |_y| panic!("Boom")).unwrap();
    for _ in 0..10 {
        let completed = completed.clone();
        spawn(&ctx, move |_y| {
            completed.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    let pool = WorkerPool::new(&ctx, 1);
    assert_eq!(pool.join(), Err(1));
    assert_eq!(completed.load(Ordering::SeqCst), 10);
}

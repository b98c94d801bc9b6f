//! Test helper utilities and common functionality.

use crate::sched::{HostScheduler, InterruptContext, ThreadContext};
use std::time::{Duration, Instant};

/// Upper bound on how long a liveness check may take before it counts as a
/// hang.
pub(crate) const WATCHDOG: Duration = Duration::from_secs(10);

/// Run `f` as a kernel thread on a fresh scheduler with `cpus` CPUs.
///
/// A panic inside the thread is re-raised on the test thread so
/// `#[should_panic]` sees the original message.
pub(crate) fn run<F, R>(cpus: usize, f: F) -> R
where
    F: FnOnce(&mut ThreadContext<'_>) -> R + Send + 'static,
    R: Send + 'static,
{
    let sched = HostScheduler::new(cpus).expect("host scheduler");
    match sched.spawn("test", f).join() {
        Ok(result) => result,
        Err(payload) => std::panic::resume_unwind(payload),
    }
}

/// Run `f` as an interrupt handler on a single-CPU scheduler.
pub(crate) fn run_irq<F, R>(f: F) -> R
where
    F: FnOnce(&InterruptContext<'_>) -> R + Send + 'static,
    R: Send + 'static,
{
    run(1, move |ctx| {
        let cpu = ctx.cpu();
        cpu.enter_interrupt();
        let ictx = InterruptContext::new(ctx.scheduler(), cpu, 0);
        let result = f(&ictx);
        cpu.exit_interrupt();
        result
    })
}

/// Poll `cond` until it holds or `timeout` passes.
pub(crate) fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// Check that `cond` stays true for the whole of `period`.
pub(crate) fn holds_for(period: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + period;
    while Instant::now() < deadline {
        if !cond() {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    true
}

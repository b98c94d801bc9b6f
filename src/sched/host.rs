//! Host scheduler: kernel threads on std threads, simulated CPUs.
//!
//! Each kernel thread runs on its own host thread, but a simulated CPU runs
//! at most one kernel thread at a time. A thread has to claim an idle CPU
//! before it runs and gives it back when it blocks, yields or exits. That
//! keeps the per-CPU invariants honest: nothing else runs on a CPU while a
//! thread holds a spinlock there.
//!
//! Blocking parks the host thread. Because `unpark` before `park` is not
//! lost, a wake that beats the block is not lost either.

use super::context::ThreadContext;
use super::cpu::{Cpu, CpuId};
use super::trait_def::Scheduler;
use crate::config::MAX_CPUS;
use crate::errors::{ScheduleError, SyncResult};
use crate::thread::{Thread, ThreadId, ThreadState};
use log::debug;
use portable_atomic::{AtomicUsize, Ordering};

extern crate alloc;
extern crate std;
use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// Scheduler running kernel threads on simulated CPUs.
pub struct HostScheduler {
    cpus: Box<[Cpu]>,
    dispatch: spin::Mutex<DispatchState>,
    /// Host thread behind each live kernel thread, for unpark.
    host_threads: spin::Mutex<BTreeMap<ThreadId, std::thread::Thread>>,
    next_thread_id: AtomicUsize,
}

struct DispatchState {
    /// Only non-empty while `waiting` is empty.
    idle: VecDeque<CpuId>,
    /// Ready threads waiting for a CPU, oldest first.
    waiting: VecDeque<(ThreadId, std::thread::Thread)>,
    /// CPUs handed to a waiter that has not picked them up yet.
    granted: BTreeMap<ThreadId, CpuId>,
}

impl HostScheduler {
    /// Create a scheduler with `num_cpus` idle CPUs.
    pub fn new(num_cpus: usize) -> SyncResult<Arc<Self>> {
        if num_cpus == 0 {
            return Err(ScheduleError::NoCpus.into());
        }
        if num_cpus > MAX_CPUS {
            return Err(ScheduleError::TooManyCpus(num_cpus).into());
        }

        let cpus: Vec<Cpu> = (0..num_cpus).map(Cpu::new).collect();
        debug!("host scheduler: {} cpus", num_cpus);

        Ok(Arc::new(Self {
            cpus: cpus.into_boxed_slice(),
            dispatch: spin::Mutex::new(DispatchState {
                idle: (0..num_cpus).collect(),
                waiting: VecDeque::new(),
                granted: BTreeMap::new(),
            }),
            host_threads: spin::Mutex::new(BTreeMap::new()),
            next_thread_id: AtomicUsize::new(1),
        }))
    }

    /// Spawn a kernel thread running `f`.
    ///
    /// `f` starts once the thread has been dispatched to a CPU and receives
    /// the thread's context.
    pub fn spawn<F, R>(self: &Arc<Self>, name: &str, f: F) -> JoinHandle<R>
    where
        F: FnOnce(&mut ThreadContext<'_>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let id = ThreadId::new(self.next_thread_id.fetch_add(1, Ordering::AcqRel))
            .unwrap_or_else(|| panic!("host scheduler: thread id space exhausted"));
        let thread = Thread::new(id, String::from(name));
        let sched = Arc::clone(self);
        let kernel_thread = thread.clone();

        let inner = std::thread::Builder::new()
            .name(String::from(name))
            .spawn(move || {
                sched
                    .host_threads
                    .lock()
                    .insert(kernel_thread.id(), std::thread::current());
                let _exit = ExitGuard {
                    sched: &sched,
                    thread: &kernel_thread,
                };

                sched.acquire_cpu(&kernel_thread);
                // SAFETY: the thread was just dispatched and this is its only
                // context.
                let mut ctx = unsafe { ThreadContext::new(&*sched, kernel_thread.clone()) };
                let result = f(&mut ctx);
                assert_eq!(
                    ctx.critical_depth(),
                    0,
                    "thread {} exited holding a spinlock",
                    kernel_thread.name()
                );
                result
            })
            .unwrap_or_else(|e| panic!("host scheduler: cannot spawn {}: {}", name, e));

        JoinHandle { inner, thread }
    }

    /// CPUs with no thread on them.
    pub fn idle_cpus(&self) -> usize {
        self.dispatch.lock().idle.len()
    }

    /// Threads ready to run but waiting for a CPU.
    pub fn waiting_threads(&self) -> usize {
        self.dispatch.lock().waiting.len()
    }

    /// Block the host thread until `thread` owns a CPU.
    ///
    /// A CPU handed over by `release_cpu` wins; an idle CPU is only taken
    /// when no other thread is queued for one.
    fn acquire_cpu(&self, thread: &Thread) {
        loop {
            {
                let mut state = self.dispatch.lock();
                let cpu = match state.granted.remove(&thread.id()) {
                    Some(cpu) => Some(cpu),
                    None if state.waiting.is_empty() => state.idle.pop_front(),
                    None => None,
                };
                if let Some(cpu) = cpu {
                    drop(state);

                    thread.set_cpu(cpu);
                    thread.set_state(ThreadState::Running);
                    self.cpus[cpu].set_current(Some(thread.clone()));
                    return;
                }
                if !state.waiting.iter().any(|(id, _)| *id == thread.id()) {
                    state
                        .waiting
                        .push_back((thread.id(), std::thread::current()));
                }
            }
            std::thread::park();
        }
    }

    /// Give `thread`'s CPU back, straight to the oldest waiter if any.
    fn release_cpu(&self, thread: &Thread) {
        let cpu = &self.cpus[thread.cpu_id()];
        cpu.set_current(None);

        let mut state = self.dispatch.lock();
        match state.waiting.pop_front() {
            Some((id, waiter)) => {
                state.granted.insert(id, cpu.id());
                waiter.unpark();
            }
            None => state.idle.push_back(cpu.id()),
        }
    }

    fn owns_cpu(&self, thread: &Thread) -> bool {
        self.cpus[thread.cpu_id()]
            .current_thread()
            .map_or(false, |t| t.ptr_eq(thread))
    }
}

impl Scheduler for HostScheduler {
    fn cpus(&self) -> &[Cpu] {
        &self.cpus
    }

    fn block(&self, current: &Thread) {
        assert_eq!(
            self.cpus[current.cpu_id()].critical_depth(),
            0,
            "thread {} blocked holding a spinlock",
            current.name()
        );
        self.release_cpu(current);
        while current.state() == ThreadState::Blocked {
            std::thread::park();
        }
        self.acquire_cpu(current);
    }

    fn wake(&self, thread: &Thread) {
        if thread.unblock() {
            if let Some(host) = self.host_threads.lock().get(&thread.id()) {
                host.unpark();
            }
        }
    }

    fn yield_now(&self, current: &Thread) {
        current.set_state(ThreadState::Ready);
        self.release_cpu(current);
        self.acquire_cpu(current);
    }
}

/// Marks the thread finished and frees its CPU, on return or on unwind.
struct ExitGuard<'a> {
    sched: &'a HostScheduler,
    thread: &'a Thread,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        if self.sched.owns_cpu(self.thread) {
            if std::thread::panicking() {
                // Guards forgotten before the panic never ran their release.
                self.sched.cpus[self.thread.cpu_id()].reset_critical();
            }
            self.sched.release_cpu(self.thread);
        }
        self.thread.set_state(ThreadState::Finished);
        self.sched.host_threads.lock().remove(&self.thread.id());
    }
}

/// Owned permission to join a kernel thread spawned on a [`HostScheduler`].
pub struct JoinHandle<R> {
    inner: std::thread::JoinHandle<R>,
    thread: Thread,
}

impl<R> JoinHandle<R> {
    /// Wait for the thread to finish; `Err` carries its panic payload.
    pub fn join(self) -> std::thread::Result<R> {
        self.inner.join()
    }

    /// Whether the thread's entry point has returned or unwound.
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// The kernel thread.
    pub fn thread(&self) -> &Thread {
        &self.thread
    }
}

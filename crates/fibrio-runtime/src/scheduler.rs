//! M:N cooperative scheduler
//!
//! A [`Scheduler`] owns a FIFO of tasks (fibers or callbacks, optionally
//! pinned to one worker) and a set of worker threads, each running the
//! same run loop:
//!
//! 1. Scan the queue for the first entry this worker may run.
//! 2. Resume it; a fiber that yields `Ready` goes back on the queue.
//! 3. With nothing runnable, resume the idle fiber, whose behaviour comes
//!    from [`SchedulerHooks::idle`].
//!
//! In use-caller mode the constructing thread is worker 0; it runs the loop
//! inside a root fiber, and only from within `stop()`.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};

use fibrio_core::{
    contract_assert, kdebug, kerror, kinfo, kwarn, FiberState, Mutex, SchedError, SchedResult,
    Semaphore,
};

use crate::config::SchedulerConfig;
use crate::fiber::Fiber;
use crate::parking::{CondvarParking, WorkerParking};
use crate::tls;

/// Unit of work accepted by `schedule`
pub enum Task {
    Fiber(Arc<Fiber>),
    Callback(Box<dyn FnOnce() + Send + 'static>),
}

impl Task {
    pub fn callback<F>(f: F) -> Task
    where
        F: FnOnce() + Send + 'static,
    {
        Task::Callback(Box::new(f))
    }
}

impl From<Arc<Fiber>> for Task {
    fn from(fiber: Arc<Fiber>) -> Task {
        Task::Fiber(fiber)
    }
}

impl From<Box<dyn FnOnce() + Send + 'static>> for Task {
    fn from(f: Box<dyn FnOnce() + Send + 'static>) -> Task {
        Task::Callback(f)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Fiber(fiber) => write!(f, "Task::Fiber({})", fiber.id()),
            Task::Callback(_) => write!(f, "Task::Callback"),
        }
    }
}

struct Entry {
    task: Task,
    worker: Option<usize>,
}

/// Extension points of the run loop
///
/// The default implementation parks idle workers on a condition variable.
/// The IoManager replaces it with an epoll-driven reactor.
pub trait SchedulerHooks: Send + Sync + 'static {
    /// Wake a worker blocked in `idle`
    fn tickle(&self, sched: &Scheduler);

    /// Body of the idle fiber; must yield back to the run loop regularly
    /// and return once `sched.stopping()` holds
    fn idle(&self, sched: &Arc<Scheduler>);

    /// Whether the run loop may exit
    fn stopping(&self, sched: &Scheduler) -> bool {
        sched.base_stopping()
    }

    /// Upcast for `Arc::downcast`
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Default hooks: park on a condvar, bounded by `park_timeout`
pub struct ParkingHooks {
    parking: CondvarParking,
}

impl ParkingHooks {
    pub fn new() -> Self {
        ParkingHooks {
            parking: CondvarParking::new(),
        }
    }
}

impl Default for ParkingHooks {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerHooks for ParkingHooks {
    fn tickle(&self, _sched: &Scheduler) {
        self.parking.wake_one();
    }

    fn idle(&self, sched: &Arc<Scheduler>) {
        while !sched.stopping() {
            self.parking.park(Some(sched.config().park_timeout));
            Fiber::yield_to_hold();
        }
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Cooperative M:N scheduler
pub struct Scheduler {
    config: SchedulerConfig,
    hooks: Arc<dyn SchedulerHooks>,
    me: Weak<Scheduler>,

    queue: Mutex<VecDeque<Entry>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    thread_ids: Mutex<Vec<i32>>,

    active: AtomicUsize,
    idle: AtomicUsize,
    started: AtomicBool,
    stopping: AtomicBool,
    auto_stop: AtomicBool,

    /// use_caller only: the run loop for worker 0 and its owning thread
    root_fiber: Mutex<Option<Arc<Fiber>>>,
    root_thread: Option<ThreadId>,
}

impl Scheduler {
    /// Scheduler with the default parking idle
    pub fn new(config: SchedulerConfig) -> SchedResult<Arc<Scheduler>> {
        Scheduler::with_hooks(config, Arc::new(ParkingHooks::new()))
    }

    /// Scheduler with custom idle, tickle and stopping behaviour
    pub fn with_hooks(
        config: SchedulerConfig,
        hooks: Arc<dyn SchedulerHooks>,
    ) -> SchedResult<Arc<Scheduler>> {
        config.validate()?;
        tls::install_log_context();

        let use_caller = config.use_caller;
        if use_caller {
            contract_assert!(
                !tls::has_scheduler(),
                "thread already runs a scheduler; cannot fold it into {}",
                config.name
            );
        }

        let sched = Arc::new_cyclic(|me: &Weak<Scheduler>| Scheduler {
            hooks,
            me: me.clone(),
            queue: Mutex::new(VecDeque::new()),
            workers: Mutex::new(Vec::new()),
            thread_ids: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(true),
            auto_stop: AtomicBool::new(false),
            root_fiber: Mutex::new(None),
            root_thread: use_caller.then(|| thread::current().id()),
            config,
        });

        if use_caller {
            let weak = Arc::downgrade(&sched);
            let root = Fiber::builder()
                .stack_size(sched.config.stack_size)
                .run_in_scheduler(false)
                .spawn(move || {
                    if let Some(s) = weak.upgrade() {
                        s.run(0);
                    }
                })?;
            tls::set_scheduler(Some(&sched));
            tls::set_worker_id(Some(0));
            *sched.root_fiber.lock() = Some(root);
            sched.thread_ids.lock().push(current_tid());
        }

        kdebug!("scheduler {} created: {} thread(s), use_caller={}", sched.name(), sched.config.threads, use_caller);
        Ok(sched)
    }

    /// Scheduler running the current thread, if any
    pub fn current() -> Option<Arc<Scheduler>> {
        tls::scheduler()
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Workers including the caller thread in use-caller mode
    pub fn worker_count(&self) -> usize {
        self.config.threads
    }

    pub fn hooks(&self) -> &Arc<dyn SchedulerHooks> {
        &self.hooks
    }

    pub fn has_idle_threads(&self) -> bool {
        self.idle.load(Ordering::SeqCst) > 0
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn idle_count(&self) -> usize {
        self.idle.load(Ordering::SeqCst)
    }

    /// Entries waiting in the queue
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Enqueue a task for any worker
    pub fn schedule(&self, task: impl Into<Task>) {
        self.push(task.into(), None);
    }

    /// Enqueue a callback for any worker
    pub fn schedule_fn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(Task::callback(f), None);
    }

    /// Enqueue a task that only `worker` may run
    pub fn schedule_on(&self, task: impl Into<Task>, worker: usize) {
        contract_assert!(
            worker < self.config.threads,
            "worker {} out of range for scheduler {} with {} worker(s)",
            worker,
            self.name(),
            self.config.threads
        );
        self.push(task.into(), Some(worker));
    }

    /// Enqueue several tasks under one lock acquisition
    pub fn schedule_all<I, T>(&self, tasks: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<Task>,
    {
        let need_tickle = {
            let mut q = self.queue.lock();
            let was_empty = q.is_empty();
            let before = q.len();
            q.extend(tasks.into_iter().map(|t| Entry {
                task: t.into(),
                worker: None,
            }));
            was_empty && q.len() > before
        };
        if need_tickle {
            self.tickle();
        }
    }

    pub(crate) fn push(&self, task: Task, worker: Option<usize>) {
        let need_tickle = {
            let mut q = self.queue.lock();
            let was_empty = q.is_empty();
            q.push_back(Entry { task, worker });
            was_empty
        };
        if need_tickle {
            self.tickle();
        }
    }

    pub fn tickle(&self) {
        self.hooks.tickle(self);
    }

    /// Spawn the worker threads; calling it again is a no-op
    pub fn start(self: &Arc<Self>) -> SchedResult<()> {
        let mut workers = self.workers.lock();
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stopping.store(false, Ordering::SeqCst);

        let first = if self.config.use_caller { 1 } else { 0 };
        let count = self.config.spawned_threads();
        let ready = Arc::new(Semaphore::new(0));

        for id in first..first + count {
            let name = format!("{}-worker-{}", self.config.name, id);
            let sched = Arc::clone(self);
            let ready2 = Arc::clone(&ready);
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || sched.worker_main(id, &ready2))
                .map_err(|source| {
                    kerror!("failed to spawn {}: {}", name, source);
                    SchedError::Spawn { name, source }
                })?;
            workers.push(handle);
        }

        // Thread ids are only recorded once every worker is up
        for _ in 0..count {
            ready.wait();
        }
        kinfo!("scheduler {} started with {} worker thread(s)", self.name(), self.config.threads);
        Ok(())
    }

    fn worker_main(self: Arc<Self>, id: usize, ready: &Semaphore) {
        self.thread_ids.lock().push(current_tid());
        ready.notify();
        self.run(id);
        tls::set_scheduler(None);
        tls::set_worker_id(None);
    }

    /// Drain the queue and join every worker
    ///
    /// In use-caller mode this must run on the constructing thread, which
    /// executes its share of the queue here. Otherwise it must not run on
    /// one of this scheduler's workers.
    pub fn stop(self: &Arc<Self>) {
        self.auto_stop.store(true, Ordering::SeqCst);

        let root = self.root_fiber.lock().clone();
        if let Some(root) = &root {
            if self.config.threads == 1
                && matches!(root.state(), FiberState::Init | FiberState::Term)
            {
                kdebug!("scheduler {} stopping (caller only)", self.name());
                self.stopping.store(true, Ordering::SeqCst);
                if self.stopping() {
                    return;
                }
            }
        }

        match self.root_thread {
            Some(owner) => contract_assert!(
                thread::current().id() == owner,
                "stop() of use_caller scheduler {} called from a foreign thread",
                self.name()
            ),
            None => contract_assert!(
                !Scheduler::current().is_some_and(|s| Arc::ptr_eq(&s, self)),
                "stop() of scheduler {} called from its own worker",
                self.name()
            ),
        }

        self.stopping.store(true, Ordering::SeqCst);
        for _ in 0..self.config.threads {
            self.tickle();
        }

        if let Some(root) = root {
            if root.state().is_resumable() && !self.stopping() {
                root.resume();
            }
        }

        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if handle.join().is_err() {
                kerror!("worker of scheduler {} panicked", self.name());
            }
        }
        kinfo!("scheduler {} stopped", self.name());
    }

    /// Whether the run loops may exit now
    pub fn stopping(&self) -> bool {
        self.hooks.stopping(self)
    }

    /// Auto-stop requested, stop flag set, queue empty and no worker busy
    pub fn base_stopping(&self) -> bool {
        self.auto_stop.load(Ordering::SeqCst)
            && self.stopping.load(Ordering::SeqCst)
            && self.queue.lock().is_empty()
            && self.active.load(Ordering::SeqCst) == 0
    }

    /// Move the running fiber to this scheduler, optionally pinned, and yield
    ///
    /// Returns immediately when already on a matching worker.
    pub fn switch_to(self: &Arc<Self>, worker: Option<usize>) {
        if let Some(cur) = Scheduler::current() {
            if Arc::ptr_eq(&cur, self) && (worker.is_none() || worker == tls::worker_id()) {
                return;
            }
        }
        contract_assert!(Fiber::in_fiber(), "switch_to() outside a fiber");
        self.push(Task::Fiber(Fiber::current()), worker);
        Fiber::yield_to_hold();
    }

    /// Pick the next runnable entry for `worker`
    fn take_next(&self, worker: usize) -> Option<Entry> {
        let mut tickle_me = false;
        let picked = {
            let mut q = self.queue.lock();
            let mut picked = None;
            let mut i = 0;
            while i < q.len() {
                let entry = &q[i];
                if entry.worker.is_some_and(|w| w != worker) {
                    tickle_me = true;
                    i += 1;
                    continue;
                }
                // Still switching out on another worker
                if let Task::Fiber(f) = &entry.task {
                    if f.state() == FiberState::Exec {
                        tickle_me = true;
                        i += 1;
                        continue;
                    }
                }
                picked = q.remove(i);
                self.active.fetch_add(1, Ordering::SeqCst);
                break;
            }
            tickle_me |= picked.is_some() && i < q.len();
            picked
        };
        if tickle_me {
            self.tickle();
        }
        picked
    }

    /// The per-worker run loop
    fn run(self: &Arc<Self>, worker: usize) {
        tls::set_scheduler(Some(self));
        tls::set_worker_id(Some(worker));
        kdebug!("scheduler {} worker {} running", self.name(), worker);

        let weak = self.me.clone();
        let idle_fiber = match Fiber::with_options(
            Box::new(move || {
                if let Some(s) = weak.upgrade() {
                    let hooks = Arc::clone(&s.hooks);
                    hooks.idle(&s);
                }
            }),
            self.config.stack_size,
            true,
        ) {
            Ok(f) => f,
            Err(e) => {
                kerror!("worker {} cannot create its idle fiber: {}", worker, e);
                return;
            }
        };

        let pool_cap = self.config.callback_fiber_pool;
        let mut pool: Vec<Arc<Fiber>> = Vec::with_capacity(pool_cap);

        loop {
            match self.take_next(worker) {
                Some(Entry { task: Task::Fiber(fiber), .. }) => {
                    if fiber.state().is_resumable() {
                        let left = fiber.resume();
                        if left == FiberState::Ready {
                            self.push(Task::Fiber(fiber), None);
                        } else if left == FiberState::Except {
                            kwarn!("fiber {} ended with a panic", fiber.id());
                        }
                    } else {
                        kdebug!("skipping fiber {} in state {}", fiber.id(), fiber.state());
                    }
                    self.active.fetch_sub(1, Ordering::SeqCst);
                }
                Some(Entry { task: Task::Callback(cb), .. }) => {
                    let fiber = match pool.pop() {
                        Some(f) => {
                            f.reset_boxed(cb);
                            f
                        }
                        None => match Fiber::with_options(cb, self.config.stack_size, true) {
                            Ok(f) => f,
                            Err(e) => {
                                kerror!("dropping callback, no fiber available: {}", e);
                                self.active.fetch_sub(1, Ordering::SeqCst);
                                continue;
                            }
                        },
                    };
                    match fiber.resume() {
                        FiberState::Ready => self.push(Task::Fiber(fiber), None),
                        FiberState::Term | FiberState::Except => {
                            if pool.len() < pool_cap {
                                pool.push(fiber);
                            }
                        }
                        // Whoever parked it holds its own handle
                        _ => {}
                    }
                    self.active.fetch_sub(1, Ordering::SeqCst);
                }
                None => {
                    if idle_fiber.state().is_terminal() {
                        kdebug!("worker {} idle fiber finished", worker);
                        break;
                    }
                    self.idle.fetch_add(1, Ordering::SeqCst);
                    idle_fiber.resume();
                    self.idle.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }
    }
}

impl fmt::Display for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Scheduler name={} size={} active_count={} idle_count={} stopping={} ]",
            self.name(),
            self.config.threads,
            self.active_count(),
            self.idle_count(),
            self.stopping.load(Ordering::SeqCst)
        )?;
        let tids = self.thread_ids.lock();
        write!(f, "\n    ")?;
        for (i, tid) in tids.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", tid)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.config.name)
            .field("threads", &self.config.threads)
            .field("use_caller", &self.config.use_caller)
            .field("active", &self.active_count())
            .field("idle", &self.idle_count())
            .finish()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if self.started.load(Ordering::SeqCst) && !self.stopping.load(Ordering::SeqCst) {
            kwarn!("scheduler {} dropped without stop()", self.config.name);
        }
        kdebug!("scheduler {} dropped", self.config.name);
    }
}

/// Moves the running fiber onto a scheduler, and back to the original one on drop
pub struct SchedulerSwitcher {
    caller: Option<Arc<Scheduler>>,
}

impl SchedulerSwitcher {
    pub fn new(target: Option<&Arc<Scheduler>>) -> Self {
        let caller = Scheduler::current();
        if let Some(target) = target {
            target.switch_to(None);
        }
        SchedulerSwitcher { caller }
    }
}

impl Drop for SchedulerSwitcher {
    fn drop(&mut self) {
        if let Some(caller) = self.caller.take() {
            caller.switch_to(None);
        }
    }
}

fn current_tid() -> i32 {
    nix::unistd::gettid().as_raw()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn config(threads: usize, use_caller: bool) -> SchedulerConfig {
        SchedulerConfig::new()
            .threads(threads)
            .use_caller(use_caller)
            .stack_size(64 * 1024)
            .park_timeout(Duration::from_millis(10))
            .name("test")
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn test_stop_drains_queued_callbacks() {
        let sched = Scheduler::new(config(2, false)).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let c = count.clone();
            sched.schedule_fn(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        sched.start().unwrap();
        sched.stop();
        assert_eq!(count.load(Ordering::SeqCst), 100);
        assert_eq!(sched.queued(), 0);
    }

    #[test]
    fn test_use_caller_runs_work_in_stop() {
        let count = Arc::new(AtomicUsize::new(0));
        let caller = thread::current().id();
        let ran_on_caller = Arc::new(AtomicBool::new(false));

        let handle = {
            let count = count.clone();
            let ran_on_caller = ran_on_caller.clone();
            thread::spawn(move || {
                let owner = thread::current().id();
                assert_ne!(owner, caller);
                let sched = Scheduler::new(config(1, true)).unwrap();
                sched.start().unwrap();
                for _ in 0..10 {
                    let c = count.clone();
                    let r = ran_on_caller.clone();
                    sched.schedule_fn(move || {
                        if thread::current().id() == owner {
                            r.store(true, Ordering::SeqCst);
                        }
                        c.fetch_add(1, Ordering::SeqCst);
                    });
                }
                // Nothing runs before stop() with a single caller thread
                thread::sleep(Duration::from_millis(20));
                assert_eq!(count.load(Ordering::SeqCst), 0);
                sched.stop();
            })
        };
        handle.join().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 10);
        assert!(ran_on_caller.load(Ordering::SeqCst));
    }

    #[test]
    fn test_fiber_ready_is_requeued() {
        let sched = Scheduler::new(config(1, false)).unwrap();
        let steps = Arc::new(AtomicUsize::new(0));
        let s = steps.clone();
        let fiber = Fiber::new(move || {
            for _ in 0..5 {
                s.fetch_add(1, Ordering::SeqCst);
                Fiber::yield_to_ready();
            }
        })
        .unwrap();
        sched.schedule(fiber.clone());
        sched.start().unwrap();
        sched.stop();
        assert_eq!(steps.load(Ordering::SeqCst), 5);
        assert_eq!(fiber.state(), FiberState::Term);
    }

    #[test]
    fn test_affinity_pins_to_worker() {
        let sched = Scheduler::new(config(3, false)).unwrap();
        sched.start().unwrap();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for _ in 0..20 {
            let seen = seen.clone();
            sched.schedule_on(
                Task::callback(move || seen.lock().push(tls::worker_id())),
                2,
            );
        }
        sched.stop();
        let seen = seen.lock();
        assert_eq!(seen.len(), 20);
        assert!(seen.iter().all(|w| *w == Some(2)));
    }

    #[test]
    fn test_one_exec_fiber_per_thread() {
        let sched = Scheduler::new(config(4, false)).unwrap();
        let violations = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(parking_lot::Mutex::new(std::collections::HashMap::new()));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..64 {
            let violations = violations.clone();
            let running = running.clone();
            let done = done.clone();
            let fiber = Fiber::new(move || {
                for _ in 0..20 {
                    let tid = current_tid();
                    {
                        let mut r = running.lock();
                        let n = r.entry(tid).or_insert(0usize);
                        *n += 1;
                        if *n > 1 {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                    std::hint::spin_loop();
                    *running.lock().get_mut(&tid).unwrap() -= 1;
                    Fiber::yield_to_ready();
                }
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
            sched.schedule(fiber);
        }
        sched.start().unwrap();
        sched.stop();
        assert_eq!(done.load(Ordering::SeqCst), 64);
        assert_eq!(violations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_switch_to_moves_fiber_between_workers() {
        let sched = Scheduler::new(config(2, false)).unwrap();
        sched.start().unwrap();
        let workers = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let (w, s) = (workers.clone(), sched.clone());
        sched.schedule_on(
            Task::callback(move || {
                w.lock().push(tls::worker_id());
                s.switch_to(Some(1));
                w.lock().push(tls::worker_id());
                s.switch_to(Some(0));
                w.lock().push(tls::worker_id());
            }),
            0,
        );
        assert!(wait_until(Duration::from_secs(5), || workers.lock().len() == 3));
        sched.stop();
        assert_eq!(*workers.lock(), vec![Some(0), Some(1), Some(0)]);
    }

    #[test]
    fn test_scheduler_switcher_round_trip() {
        let a = Scheduler::new(config(1, false).name("a")).unwrap();
        let b = Scheduler::new(config(1, false).name("b")).unwrap();
        a.start().unwrap();
        b.start().unwrap();

        let names = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let (n, b2) = (names.clone(), b.clone());
        a.schedule_fn(move || {
            let here = || Scheduler::current().map(|s| s.name().to_string());
            n.lock().push(here());
            {
                let _guard = SchedulerSwitcher::new(Some(&b2));
                n.lock().push(here());
            }
            n.lock().push(here());
        });
        assert!(wait_until(Duration::from_secs(5), || names.lock().len() == 3));
        a.stop();
        b.stop();

        let names = names.lock();
        assert_eq!(names[0].as_deref(), Some("a"));
        assert_eq!(names[1].as_deref(), Some("b"));
        assert_eq!(names[2].as_deref(), Some("a"));
    }

    #[test]
    fn test_panicking_callback_does_not_kill_worker() {
        let sched = Scheduler::new(config(1, false)).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        sched.schedule_fn(|| panic!("task failure"));
        let c = count.clone();
        sched.schedule_fn(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        sched.start().unwrap();
        sched.stop();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_start_is_idempotent_and_display() {
        let sched = Scheduler::new(config(2, false).name("dump")).unwrap();
        sched.start().unwrap();
        sched.start().unwrap();
        let text = sched.to_string();
        assert!(text.starts_with("[Scheduler name=dump size=2"));
        assert_eq!(text.lines().nth(1).unwrap().split(", ").count(), 2);
        assert_eq!(sched.worker_count(), 2);
        sched.stop();
    }

    #[test]
    fn test_stop_from_own_worker_is_contract_violation() {
        let sched = Scheduler::new(config(1, false)).unwrap();
        sched.start().unwrap();
        let caught = Arc::new(AtomicBool::new(false));
        let (s, c) = (sched.clone(), caught.clone());
        // Raised on a plain thread so it unwinds instead of aborting
        sched.schedule_fn(move || {
            let s2 = s.clone();
            let cur = Scheduler::current();
            let result = thread::spawn(move || {
                tls::set_scheduler(cur.as_ref());
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| s2.stop())).is_err()
            })
            .join()
            .unwrap();
            c.store(result, Ordering::SeqCst);
        });
        assert!(wait_until(Duration::from_secs(5), || caught.load(Ordering::SeqCst)));
        sched.stop();
    }

    #[test]
    fn test_schedule_on_out_of_range_is_contract_violation() {
        let sched = Scheduler::new(config(2, false)).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            sched.schedule_on(Task::callback(|| {}), 5);
        }));
        let payload = result.unwrap_err();
        assert!(payload.downcast_ref::<fibrio_core::ContractViolation>().is_some());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = Scheduler::new(config(0, false)).unwrap_err();
        assert!(matches!(err, SchedError::Config(_)));
    }
}

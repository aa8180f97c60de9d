//! epoll reactor on top of the scheduler
//!
//! [`IoManager`] is a [`Scheduler`] whose idle fibers block in the poller
//! instead of parking. Interest is registered per descriptor and per event
//! (`READ` or `WRITE`); when it fires, the registered task (a callback or
//! the fiber that asked) is queued on the scheduler that registered it.
//!
//! # Registration lifecycle
//!
//! ```text
//!   add_event ──► armed ──┬── readiness ──► handler queued (one shot)
//!                         ├── cancel_event ─► handler queued
//!                         └── del_event ───► handler dropped
//! ```
//!
//! Registrations are edge triggered and one-shot per event: after firing,
//! the remaining interest of the descriptor is re-armed and the fired event
//! must be added again.
//!
//! # Stopping
//!
//! `stop()` returns only once the queue is empty, no worker is busy, no
//! timer is armed and no registration is pending. A recurring timer or a
//! descriptor that never becomes ready keeps it running.

mod fd_context;

use std::any::Any;
use std::ops::Deref;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use fibrio_core::{
    contract_assert, kdebug, kerror, ktrace, Event, FiberState, RwLock, SchedError, SchedResult,
};

use crate::config::{ReactorConfig, SchedulerConfig};
use crate::fiber::Fiber;
use crate::poller::{Epoll, Poller, Readiness};
use crate::scheduler::{Scheduler, SchedulerHooks, Task};
use crate::timer::{Timer, TimerManager};

use fd_context::FdContext;

/// Scheduler hooks driving the poller and the timers
pub struct Reactor {
    poller: Arc<dyn Poller>,
    fds: RwLock<Vec<Arc<FdContext>>>,
    pending: AtomicUsize,
    timers: TimerManager,
    config: ReactorConfig,
}

impl Reactor {
    pub fn new(config: ReactorConfig) -> SchedResult<Reactor> {
        config.validate()?;
        let epoll = Epoll::new(config.max_events).map_err(|e| {
            kerror!("cannot create epoll instance: {}", e);
            SchedError::Poller(e)
        })?;
        let poller: Arc<dyn Poller> = Arc::new(epoll);

        // A timer that becomes the earliest one shortens the current wait
        let waker = Arc::clone(&poller);
        let timers = TimerManager::new(move || {
            if let Err(e) = waker.wake() {
                kerror!("reactor wake failed: {}", e);
            }
        });

        let mut table = Vec::new();
        grow(&mut table, config.initial_fd_capacity)?;

        Ok(Reactor {
            poller,
            fds: RwLock::new(table),
            pending: AtomicUsize::new(0),
            timers,
            config,
        })
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }

    pub fn timers(&self) -> &TimerManager {
        &self.timers
    }

    /// Registrations armed and not yet fired, cancelled or deleted
    pub fn pending_events(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn lookup(&self, fd: RawFd) -> Option<Arc<FdContext>> {
        let idx = usize::try_from(fd).ok()?;
        self.fds.read().get(idx).cloned()
    }

    fn lookup_or_grow(&self, fd: RawFd) -> SchedResult<Arc<FdContext>> {
        let idx = usize::try_from(fd).map_err(|_| SchedError::InvalidFd(fd))?;
        if let Some(ctx) = self.fds.read().get(idx) {
            return Ok(Arc::clone(ctx));
        }
        let mut table = self.fds.write();
        if idx >= table.len() {
            let target = (idx * 3 / 2).max(idx + 1);
            grow(&mut table, target)?;
            kdebug!("fd table grown to {} entries for fd {}", target, fd);
        }
        Ok(Arc::clone(&table[idx]))
    }

    /// Re-register the remaining interest, or drop the fd when none is left
    fn rearm(&self, fd: RawFd, left: Event) -> std::io::Result<()> {
        if left.is_empty() {
            self.poller.deregister(fd)
        } else {
            self.poller.modify(fd, left)
        }
    }

    fn add_event(
        &self,
        owner: &Arc<Scheduler>,
        fd: RawFd,
        event: Event,
        task: Option<Task>,
    ) -> SchedResult<()> {
        contract_assert!(event.is_single(), "add_event() takes READ or WRITE, got {:?}", event);
        let ctx = self.lookup_or_grow(fd)?;

        let task = match task {
            Some(task) => task,
            None => {
                contract_assert!(Fiber::in_fiber(), "add_event() without a handler outside a fiber");
                let fiber = Fiber::current();
                contract_assert!(
                    fiber.state() == FiberState::Exec,
                    "add_event() from fiber {} in state {}",
                    fiber.id(),
                    fiber.state()
                );
                Task::Fiber(fiber)
            }
        };

        let mut st = ctx.lock();
        contract_assert!(
            !st.events.contains(event),
            "fd {} already waits for {:?}",
            fd,
            event
        );

        let interest = st.events | event;
        let (op, res) = if st.events.is_empty() {
            ("ADD", self.poller.register(fd, interest))
        } else {
            ("MOD", self.poller.modify(fd, interest))
        };
        if let Err(source) = res {
            kerror!("epoll_ctl({}) fd {} {:?}: {}", op, fd, interest, source);
            return Err(SchedError::Register { fd, op, source });
        }

        self.pending.fetch_add(1, Ordering::SeqCst);
        st.events = interest;
        let ectx = st.context_mut(event);
        contract_assert!(ectx.is_empty(), "fd {} {:?} has a stale handler", fd, event);
        ectx.scheduler = Some(Scheduler::current().unwrap_or_else(|| Arc::clone(owner)));
        ectx.task = Some(task);
        Ok(())
    }

    fn del_event(&self, fd: RawFd, event: Event) -> bool {
        let Some(ctx) = self.lookup(fd) else {
            return false;
        };
        let mut st = ctx.lock();
        if !st.events.contains(event) {
            return false;
        }
        let left = st.events.without(event);
        if let Err(e) = self.rearm(fd, left) {
            kerror!("del_event fd {} {:?}: {}", fd, event, e);
            return false;
        }
        self.pending.fetch_sub(1, Ordering::SeqCst);
        st.events = left;
        st.context_mut(event).clear();
        true
    }

    fn cancel_event(&self, fd: RawFd, event: Event) -> bool {
        let Some(ctx) = self.lookup(fd) else {
            return false;
        };
        let mut st = ctx.lock();
        if !st.events.contains(event) {
            return false;
        }
        let left = st.events.without(event);
        if let Err(e) = self.rearm(fd, left) {
            kerror!("cancel_event fd {} {:?}: {}", fd, event, e);
            return false;
        }
        st.trigger(fd, event);
        self.pending.fetch_sub(1, Ordering::SeqCst);
        true
    }

    fn cancel_all(&self, fd: RawFd) -> bool {
        let Some(ctx) = self.lookup(fd) else {
            return false;
        };
        let mut st = ctx.lock();
        if st.events.is_empty() {
            return false;
        }
        if let Err(e) = self.poller.deregister(fd) {
            kerror!("cancel_all fd {}: {}", fd, e);
            return false;
        }
        for event in [Event::READ, Event::WRITE] {
            if st.events.contains(event) {
                st.trigger(fd, event);
                self.pending.fetch_sub(1, Ordering::SeqCst);
            }
        }
        true
    }

    /// Queue the handlers of everything a wait reported
    fn dispatch(&self, ready: &mut Vec<Readiness>) {
        for r in ready.drain(..) {
            let Some(ctx) = self.lookup(r.fd) else {
                continue;
            };
            let mut st = ctx.lock();
            let fired = r.event & st.events;
            if fired.is_empty() {
                continue;
            }
            let left = st.events.without(fired);
            if let Err(e) = self.rearm(r.fd, left) {
                kerror!("re-arming fd {} with {:?}: {}", r.fd, left, e);
                continue;
            }
            for event in [Event::READ, Event::WRITE] {
                if fired.contains(event) {
                    st.trigger(r.fd, event);
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }
    }
}

impl SchedulerHooks for Reactor {
    fn tickle(&self, _sched: &Scheduler) {
        if let Err(e) = self.poller.wake() {
            kerror!("reactor tickle failed: {}", e);
        }
    }

    fn idle(&self, sched: &Arc<Scheduler>) {
        let mut ready = Vec::with_capacity(self.config.max_events);
        loop {
            if sched.stopping() {
                kdebug!("reactor idle of {} exiting", sched.name());
                // Tickles coalesce in the eventfd; pass the wake on to the next idle worker
                self.tickle(sched);
                break;
            }

            let timeout = self
                .timers
                .next_timer()
                .map_or(self.config.max_wait, |t| t.min(self.config.max_wait));
            loop {
                match self.poller.wait(&mut ready, Some(timeout)) {
                    Ok(()) => break,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        kerror!("epoll_wait failed: {}", e);
                        break;
                    }
                }
            }

            let expired = self.timers.list_expired_callbacks();
            if !expired.is_empty() {
                ktrace!("scheduling {} timer callback(s)", expired.len());
                sched.schedule_all(expired.into_iter().map(|cb| Task::callback(move || cb())));
            }

            self.dispatch(&mut ready);
            Fiber::yield_to_hold();
        }
    }

    fn stopping(&self, sched: &Scheduler) -> bool {
        !self.timers.has_timer()
            && self.pending.load(Ordering::SeqCst) == 0
            && sched.base_stopping()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        let pending = self.pending.load(Ordering::SeqCst);
        if pending > 0 {
            kdebug!("reactor dropped with {} pending registration(s)", pending);
        }
    }
}

fn grow(table: &mut Vec<Arc<FdContext>>, target: usize) -> SchedResult<()> {
    let start = table.len();
    if target <= start {
        return Ok(());
    }
    table
        .try_reserve_exact(target - start)
        .map_err(|_| SchedError::TableGrowth(target))?;
    table.extend((start..target).map(|fd| Arc::new(FdContext::new(fd as RawFd))));
    Ok(())
}

/// Cloneable access to a running IoManager
///
/// Dereferences to the underlying [`Scheduler`] for `schedule`,
/// `switch_to` and friends.
#[derive(Clone)]
pub struct IoHandle {
    sched: Arc<Scheduler>,
    reactor: Arc<Reactor>,
}

impl IoHandle {
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.sched
    }

    pub fn reactor(&self) -> &Arc<Reactor> {
        &self.reactor
    }

    /// Arm `event` on `fd`
    ///
    /// With `task == None` the calling fiber is captured and rescheduled
    /// when the event fires; it should `Fiber::yield_to_hold()` next.
    /// Registering an event that is already armed on `fd` is a contract
    /// violation.
    pub fn add_event(&self, fd: RawFd, event: Event, task: Option<Task>) -> SchedResult<()> {
        self.reactor.add_event(&self.sched, fd, event, task)
    }

    /// Callback flavour of `add_event`
    pub fn on_event<F>(&self, fd: RawFd, event: Event, f: F) -> SchedResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.reactor.add_event(&self.sched, fd, event, Some(Task::callback(f)))
    }

    /// Disarm without running the handler; false if not armed
    pub fn del_event(&self, fd: RawFd, event: Event) -> bool {
        self.reactor.del_event(fd, event)
    }

    /// Disarm and queue the handler as if the event fired; false if not armed
    pub fn cancel_event(&self, fd: RawFd, event: Event) -> bool {
        self.reactor.cancel_event(fd, event)
    }

    /// `cancel_event` for every armed event of `fd`
    pub fn cancel_all(&self, fd: RawFd) -> bool {
        self.reactor.cancel_all(fd)
    }

    pub fn pending_events(&self) -> usize {
        self.reactor.pending_events()
    }

    pub fn add_timer<F>(&self, delay: Duration, cb: F, recurring: bool) -> Timer
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.reactor.timers.add_timer(delay, cb, recurring)
    }

    pub fn add_condition_timer<F, T>(
        &self,
        delay: Duration,
        cb: F,
        cond: Weak<T>,
        recurring: bool,
    ) -> Timer
    where
        F: Fn() + Send + Sync + 'static,
        T: Send + Sync + 'static,
    {
        self.reactor.timers.add_condition_timer(delay, cb, cond, recurring)
    }

    pub fn timers(&self) -> &TimerManager {
        &self.reactor.timers
    }
}

impl Deref for IoHandle {
    type Target = Arc<Scheduler>;

    fn deref(&self) -> &Arc<Scheduler> {
        &self.sched
    }
}

/// Owning IoManager: started on construction, stopped on drop
///
/// Dropping it follows the rules of [`Scheduler::stop`]: in use-caller mode
/// it must happen on the constructing thread, otherwise not on one of its
/// own workers.
pub struct IoManager {
    handle: IoHandle,
}

impl IoManager {
    /// Reactor settings come from the environment
    pub fn new(config: SchedulerConfig) -> SchedResult<IoManager> {
        IoManager::with_config(config, ReactorConfig::from_env())
    }

    pub fn with_config(config: SchedulerConfig, reactor: ReactorConfig) -> SchedResult<IoManager> {
        let reactor = Arc::new(Reactor::new(reactor)?);
        let hooks: Arc<dyn SchedulerHooks> = Arc::clone(&reactor) as Arc<dyn SchedulerHooks>;
        let sched = Scheduler::with_hooks(config, hooks)?;
        sched.start()?;
        Ok(IoManager {
            handle: IoHandle { sched, reactor },
        })
    }

    /// IoManager running the current thread, if its scheduler is one
    pub fn current() -> Option<IoHandle> {
        let sched = Scheduler::current()?;
        let reactor = Arc::clone(sched.hooks()).into_any().downcast::<Reactor>().ok()?;
        Some(IoHandle { sched, reactor })
    }

    pub fn handle(&self) -> IoHandle {
        self.handle.clone()
    }

    pub fn stop(&self) {
        self.handle.sched.stop();
    }
}

impl Deref for IoManager {
    type Target = IoHandle;

    fn deref(&self) -> &IoHandle {
        &self.handle
    }
}

impl Drop for IoManager {
    fn drop(&mut self) {
        self.handle.sched.stop();
    }
}

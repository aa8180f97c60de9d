//! Stackful fibers
//!
//! A [`Fiber`] owns an mmap'd stack and a saved register block. `resume()`
//! switches the calling thread onto the fiber; `yield_to_hold()` and
//! `yield_to_ready()` switch back to whoever resumed it.
//!
//! Every thread has an implicit main fiber standing for its original
//! stack, created on first use. A fiber that resumes another is `Hold`
//! until control comes back to it.
//!
//! # State publication
//!
//! A yielding fiber does not publish its new state itself. It records the
//! requested state and switches away; the resumer stores it once
//! `switch_context` has returned, i.e. after the fiber's registers are
//! fully saved. Until then the fiber still reads as `Exec`, which keeps
//! other workers from resuming it while it is half-suspended.

use std::any::Any;
use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use fibrio_core::{
    contract_assert, kdebug, kerror, kwarn, ContractViolation, FiberId, FiberState, SchedResult,
};

use crate::arch::{self, Context};
use crate::config::defaults;
use crate::stack::Stack;
use crate::tls;

type Entry = Box<dyn FnOnce() + Send + 'static>;

static FIBER_COUNT: AtomicUsize = AtomicUsize::new(0);

/// A stackful cooperative coroutine
pub struct Fiber {
    id: FiberId,
    state: AtomicU8,
    /// State requested by the last yield, published by the resumer
    yield_state: AtomicU8,
    ctx: UnsafeCell<Context>,
    stack: Option<Stack>,
    entry: UnsafeCell<Option<Entry>>,
    /// Fiber that resumed us; valid only while we are `Exec`
    resumer: Cell<*const Fiber>,
    run_in_scheduler: bool,
}

// A fiber is only touched by the thread running it, or by the thread
// resuming it while it is suspended; `state` arbitrates between them.
unsafe impl Send for Fiber {}
unsafe impl Sync for Fiber {}

/// Builder for fibers with a non-default stack or scheduling mode
#[derive(Debug, Clone)]
pub struct FiberBuilder {
    stack_size: usize,
    run_in_scheduler: bool,
}

impl Default for FiberBuilder {
    fn default() -> Self {
        FiberBuilder {
            stack_size: defaults::STACK_SIZE,
            run_in_scheduler: true,
        }
    }
}

impl FiberBuilder {
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    /// When false the fiber may be resumed outside a scheduler
    pub fn run_in_scheduler(mut self, enable: bool) -> Self {
        self.run_in_scheduler = enable;
        self
    }

    pub fn spawn<F>(self, entry: F) -> SchedResult<Arc<Fiber>>
    where
        F: FnOnce() + Send + 'static,
    {
        Fiber::with_options(Box::new(entry), self.stack_size, self.run_in_scheduler)
    }
}

impl Fiber {
    /// New fiber with the default stack size, resumable inside a scheduler
    pub fn new<F>(entry: F) -> SchedResult<Arc<Fiber>>
    where
        F: FnOnce() + Send + 'static,
    {
        Fiber::builder().spawn(entry)
    }

    pub fn builder() -> FiberBuilder {
        FiberBuilder::default()
    }

    pub(crate) fn with_options(
        entry: Entry,
        stack_size: usize,
        run_in_scheduler: bool,
    ) -> SchedResult<Arc<Fiber>> {
        let stack = Stack::new(stack_size)?;
        let fiber = Arc::new(Fiber {
            id: FiberId::next(),
            state: AtomicU8::new(FiberState::Init as u8),
            yield_state: AtomicU8::new(FiberState::Init as u8),
            ctx: UnsafeCell::new(Context::default()),
            stack: Some(stack),
            entry: UnsafeCell::new(Some(entry)),
            resumer: Cell::new(ptr::null()),
            run_in_scheduler,
        });
        fiber.init_context();
        FIBER_COUNT.fetch_add(1, Ordering::Relaxed);
        kdebug!("fiber {} created", fiber.id);
        Ok(fiber)
    }

    /// The pseudo-fiber for a thread's original stack
    pub(crate) fn new_main() -> Arc<Fiber> {
        FIBER_COUNT.fetch_add(1, Ordering::Relaxed);
        Arc::new(Fiber {
            id: FiberId::next(),
            state: AtomicU8::new(FiberState::Exec as u8),
            yield_state: AtomicU8::new(FiberState::Exec as u8),
            ctx: UnsafeCell::new(Context::default()),
            stack: None,
            entry: UnsafeCell::new(None),
            resumer: Cell::new(ptr::null()),
            run_in_scheduler: false,
        })
    }

    fn init_context(self: &Arc<Self>) {
        if let Some(stack) = &self.stack {
            unsafe {
                arch::init_context(
                    self.ctx.get(),
                    stack.top(),
                    fiber_main,
                    Arc::as_ptr(self) as usize,
                );
            }
        }
    }

    #[inline]
    pub fn id(&self) -> FiberId {
        self.id
    }

    #[inline]
    pub fn state(&self) -> FiberState {
        FiberState::from(self.state.load(Ordering::Acquire))
    }

    #[inline]
    fn set_state(&self, state: FiberState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Thread-main fibers have no stack of their own
    #[inline]
    pub fn is_main(&self) -> bool {
        self.stack.is_none()
    }

    #[inline]
    pub fn run_in_scheduler(&self) -> bool {
        self.run_in_scheduler
    }

    pub fn stack_size(&self) -> usize {
        self.stack.as_ref().map_or(0, Stack::size)
    }

    /// Switch onto this fiber until it yields or finishes
    ///
    /// Returns the state the fiber left in: `Hold`, `Ready`, `Term` or
    /// `Except`. The caller is `Hold` for the duration.
    pub fn resume(self: &Arc<Self>) -> FiberState {
        let state = self.state();
        contract_assert!(
            state.is_resumable() && !self.is_main(),
            "resume() on fiber {} in state {}",
            self.id,
            state
        );
        if self.run_in_scheduler {
            contract_assert!(
                tls::has_scheduler(),
                "fiber {} must be resumed by a scheduler thread",
                self.id
            );
        }

        let caller = tls::current_fiber_or_main();
        let me = Arc::as_ptr(self);
        contract_assert!(caller != me, "fiber {} resumed itself", self.id);

        unsafe {
            (*caller).set_state(FiberState::Hold);
        }
        self.resumer.set(caller);
        self.set_state(FiberState::Exec);
        tls::set_current_fiber(me);

        unsafe {
            arch::switch_context((*caller).ctx.get(), self.ctx.get());
        }

        // Back on the caller's stack; the fiber has restored TLS for us
        let caller = tls::current_fiber_ptr();
        unsafe {
            (*caller).set_state(FiberState::Exec);
        }
        let left = FiberState::from(self.yield_state.load(Ordering::Acquire));
        self.resumer.set(ptr::null());
        self.set_state(left);
        left
    }

    /// Replace the entry of a finished (or never started) fiber, reusing its stack
    pub fn reset<F>(self: &Arc<Self>, entry: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.reset_boxed(Box::new(entry));
    }

    pub(crate) fn reset_boxed(self: &Arc<Self>, entry: Entry) {
        let state = self.state();
        contract_assert!(
            state.is_resettable() && !self.is_main(),
            "reset() on fiber {} in state {}",
            self.id,
            state
        );
        unsafe {
            *self.entry.get() = Some(entry);
        }
        self.init_context();
        self.set_state(FiberState::Init);
    }

    /// The fiber running on this thread (the main fiber if none was resumed)
    pub fn current() -> Arc<Fiber> {
        let p = tls::current_fiber_or_main();
        // The running fiber is kept alive by whoever resumed it
        unsafe {
            Arc::increment_strong_count(p);
            Arc::from_raw(p)
        }
    }

    /// Id of the running fiber, `FiberId::NONE` if this thread never used fibers
    pub fn current_id() -> FiberId {
        let p = tls::current_fiber_ptr();
        if p.is_null() {
            FiberId::NONE
        } else {
            unsafe { (*p).id }
        }
    }

    /// Whether the caller is on a fiber stack rather than a thread main stack
    pub fn in_fiber() -> bool {
        let p = tls::current_fiber_ptr();
        !p.is_null() && unsafe { !(*p).is_main() }
    }

    /// Live fibers in the process, main fibers included
    pub fn total() -> usize {
        FIBER_COUNT.load(Ordering::Relaxed)
    }

    /// Suspend the running fiber; it runs again only after an explicit reschedule
    pub fn yield_to_hold() {
        Fiber::yield_with(FiberState::Hold);
    }

    /// Suspend the running fiber; a scheduler re-queues it immediately
    pub fn yield_to_ready() {
        Fiber::yield_with(FiberState::Ready);
    }

    fn yield_with(state: FiberState) {
        let cur = tls::current_fiber_ptr();
        contract_assert!(
            !cur.is_null() && unsafe { !(*cur).is_main() },
            "yield outside of a fiber"
        );
        unsafe { switch_out(cur, state) }
    }
}

/// Hand control back to the resumer of `cur`, leaving `state` for it to publish
unsafe fn switch_out(cur: *const Fiber, state: FiberState) {
    let fiber = &*cur;
    let resumer = fiber.resumer.get();
    contract_assert!(!resumer.is_null(), "fiber {} has no resumer", fiber.id);
    fiber.yield_state.store(state as u8, Ordering::Release);
    tls::set_current_fiber(resumer);
    arch::switch_context(fiber.ctx.get(), (*resumer).ctx.get());
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Body of every fiber stack; entered from the arch trampoline
extern "C" fn fiber_main(arg: usize) -> ! {
    let cur = arg as *const Fiber;
    let final_state = {
        let fiber = unsafe { &*cur };
        let entry = unsafe { (*fiber.entry.get()).take() };
        match entry {
            Some(f) => match panic::catch_unwind(AssertUnwindSafe(f)) {
                Ok(()) => FiberState::Term,
                Err(payload) => {
                    if let Some(cv) = payload.downcast_ref::<ContractViolation>() {
                        kerror!("fatal in fiber {}: {}", fiber.id, cv);
                        std::process::abort();
                    }
                    kerror!("fiber {} panicked: {}", fiber.id, panic_message(&*payload));
                    FiberState::Except
                }
            },
            None => FiberState::Term,
        }
    };

    unsafe {
        switch_out(cur, final_state);
    }
    // A finished fiber is only re-entered through reset(), which rebuilds the context
    kerror!("terminated fiber resumed");
    std::process::abort();
}

impl Drop for Fiber {
    fn drop(&mut self) {
        FIBER_COUNT.fetch_sub(1, Ordering::Relaxed);
        let state = self.state();
        if self.stack.is_some() && !state.is_resettable() {
            kwarn!(
                "fiber {} dropped in state {}; its stack frames are leaked",
                self.id,
                state
            );
        }
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("stack_size", &self.stack_size())
            .field("run_in_scheduler", &self.run_in_scheduler)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn free_fiber<F: FnOnce() + Send + 'static>(f: F) -> Arc<Fiber> {
        Fiber::builder()
            .stack_size(64 * 1024)
            .run_in_scheduler(false)
            .spawn(f)
            .unwrap()
    }

    #[test]
    fn test_run_to_completion() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let fiber = free_fiber(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fiber.state(), FiberState::Init);
        assert_eq!(fiber.resume(), FiberState::Term);
        assert_eq!(fiber.state(), FiberState::Term);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_yield_and_resume_sequence() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = log.clone();
        let fiber = free_fiber(move || {
            l.lock().unwrap().push(1);
            Fiber::yield_to_hold();
            l.lock().unwrap().push(3);
            Fiber::yield_to_ready();
            l.lock().unwrap().push(5);
        });

        assert_eq!(fiber.resume(), FiberState::Hold);
        log.lock().unwrap().push(2);
        assert_eq!(fiber.resume(), FiberState::Ready);
        log.lock().unwrap().push(4);
        assert_eq!(fiber.resume(), FiberState::Term);
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_caller_is_exec_again_after_resume() {
        let fiber = free_fiber(|| {
            // The main fiber is Hold while we run
            Fiber::yield_to_hold();
        });
        let main = tls::main_fiber();
        fiber.resume();
        assert_eq!(main.state(), FiberState::Exec);
        assert_eq!(Fiber::current().id(), main.id());
        fiber.resume();
    }

    #[test]
    fn test_current_inside_fiber() {
        let seen = Arc::new(Mutex::new(FiberId::NONE));
        let s = seen.clone();
        let fiber = free_fiber(move || {
            *s.lock().unwrap() = Fiber::current_id();
            assert!(Fiber::in_fiber());
            assert_eq!(Fiber::current().state(), FiberState::Exec);
        });
        fiber.resume();
        assert_eq!(*seen.lock().unwrap(), fiber.id());
        assert!(!Fiber::in_fiber());
    }

    #[test]
    fn test_panic_becomes_except() {
        let fiber = free_fiber(|| panic!("boom"));
        assert_eq!(fiber.resume(), FiberState::Except);
        assert_eq!(fiber.state(), FiberState::Except);
    }

    #[test]
    fn test_reset_reuses_stack() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let fiber = free_fiber(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        fiber.resume();

        let h = hits.clone();
        fiber.reset(move || {
            h.fetch_add(10, Ordering::SeqCst);
        });
        assert_eq!(fiber.state(), FiberState::Init);
        assert_eq!(fiber.resume(), FiberState::Term);
        assert_eq!(hits.load(Ordering::SeqCst), 11);

        fiber.reset(|| panic!("again"));
        assert_eq!(fiber.resume(), FiberState::Except);
        fiber.reset(|| {});
        assert_eq!(fiber.resume(), FiberState::Term);
    }

    #[test]
    fn test_reset_while_held_is_contract_violation() {
        let fiber = free_fiber(|| Fiber::yield_to_hold());
        fiber.resume();
        let f = fiber.clone();
        let err = panic::catch_unwind(AssertUnwindSafe(move || f.reset(|| {}))).unwrap_err();
        assert!(err.downcast_ref::<ContractViolation>().is_some());
        fiber.resume();
        assert_eq!(fiber.state(), FiberState::Term);
    }

    #[test]
    fn test_resume_terminated_is_contract_violation() {
        let fiber = free_fiber(|| {});
        fiber.resume();
        let f = fiber.clone();
        let err = panic::catch_unwind(AssertUnwindSafe(move || {
            f.resume();
        }))
        .unwrap_err();
        assert!(err.downcast_ref::<ContractViolation>().is_some());
    }

    #[test]
    fn test_run_in_scheduler_requires_scheduler() {
        std::thread::spawn(|| {
            let fiber = Fiber::new(|| {}).unwrap();
            let f = fiber.clone();
            let err = panic::catch_unwind(AssertUnwindSafe(move || {
                f.resume();
            }))
            .unwrap_err();
            assert!(err.downcast_ref::<ContractViolation>().is_some());
            assert_eq!(fiber.state(), FiberState::Init);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_nested_resume() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = log.clone();
        let outer = free_fiber(move || {
            let l2 = l.clone();
            let inner = free_fiber(move || {
                l2.lock().unwrap().push("inner");
                Fiber::yield_to_hold();
                l2.lock().unwrap().push("inner-done");
            });
            assert_eq!(inner.resume(), FiberState::Hold);
            l.lock().unwrap().push("outer");
            Fiber::yield_to_hold();
            assert_eq!(inner.resume(), FiberState::Term);
        });
        assert_eq!(outer.resume(), FiberState::Hold);
        assert_eq!(outer.resume(), FiberState::Term);
        assert_eq!(*log.lock().unwrap(), vec!["inner", "outer", "inner-done"]);
    }

    #[test]
    fn test_fiber_migrates_between_threads() {
        let steps = Arc::new(AtomicUsize::new(0));
        let s = steps.clone();
        let fiber = free_fiber(move || {
            s.fetch_add(1, Ordering::SeqCst);
            Fiber::yield_to_hold();
            s.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fiber.resume(), FiberState::Hold);
        let f = fiber.clone();
        std::thread::spawn(move || {
            assert_eq!(f.resume(), FiberState::Term);
        })
        .join()
        .unwrap();
        assert_eq!(steps.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_total_counts_live_fibers() {
        let fiber = free_fiber(|| {});
        assert!(Fiber::total() >= 1);
        assert_eq!(fiber.stack_size() % crate::stack::page_size(), 0);
    }
}

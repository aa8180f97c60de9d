//! Per-descriptor registration state

use std::os::fd::RawFd;
use std::sync::Arc;

use fibrio_core::{contract_assert, Event, Mutex, MutexGuard};

use crate::scheduler::{Scheduler, Task};

/// What to run when one event of a descriptor fires
#[derive(Default)]
pub(crate) struct EventContext {
    /// Scheduler that registered the interest; the handler is queued there
    pub scheduler: Option<Arc<Scheduler>>,
    pub task: Option<Task>,
}

impl EventContext {
    pub fn is_empty(&self) -> bool {
        self.scheduler.is_none() && self.task.is_none()
    }

    pub fn clear(&mut self) {
        self.scheduler = None;
        self.task = None;
    }
}

pub(crate) struct FdState {
    /// Interest currently registered with the poller
    pub events: Event,
    read: EventContext,
    write: EventContext,
}

impl FdState {
    pub fn context_mut(&mut self, event: Event) -> &mut EventContext {
        contract_assert!(event.is_single(), "no single event context for {:?}", event);
        if event == Event::READ {
            &mut self.read
        } else {
            &mut self.write
        }
    }

    /// Drop `event` from the interest and queue its handler
    pub fn trigger(&mut self, fd: RawFd, event: Event) {
        contract_assert!(
            self.events.contains(event),
            "fd {} triggered for unregistered {:?} (registered {:?})",
            fd,
            event,
            self.events
        );
        self.events = self.events.without(event);
        let ctx = self.context_mut(event);
        let sched = ctx.scheduler.take();
        let task = ctx.task.take();
        if let (Some(sched), Some(task)) = (sched, task) {
            sched.schedule(task);
        }
    }
}

/// Registration slot for one descriptor number
pub(crate) struct FdContext {
    pub fd: RawFd,
    state: Mutex<FdState>,
}

impl FdContext {
    pub fn new(fd: RawFd) -> Self {
        FdContext {
            fd,
            state: Mutex::new(FdState {
                events: Event::NONE,
                read: EventContext::default(),
                write: EventContext::default(),
            }),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, FdState> {
        self.state.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_clears_interest_and_context() {
        let ctx = FdContext::new(7);
        let mut st = ctx.lock();
        st.events = Event::READ | Event::WRITE;
        st.context_mut(Event::WRITE).task = Some(Task::callback(|| {}));
        // No scheduler attached: the handler is dropped, the interest still goes
        st.trigger(7, Event::WRITE);
        assert_eq!(st.events, Event::READ);
        assert!(st.context_mut(Event::WRITE).is_empty());
    }

    #[test]
    #[should_panic]
    fn test_trigger_unregistered_event_panics() {
        let ctx = FdContext::new(3);
        ctx.lock().trigger(3, Event::READ);
    }
}

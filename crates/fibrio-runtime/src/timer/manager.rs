//! Timer manager

use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use fibrio_core::{ktrace, Mutex};

use super::entry::{HeapEntry, Timer, TimerSlot};
use super::TimerCallback;

/// Rebuild the heap once tombstones exceed live entries by this margin
const COMPACT_SLACK: usize = 64;

struct State {
    heap: BinaryHeap<HeapEntry>,
    slots: HashMap<u64, TimerSlot>,
    next_id: u64,
    next_seq: u64,
    /// Front-insertion wake already sent and not yet consumed by `next_timer`
    tickled: bool,
}

impl State {
    fn arm(&mut self, id: u64, deadline: Instant) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.heap.push(HeapEntry { deadline, seq, id });
        seq
    }

    fn is_live(&self, e: &HeapEntry) -> bool {
        self.slots.get(&e.id).is_some_and(|s| s.seq == e.seq)
    }

    /// Drop dead entries sitting at the top
    fn prune_front(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.is_live(top) {
                break;
            }
            self.heap.pop();
        }
    }

    fn maybe_compact(&mut self) {
        if self.heap.len() > 2 * self.slots.len() + COMPACT_SLACK {
            let slots = &self.slots;
            self.heap.retain(|e| slots.get(&e.id).is_some_and(|s| s.seq == e.seq));
        }
    }

    /// Whether the entry armed with `seq` is now the earliest one
    fn is_front(&self, seq: u64) -> bool {
        self.heap.peek().is_some_and(|top| top.seq == seq)
    }
}

pub(crate) struct TimerInner {
    state: Mutex<State>,
    on_front: Box<dyn Fn() + Send + Sync>,
}

impl TimerInner {
    /// Record a new front entry; returns whether the caller must run `on_front`
    fn front_wake(state: &mut State, seq: u64) -> bool {
        if state.is_front(seq) && !state.tickled {
            state.tickled = true;
            true
        } else {
            false
        }
    }

    fn notify(&self, wake: bool) {
        if wake {
            (self.on_front)();
        }
    }

    pub(super) fn cancel(&self, id: u64) -> bool {
        let mut st = self.state.lock();
        let removed = st.slots.remove(&id).is_some();
        if removed {
            st.maybe_compact();
        }
        removed
    }

    pub(super) fn refresh(&self, id: u64) -> bool {
        let wake = {
            let mut st = self.state.lock();
            let Some(interval) = st.slots.get(&id).map(|s| s.interval) else {
                return false;
            };
            let deadline = Instant::now() + interval;
            let seq = st.arm(id, deadline);
            if let Some(slot) = st.slots.get_mut(&id) {
                slot.seq = seq;
                slot.deadline = deadline;
            }
            st.maybe_compact();
            Self::front_wake(&mut st, seq)
        };
        self.notify(wake);
        true
    }

    pub(super) fn reset(&self, id: u64, interval: Duration, from_now: bool) -> bool {
        let wake = {
            let mut st = self.state.lock();
            let Some((old_deadline, old_interval)) =
                st.slots.get(&id).map(|s| (s.deadline, s.interval))
            else {
                return false;
            };
            if interval == old_interval && !from_now {
                return true;
            }
            let start = if from_now {
                Instant::now()
            } else {
                old_deadline.checked_sub(old_interval).unwrap_or(old_deadline)
            };
            let deadline = start + interval;
            let seq = st.arm(id, deadline);
            if let Some(slot) = st.slots.get_mut(&id) {
                slot.seq = seq;
                slot.deadline = deadline;
                slot.interval = interval;
            }
            st.maybe_compact();
            Self::front_wake(&mut st, seq)
        };
        self.notify(wake);
        true
    }

    pub(super) fn is_armed(&self, id: u64) -> bool {
        self.state.lock().slots.contains_key(&id)
    }
}

/// Ordered collection of deadline callbacks
pub struct TimerManager {
    inner: Arc<TimerInner>,
}

impl TimerManager {
    /// `on_front` runs (outside the lock) when a new timer becomes the
    /// earliest one, at most once between two `next_timer` calls
    pub fn new<F>(on_front: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        TimerManager {
            inner: Arc::new(TimerInner {
                state: Mutex::new(State {
                    heap: BinaryHeap::new(),
                    slots: HashMap::new(),
                    next_id: 0,
                    next_seq: 0,
                    tickled: false,
                }),
                on_front: Box::new(on_front),
            }),
        }
    }

    /// Fire `cb` after `delay`, then every `delay` if `recurring`
    pub fn add_timer<F>(&self, delay: Duration, cb: F, recurring: bool) -> Timer
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.add_callback(delay, Arc::new(cb), recurring)
    }

    /// Like `add_timer`, but the callback only runs while `cond` is alive
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
        self.add_callback(
            delay,
            Arc::new(move || {
                if cond.upgrade().is_some() {
                    cb();
                }
            }),
            recurring,
        )
    }

    fn add_callback(&self, delay: Duration, cb: TimerCallback, recurring: bool) -> Timer {
        let (id, wake) = {
            let mut st = self.inner.state.lock();
            st.next_id += 1;
            let id = st.next_id;
            let deadline = Instant::now() + delay;
            let seq = st.arm(id, deadline);
            st.slots.insert(
                id,
                TimerSlot {
                    seq,
                    deadline,
                    interval: delay,
                    recurring,
                    cb,
                },
            );
            (id, TimerInner::front_wake(&mut st, seq))
        };
        self.inner.notify(wake);
        Timer {
            id,
            manager: Arc::downgrade(&self.inner),
        }
    }

    /// Time until the earliest deadline; `Some(ZERO)` if one is already due,
    /// `None` with no timers
    pub fn next_timer(&self) -> Option<Duration> {
        let mut st = self.inner.state.lock();
        st.tickled = false;
        st.prune_front();
        st.heap
            .peek()
            .map(|top| top.deadline.saturating_duration_since(Instant::now()))
    }

    /// Pop every due timer and return their callbacks in deadline order
    ///
    /// Recurring timers are re-armed at now + interval, so a late caller
    /// gets at most one catch-up invocation.
    pub fn list_expired_callbacks(&self) -> Vec<TimerCallback> {
        let now = Instant::now();
        let mut expired = Vec::new();
        let mut st = self.inner.state.lock();
        if st.slots.is_empty() {
            st.heap.clear();
            return expired;
        }

        let mut rearm = Vec::new();
        while let Some(top) = st.heap.peek().copied() {
            if top.deadline > now {
                break;
            }
            st.heap.pop();
            let Some(slot) = st.slots.get(&top.id) else {
                continue;
            };
            if slot.seq != top.seq {
                continue;
            }
            expired.push(Arc::clone(&slot.cb));
            if slot.recurring {
                rearm.push((top.id, slot.interval));
            } else {
                st.slots.remove(&top.id);
            }
        }

        for (id, interval) in rearm {
            let deadline = now + interval;
            let seq = st.arm(id, deadline);
            if let Some(slot) = st.slots.get_mut(&id) {
                slot.seq = seq;
                slot.deadline = deadline;
            }
        }
        if !expired.is_empty() {
            ktrace!("{} timer(s) expired", expired.len());
        }
        expired
    }

    /// Any armed timers
    pub fn has_timer(&self) -> bool {
        !self.inner.state.lock().slots.is_empty()
    }

    /// Number of armed timers
    pub fn len(&self) -> usize {
        self.inner.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_timer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn quiet() -> TimerManager {
        TimerManager::new(|| {})
    }

    #[test]
    fn test_earliest_fires_first() {
        let mgr = quiet();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let o = order.clone();
        mgr.add_timer(Duration::from_millis(100), move || o.lock().push(100), false);
        let o = order.clone();
        mgr.add_timer(Duration::from_millis(10), move || o.lock().push(10), false);

        let next = mgr.next_timer().unwrap();
        assert!(next <= Duration::from_millis(10));

        thread::sleep(Duration::from_millis(20));
        for cb in mgr.list_expired_callbacks() {
            cb();
        }
        assert_eq!(*order.lock(), vec![10]);

        thread::sleep(Duration::from_millis(90));
        for cb in mgr.list_expired_callbacks() {
            cb();
        }
        assert_eq!(*order.lock(), vec![10, 100]);
        assert!(!mgr.has_timer());
        assert_eq!(mgr.next_timer(), None);
    }

    #[test]
    fn test_front_insert_wakes_once_until_queried() {
        let wakes = Arc::new(AtomicUsize::new(0));
        let w = wakes.clone();
        let mgr = TimerManager::new(move || {
            w.fetch_add(1, Ordering::SeqCst);
        });

        mgr.add_timer(Duration::from_millis(100), || {}, false);
        assert_eq!(wakes.load(Ordering::SeqCst), 1);

        // New front, but the previous wake has not been consumed
        mgr.add_timer(Duration::from_millis(50), || {}, false);
        assert_eq!(wakes.load(Ordering::SeqCst), 1);

        mgr.next_timer();
        mgr.add_timer(Duration::from_millis(10), || {}, false);
        assert_eq!(wakes.load(Ordering::SeqCst), 2);

        // Not at the front
        mgr.next_timer();
        mgr.add_timer(Duration::from_secs(10), || {}, false);
        assert_eq!(wakes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cancel_prevents_firing() {
        let mgr = quiet();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let timer = mgr.add_timer(Duration::from_millis(5), move || {
            h.fetch_add(1, Ordering::SeqCst);
        }, false);
        assert!(timer.is_armed());
        assert!(timer.cancel());
        assert!(!timer.cancel());
        assert!(!timer.is_armed());

        thread::sleep(Duration::from_millis(10));
        assert!(mgr.list_expired_callbacks().is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(mgr.next_timer(), None);
    }

    #[test]
    fn test_recurring_catch_up_is_bounded() {
        let mgr = quiet();
        mgr.add_timer(Duration::from_millis(50), || {}, true);

        // Starve the timer for four intervals
        thread::sleep(Duration::from_millis(200));
        assert_eq!(mgr.list_expired_callbacks().len(), 1);
        assert!(mgr.list_expired_callbacks().is_empty());

        let next = mgr.next_timer().unwrap();
        assert!(next > Duration::from_millis(30) && next <= Duration::from_millis(50));
        assert!(mgr.has_timer());
    }

    #[test]
    fn test_one_shot_fires_once() {
        let mgr = quiet();
        let timer = mgr.add_timer(Duration::ZERO, || {}, false);
        assert_eq!(mgr.list_expired_callbacks().len(), 1);
        assert!(mgr.list_expired_callbacks().is_empty());
        assert!(!timer.cancel());
    }

    #[test]
    fn test_refresh_and_reset() {
        let mgr = quiet();
        let timer = mgr.add_timer(Duration::from_millis(30), || {}, false);

        thread::sleep(Duration::from_millis(20));
        assert!(timer.refresh());
        thread::sleep(Duration::from_millis(20));
        // 40ms since creation but only 20ms since the refresh
        assert!(mgr.list_expired_callbacks().is_empty());

        assert!(timer.reset(Duration::from_secs(60), true));
        let next = mgr.next_timer().unwrap();
        assert!(next > Duration::from_secs(59));

        assert!(timer.reset(Duration::ZERO, true));
        assert_eq!(mgr.list_expired_callbacks().len(), 1);
        assert!(!timer.refresh());
        assert!(!timer.reset(Duration::from_millis(1), true));
    }

    #[test]
    fn test_condition_timer_requires_live_condition() {
        let mgr = quiet();
        let hits = Arc::new(AtomicUsize::new(0));

        let alive = Arc::new(());
        let h = hits.clone();
        mgr.add_condition_timer(Duration::ZERO, move || {
            h.fetch_add(1, Ordering::SeqCst);
        }, Arc::downgrade(&alive), false);

        let gone = Arc::new(());
        let h = hits.clone();
        mgr.add_condition_timer(Duration::ZERO, move || {
            h.fetch_add(10, Ordering::SeqCst);
        }, Arc::downgrade(&gone), false);
        drop(gone);

        for cb in mgr.list_expired_callbacks() {
            cb();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tombstones_are_compacted() {
        let mgr = quiet();
        let timer = mgr.add_timer(Duration::from_secs(60), || {}, false);
        for _ in 0..1000 {
            timer.refresh();
        }
        let heap_len = mgr.inner.state.lock().heap.len();
        assert!(heap_len <= 2 + COMPACT_SLACK + 1);
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn test_handle_outliving_manager() {
        let mgr = quiet();
        let timer = mgr.add_timer(Duration::from_secs(1), || {}, false);
        drop(mgr);
        assert!(!timer.cancel());
        assert!(!timer.is_armed());
    }
}

//! Timer handle and heap entry types

use std::cmp::Ordering;
use std::fmt;
use std::sync::Weak;
use std::time::{Duration, Instant};

use super::manager::TimerInner;
use super::TimerCallback;

/// Heap entry; live only while `seq` matches its slot's current sequence
#[derive(Debug, Clone, Copy)]
pub(super) struct HeapEntry {
    pub deadline: Instant,
    pub seq: u64,
    pub id: u64,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest deadline.
        // Ties go to the earlier arming.
        match other.deadline.cmp(&self.deadline) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

/// Per-timer state owned by the manager
pub(super) struct TimerSlot {
    pub seq: u64,
    pub deadline: Instant,
    pub interval: Duration,
    pub recurring: bool,
    pub cb: TimerCallback,
}

/// Handle to a registered timer
///
/// Dropping the handle does not cancel the timer.
#[derive(Clone)]
pub struct Timer {
    pub(super) id: u64,
    pub(super) manager: Weak<TimerInner>,
}

impl Timer {
    /// Prevent any further firing; false if it already fired (one-shot) or was cancelled
    pub fn cancel(&self) -> bool {
        match self.manager.upgrade() {
            Some(m) => m.cancel(self.id),
            None => false,
        }
    }

    /// Re-arm at now + interval
    pub fn refresh(&self) -> bool {
        match self.manager.upgrade() {
            Some(m) => m.refresh(self.id),
            None => false,
        }
    }

    /// Change the interval; the new deadline counts from now or from the
    /// previous arming time
    pub fn reset(&self, interval: Duration, from_now: bool) -> bool {
        match self.manager.upgrade() {
            Some(m) => m.reset(self.id, interval, from_now),
            None => false,
        }
    }

    /// Whether the timer is still armed
    pub fn is_armed(&self) -> bool {
        self.manager
            .upgrade()
            .is_some_and(|m| m.is_armed(self.id))
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    #[test]
    fn test_heap_orders_by_deadline_then_seq() {
        let now = Instant::now();
        let mut heap = BinaryHeap::new();
        heap.push(HeapEntry { deadline: now + Duration::from_millis(100), seq: 1, id: 1 });
        heap.push(HeapEntry { deadline: now + Duration::from_millis(10), seq: 3, id: 2 });
        heap.push(HeapEntry { deadline: now + Duration::from_millis(10), seq: 2, id: 3 });

        assert_eq!(heap.pop().unwrap().id, 3);
        assert_eq!(heap.pop().unwrap().id, 2);
        assert_eq!(heap.pop().unwrap().id, 1);
    }
}

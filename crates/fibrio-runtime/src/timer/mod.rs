//! Deadline timers
//!
//! [`TimerManager`] keeps a min-heap of deadlines. The reactor asks it how
//! long it may block (`next_timer`) and collects due callbacks
//! (`list_expired_callbacks`), which it then schedules like any other task.
//!
//! # Complexity
//!
//! - Insert: O(log n)
//! - Cancel / refresh / reset: O(log n), old heap entry left as a tombstone
//! - Expired listing: O(k log n) for k due timers
//!
//! # Cancellation Strategy
//!
//! Every arming of a timer gets a fresh sequence number. A heap entry is
//! live only while its sequence matches the timer's current one, so
//! cancelling or re-arming never has to search the heap. Tombstones are
//! discarded when they reach the top, or all at once when they outnumber
//! live entries.

mod entry;
mod manager;

pub use entry::Timer;
pub use manager::TimerManager;

use std::sync::Arc;

/// Callback run when a timer fires; shared so recurring timers can hand it out repeatedly
pub type TimerCallback = Arc<dyn Fn() + Send + Sync + 'static>;

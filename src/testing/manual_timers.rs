//! Manually driven timer host for deterministic tests.

use std::time::Duration;

use parking_lot::Mutex;

use crate::host::{TimerCallback, TimerHost, TimerId};

struct PendingTimer {
    id: u64,
    deadline: Duration,
    callback: TimerCallback,
}

struct TimerInner {
    now: Duration,
    next_id: u64,
    pending: Vec<PendingTimer>,
}

/// A [`TimerHost`] driven by an explicit clock.
///
/// Nothing fires until [`advance`](Self::advance) moves the clock; due
/// callbacks then run in deadline order, on the caller's thread. Callbacks
/// may schedule or cancel timers re-entrantly; a timer scheduled during
/// `advance` whose deadline falls inside the advanced window fires in the
/// same call.
pub struct ManualTimers {
    inner: Mutex<TimerInner>,
}

impl ManualTimers {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TimerInner {
                now: Duration::ZERO,
                next_id: 1,
                pending: Vec::new(),
            }),
        }
    }

    /// Current clock position.
    pub fn now(&self) -> Duration {
        self.inner.lock().now
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Move the clock forward by `step`, firing every timer whose deadline
    /// falls inside the window, in deadline order (ties in scheduling
    /// order).
    pub fn advance(&self, step: Duration) {
        let target = self.inner.lock().now + step;
        loop {
            let due = {
                let mut inner = self.inner.lock();
                let mut earliest: Option<usize> = None;
                for (index, timer) in inner.pending.iter().enumerate() {
                    if timer.deadline > target {
                        continue;
                    }
                    match earliest {
                        Some(best) if inner.pending[best].deadline <= timer.deadline => {}
                        _ => earliest = Some(index),
                    }
                }
                earliest.map(|index| {
                    let timer = inner.pending.remove(index);
                    inner.now = timer.deadline;
                    timer.callback
                })
            };
            // Run outside the lock: the callback may reschedule.
            match due {
                Some(callback) => callback(),
                None => break,
            }
        }
        self.inner.lock().now = target;
    }
}

impl Default for ManualTimers {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerHost for ManualTimers {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerId {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        let deadline = inner.now + delay;
        inner.pending.push(PendingTimer {
            id,
            deadline,
            callback,
        });
        TimerId::new(id)
    }

    fn cancel(&self, timer: TimerId) {
        self.inner
            .lock()
            .pending
            .retain(|t| t.id != timer.value());
    }
}

//! Timer capability: one-shot scheduling with cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;

/// Callback fired when a scheduled timer elapses.
pub type TimerCallback = Box<dyn FnOnce() + Send>;

/// Handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

impl TimerId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// One-shot timer scheduling.
///
/// A cancelled timer must never fire its callback. Cancelling an unknown or
/// already-fired timer is a no-op.
pub trait TimerHost: Send + Sync {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerId;
    fn cancel(&self, timer: TimerId);
}

/// Production [`TimerHost`] backed by the tokio runtime.
///
/// Each timer is a spawned task sleeping for its delay; the pending map
/// holds abort handles so cancellation kills the task before it runs.
/// Must be used from within a tokio runtime.
pub struct TokioTimers {
    pending: Arc<DashMap<u64, tokio::task::AbortHandle>>,
    next_id: AtomicU64,
}

impl TokioTimers {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of timers scheduled but not yet fired or cancelled.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for TokioTimers {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerHost for TokioTimers {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::clone(&self.pending);

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Whoever removes the entry first wins: either we fire, or a
            // concurrent cancel already claimed the timer.
            if pending.remove(&id).is_some() {
                callback();
            }
        });
        self.pending.insert(id, task.abort_handle());

        TimerId::new(id)
    }

    fn cancel(&self, timer: TimerId) {
        if let Some((_, handle)) = self.pending.remove(&timer.value()) {
            handle.abort();
        }
    }
}

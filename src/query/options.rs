//! Options accepted by [`QueryWatcher::watch`](crate::QueryWatcher::watch).

use std::time::Duration;

use crate::host::TimerCallback;
use crate::types::NodeId;

/// Per-session knobs, built with chained setters.
///
/// ```
/// use std::time::Duration;
/// use dynquery::WatchOptions;
///
/// let options = WatchOptions::new()
///     .once(true)
///     .timeout(Duration::from_secs(5))
///     .settle_delay(Duration::from_millis(200));
/// ```
pub struct WatchOptions {
    pub(crate) root: Option<NodeId>,
    pub(crate) once: bool,
    pub(crate) match_all: bool,
    pub(crate) timeout: Option<Duration>,
    pub(crate) on_timeout: Option<TimerCallback>,
    pub(crate) settle_delay: Option<Duration>,
}

impl WatchOptions {
    pub fn new() -> Self {
        Self {
            root: None,
            once: true,
            match_all: true,
            timeout: None,
            on_timeout: None,
            settle_delay: None,
        }
    }

    /// Watch under `root` instead of the host's document root.
    pub fn root(mut self, root: NodeId) -> Self {
        self.root = Some(root);
        self
    }

    /// When true (the default), each pattern is delivered one settled
    /// occurrence and then stops; when false, every future match is
    /// delivered for the life of the session.
    pub fn once(mut self, once: bool) -> Self {
        self.once = once;
        self
    }

    /// When true (the default), the immediate scan considers every
    /// currently-matching node per pattern; when false, only the first.
    pub fn match_all(mut self, match_all: bool) -> Self {
        self.match_all = match_all;
        self
    }

    /// Give up after `timeout` if the session has not naturally completed.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Callback invoked when the timeout fires. Matches mid-settle at the
    /// timeout instant are discarded, not delivered.
    pub fn on_timeout(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_timeout = Some(Box::new(callback));
        self
    }

    /// Quiescence window used to coalesce a burst of matching insertions
    /// into one settled occurrence. Only meaningful with `once` and
    /// `match_all`. Defaults to the watcher's configured settle delay.
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = Some(delay);
        self
    }
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WatchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchOptions")
            .field("root", &self.root)
            .field("once", &self.once)
            .field("match_all", &self.match_all)
            .field("timeout", &self.timeout)
            .field("on_timeout", &self.on_timeout.is_some())
            .field("settle_delay", &self.settle_delay)
            .finish()
    }
}

//! Query sessions: the end-to-end contract callers depend on.
//!
//! A session performs an immediate synchronous scan of already-present
//! matches, installs processors for whatever still has to appear, wires up
//! settle-delay and timeout timers, and hands back one idempotent
//! cancellation handle.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::Settings;
use crate::error::WatchError;
use crate::host::{Pattern, TimerCallback, TimerHost, TimerId, TokioTimers, TreeHost};
use crate::observer::{Processor, ProcessorRegistry};
use crate::query::WatchOptions;
use crate::types::NodeId;
use crate::{debug_event, log_event};

type NodeHandler = Arc<dyn Fn(NodeId) + Send + Sync>;

/// Watches a host tree for nodes matching declarative patterns.
///
/// One `QueryWatcher` is the shared service for its host: every `watch`
/// call multiplexes onto the same per-root native subscriptions, so callers
/// watching overlapping regions never install duplicate observers.
///
/// ```
/// use std::sync::Arc;
/// use dynquery::testing::{FakeTree, ManualTimers, TagPattern};
/// use dynquery::{Pattern, QueryWatcher, TreeHost, WatchOptions};
///
/// let tree = FakeTree::new();
/// let timers = Arc::new(ManualTimers::new());
/// let watcher = QueryWatcher::new(tree.clone(), timers);
///
/// let marker: Arc<dyn Pattern> = Arc::new(TagPattern::new(tree.clone(), "marker"));
/// let handle = watcher.watch(
///     vec![marker],
///     |node| println!("marker appeared: {node}"),
///     WatchOptions::new(),
/// )?;
///
/// tree.append_new(tree.root(), "marker");
/// handle.cancel();
/// # Ok::<(), dynquery::WatchError>(())
/// ```
pub struct QueryWatcher {
    registry: Arc<ProcessorRegistry>,
    timers: Arc<dyn TimerHost>,
    default_settle_delay: Duration,
}

impl QueryWatcher {
    pub fn new(host: Arc<dyn TreeHost>, timers: Arc<dyn TimerHost>) -> Self {
        Self {
            registry: ProcessorRegistry::new(host),
            timers,
            default_settle_delay: Settings::default().settle_delay(),
        }
    }

    /// Create a builder for configuring the watcher.
    pub fn builder() -> QueryWatcherBuilder {
        QueryWatcherBuilder::new()
    }

    pub fn registry(&self) -> &Arc<ProcessorRegistry> {
        &self.registry
    }

    /// Watch for nodes matching `patterns` under the session root.
    ///
    /// Already-present matches are delivered synchronously before this
    /// returns. In once mode a session whose patterns are all satisfied by
    /// the immediate scan installs no native listener at all.
    ///
    /// # Errors
    ///
    /// Pattern failures from the immediate scan and host unavailability at
    /// registration surface here; nothing fails asynchronously.
    pub fn watch(
        &self,
        patterns: Vec<Arc<dyn Pattern>>,
        handler: impl Fn(NodeId) + Send + Sync + 'static,
        options: WatchOptions,
    ) -> Result<WatchHandle, WatchError> {
        let handler: NodeHandler = Arc::new(handler);
        let root = options
            .root
            .unwrap_or_else(|| self.registry.multiplexer().host().root());
        let settle_delay = options.settle_delay.unwrap_or(self.default_settle_delay);

        // Immediate synchronous scan, straight against the tree. The
        // mutation path only ever covers what appears afterwards.
        let mut scanned: Vec<(Arc<dyn Pattern>, Vec<NodeId>)> = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let hits = if options.match_all {
                pattern.query_all(root)?
            } else {
                pattern.query_first(root)?.into_iter().collect()
            };
            for &node in &hits {
                handler(node);
            }
            scanned.push((pattern, hits));
        }

        // Fully satisfied once-sessions have nothing left to watch.
        if options.once && scanned.iter().all(|(_, hits)| !hits.is_empty()) {
            debug_event!("watch", "satisfied by immediate scan", "root {root}");
            return Ok(WatchHandle { session: None });
        }

        let pending: Vec<(Arc<dyn Pattern>, Vec<NodeId>)> = if options.once {
            scanned.into_iter().filter(|(_, hits)| hits.is_empty()).collect()
        } else {
            scanned
        };

        let session = Arc::new(Session {
            registry: Arc::clone(&self.registry),
            timers: Arc::clone(&self.timers),
            root,
            once: options.once,
            cancelled: AtomicBool::new(false),
            remaining: AtomicUsize::new(pending.len()),
            entries: Mutex::new(Vec::with_capacity(pending.len())),
            timeout_timer: Mutex::new(None),
            on_timeout: Mutex::new(options.on_timeout),
        });

        for (pattern, seen) in pending {
            if let Err(e) =
                session.install_processor(pattern, &handler, options.match_all, settle_delay, seen)
            {
                // Roll back whatever this call already registered.
                session.cancel();
                return Err(e);
            }
        }

        if let Some(timeout) = options.timeout {
            session.arm_timeout(timeout);
        }

        Ok(WatchHandle {
            session: Some(session),
        })
    }
}

/// Builder for constructing a [`QueryWatcher`].
pub struct QueryWatcherBuilder {
    host: Option<Arc<dyn TreeHost>>,
    timers: Option<Arc<dyn TimerHost>>,
    settings: Option<Settings>,
}

impl QueryWatcherBuilder {
    pub fn new() -> Self {
        Self {
            host: None,
            timers: None,
            settings: None,
        }
    }

    /// Set the tree host (required).
    pub fn host(mut self, host: Arc<dyn TreeHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Set the timer host. Defaults to [`TokioTimers`].
    pub fn timers(mut self, timers: Arc<dyn TimerHost>) -> Self {
        self.timers = Some(timers);
        self
    }

    /// Apply loaded [`Settings`] (default settle delay).
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn build(self) -> Result<QueryWatcher, WatchError> {
        let host = self
            .host
            .ok_or_else(|| WatchError::host_unavailable("no tree host configured"))?;
        let timers = self
            .timers
            .unwrap_or_else(|| Arc::new(TokioTimers::new()));
        let settings = self.settings.unwrap_or_default();

        Ok(QueryWatcher {
            registry: ProcessorRegistry::new(host),
            timers,
            default_settle_delay: settings.settle_delay(),
        })
    }
}

impl Default for QueryWatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellation handle returned by [`QueryWatcher::watch`].
///
/// Dropping the handle does not cancel the session; once-sessions finish on
/// their own and repeating sessions run until cancelled or timed out.
pub struct WatchHandle {
    session: Option<Arc<Session>>,
}

impl WatchHandle {
    /// Tear down every still-active processor and clear pending timers.
    ///
    /// Idempotent. Returns the prior-active state: true only if the session
    /// had not already been cancelled, timed out, or naturally completed,
    /// and at least one processor was still registered.
    pub fn cancel(&self) -> bool {
        match &self.session {
            Some(session) => session.cancel(),
            None => false,
        }
    }

    /// Whether any processor of this session is still registered.
    pub fn is_active(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.has_active())
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("active", &self.is_active())
            .finish()
    }
}

#[derive(Clone)]
struct SessionEntry {
    processor: Arc<Processor>,
    settle_timer: Arc<Mutex<Option<TimerId>>>,
}

struct Session {
    registry: Arc<ProcessorRegistry>,
    timers: Arc<dyn TimerHost>,
    root: NodeId,
    once: bool,
    cancelled: AtomicBool,
    /// Processors that have not yet settled; reaching zero completes a
    /// once-session and disarms its timeout.
    remaining: AtomicUsize,
    entries: Mutex<Vec<SessionEntry>>,
    timeout_timer: Mutex<Option<TimerId>>,
    on_timeout: Mutex<Option<TimerCallback>>,
}

impl Session {
    /// Create, wire, and register one processor for `pattern`.
    ///
    /// The wrapped handler forwards to the caller, then manages lifecycle:
    /// in once/match-all mode every delivery pushes the quiescence window
    /// out by `settle_delay`; in once/first-match mode the processor
    /// unregisters itself immediately after the first delivery.
    fn install_processor(
        self: &Arc<Self>,
        pattern: Arc<dyn Pattern>,
        handler: &NodeHandler,
        match_all: bool,
        settle_delay: Duration,
        seen: Vec<NodeId>,
    ) -> Result<(), WatchError> {
        let settle_timer = Arc::new(Mutex::new(None::<TimerId>));

        let processor = Arc::new_cyclic(|weak_proc: &Weak<Processor>| {
            let weak_proc = weak_proc.clone();
            let weak_session = Arc::downgrade(self);
            let registry = Arc::clone(&self.registry);
            let timers = Arc::clone(&self.timers);
            let user = Arc::clone(handler);
            let slot = Arc::clone(&settle_timer);
            let once = self.once;
            let root = self.root;

            Processor::new(
                pattern,
                Box::new(move |node| {
                    user(node);
                    if !once {
                        return;
                    }
                    if match_all {
                        // Another match arrived: the burst has not settled,
                        // push the quiescence window out again.
                        let mut timer = slot.lock();
                        if let Some(id) = timer.take() {
                            timers.cancel(id);
                        }
                        let registry = Arc::clone(&registry);
                        let weak_proc = weak_proc.clone();
                        let weak_session = weak_session.clone();
                        *timer = Some(timers.schedule(
                            settle_delay,
                            Box::new(move || {
                                settle_expired(&registry, root, &weak_proc, &weak_session);
                            }),
                        ));
                    } else if let Some(processor) = weak_proc.upgrade() {
                        if registry.unregister(root, &processor) {
                            if let Some(session) = weak_session.upgrade() {
                                session.processor_done();
                            }
                        }
                    }
                }),
            )
        });

        processor.seed_reported(&seen);
        self.registry.register(self.root, Arc::clone(&processor))?;
        self.entries.lock().push(SessionEntry {
            processor,
            settle_timer,
        });
        Ok(())
    }

    fn arm_timeout(self: &Arc<Self>, timeout: Duration) {
        let session = Arc::clone(self);
        let id = self
            .timers
            .schedule(timeout, Box::new(move || session.timeout_expired()));
        *self.timeout_timer.lock() = Some(id);
    }

    fn timeout_expired(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.timeout_timer.lock().take();
        self.teardown_processors();
        match self.on_timeout.lock().take() {
            Some(callback) => callback(),
            None => log_event!("watch", "timeout", "root {}", self.root),
        }
    }

    /// One processor finished its work (settled or delivered its single
    /// match). When the last one finishes, the once-session is complete and
    /// its timeout must never fire.
    fn processor_done(&self) {
        if !self.once {
            return;
        }
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1
            && !self.cancelled.swap(true, Ordering::AcqRel)
        {
            if let Some(id) = self.timeout_timer.lock().take() {
                self.timers.cancel(id);
            }
            debug_event!("watch", "session complete", "root {}", self.root);
        }
    }

    fn teardown_processors(&self) -> bool {
        let entries: Vec<SessionEntry> = self.entries.lock().clone();
        let mut any = false;
        for entry in &entries {
            if let Some(id) = entry.settle_timer.lock().take() {
                self.timers.cancel(id);
            }
            if self.registry.unregister(self.root, &entry.processor) {
                any = true;
            }
        }
        any
    }

    fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(id) = self.timeout_timer.lock().take() {
            self.timers.cancel(id);
        }
        self.teardown_processors()
    }

    fn has_active(&self) -> bool {
        !self.cancelled.load(Ordering::Acquire)
            && self.entries.lock().iter().any(|e| e.processor.is_active())
    }
}

fn settle_expired(
    registry: &Arc<ProcessorRegistry>,
    root: NodeId,
    processor: &Weak<Processor>,
    session: &Weak<Session>,
) {
    let Some(processor) = processor.upgrade() else {
        return;
    };
    if registry.unregister(root, &processor) {
        if let Some(session) = session.upgrade() {
            session.processor_done();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeTree, ManualTimers, TagPattern};

    fn watcher(tree: &Arc<FakeTree>) -> (QueryWatcher, Arc<ManualTimers>) {
        let timers = Arc::new(ManualTimers::new());
        (
            QueryWatcher::new(tree.clone(), timers.clone()),
            timers,
        )
    }

    fn tag(tree: &Arc<FakeTree>, name: &str) -> Arc<dyn Pattern> {
        Arc::new(TagPattern::new(tree.clone(), name))
    }

    #[test]
    fn test_builder_requires_host() {
        let result = QueryWatcher::builder().build();
        assert!(matches!(result, Err(WatchError::HostUnavailable { .. })));
    }

    #[test]
    fn test_builder_with_host() {
        let tree = FakeTree::new();
        let watcher = QueryWatcher::builder()
            .host(tree.clone())
            .timers(Arc::new(ManualTimers::new()))
            .build()
            .unwrap();
        assert_eq!(watcher.registry().multiplexer().record_count(), 0);
    }

    #[test]
    fn test_satisfied_once_session_installs_nothing() {
        let tree = FakeTree::new();
        let (watcher, _timers) = watcher(&tree);
        tree.append_new(tree.root(), "item");

        let hits = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&hits);
        let handle = watcher
            .watch(
                vec![tag(&tree, "item")],
                move |node| log.lock().push(node),
                WatchOptions::new(),
            )
            .unwrap();

        assert_eq!(hits.lock().len(), 1);
        assert_eq!(tree.subscription_count(), 0);
        assert!(!handle.is_active());
        assert!(!handle.cancel());
    }

    #[test]
    fn test_handle_reports_activity() {
        let tree = FakeTree::new();
        let (watcher, _timers) = watcher(&tree);

        let handle = watcher
            .watch(vec![tag(&tree, "missing")], |_| {}, WatchOptions::new())
            .unwrap();

        assert!(handle.is_active());
        assert!(handle.cancel());
        assert!(!handle.is_active());
        assert!(!handle.cancel());
    }
}

//! Processor registry: deduplicated delivery to every active processor.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::WatchError;
use crate::host::{Pattern, TreeHost};
use crate::observer::multiplexer::DeliverFn;
use crate::observer::{Multiplexer, ObservationRecord};
use crate::types::NodeId;

/// One pattern paired with one handler and its own delivery-dedup state.
///
/// The `reported` set is keyed by node identity and stores only ids, so
/// membership never extends a node's lifetime. Invariant: the handler is
/// invoked for a given node at most once for the processor's lifetime,
/// even across removal and re-insertion of the same node.
pub struct Processor {
    pattern: Arc<dyn Pattern>,
    handler: Box<dyn Fn(NodeId) + Send + Sync>,
    reported: Mutex<HashSet<NodeId>>,
    active: AtomicBool,
}

impl Processor {
    pub fn new(pattern: Arc<dyn Pattern>, handler: Box<dyn Fn(NodeId) + Send + Sync>) -> Self {
        Self {
            pattern,
            handler,
            reported: Mutex::new(HashSet::new()),
            active: AtomicBool::new(true),
        }
    }

    pub fn pattern(&self) -> &Arc<dyn Pattern> {
        &self.pattern
    }

    /// False once the processor has been unregistered. An in-flight delivery
    /// checks this immediately before each invocation, so cancellation cuts
    /// off even a batch already being walked.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Record `node` as delivered. Returns false if it already was.
    pub(crate) fn mark_reported(&self, node: NodeId) -> bool {
        self.reported.lock().insert(node)
    }

    /// Pre-mark nodes already handed to the caller by the immediate scan, so
    /// the at-most-once property holds across the scan/mutation boundary.
    pub(crate) fn seed_reported(&self, nodes: &[NodeId]) {
        self.reported.lock().extend(nodes.iter().copied());
    }

    pub(crate) fn invoke(&self, node: NodeId) {
        (self.handler)(node);
    }
}

/// Per-root table of active processors, layered on the [`Multiplexer`].
pub struct ProcessorRegistry {
    multiplexer: Arc<Multiplexer>,
}

impl ProcessorRegistry {
    pub fn new(host: Arc<dyn TreeHost>) -> Arc<Self> {
        Arc::new(Self {
            multiplexer: Arc::new(Multiplexer::new(host)),
        })
    }

    pub fn multiplexer(&self) -> &Arc<Multiplexer> {
        &self.multiplexer
    }

    /// Add `processor` to `root`'s record, subscribing the root on first
    /// use. No retroactive scan happens here: what already exists is the
    /// query session's responsibility, this table only covers what appears.
    pub fn register(
        self: &Arc<Self>,
        root: NodeId,
        processor: Arc<Processor>,
    ) -> Result<(), WatchError> {
        let deliver: DeliverFn = {
            let registry = Arc::downgrade(self);
            Arc::new(move |record, affected| {
                if let Some(registry) = registry.upgrade() {
                    registry.deliver(record, affected);
                }
            })
        };
        let record = self.multiplexer.ensure_subscribed(root, deliver)?;
        record.push_processor(processor);
        Ok(())
    }

    /// Remove `processor` from `root`'s record, tearing the subscription
    /// down if it was the last one. Returns whether the processor was
    /// actually present, which is what makes cancellation idempotent.
    pub fn unregister(&self, root: NodeId, processor: &Arc<Processor>) -> bool {
        processor.deactivate();
        let Some(record) = self.multiplexer.record(root) else {
            return false;
        };
        let (present, now_empty) = record.remove_processor(processor);
        if present && now_empty {
            self.multiplexer.release(root);
        }
        present
    }

    /// Deliver an affected-node list to every processor on the record.
    ///
    /// The processor set is re-snapshotted per node and no lock is held
    /// while a pattern test or handler runs, so handlers may unregister
    /// (or register) processors mid-batch without corrupting the walk or
    /// causing re-entrant double delivery.
    pub fn deliver(&self, record: &Arc<ObservationRecord>, affected: &[NodeId]) {
        for &node in affected {
            for processor in record.snapshot() {
                if !processor.is_active() {
                    continue;
                }
                match processor.pattern().matches(node) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        // Delivery never throws: a pattern that fails here
                        // is treated as a non-match.
                        tracing::warn!(
                            "[observer] pattern '{}' failed on {node}: {e}",
                            processor.pattern().name()
                        );
                        continue;
                    }
                }
                if !processor.mark_reported(node) {
                    continue;
                }
                processor.invoke(node);
            }
        }
    }
}

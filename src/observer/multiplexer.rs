//! Tree watch multiplexer.
//!
//! Guarantees exactly one native subscription per watch root regardless of
//! how many processors are interested, and translates raw mutation batches
//! into the affected-node lists the registry consumes.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::debug_event;
use crate::error::WatchError;
use crate::host::{Mutation, MutationKind, MutationSink, Subscription, TreeHost};
use crate::observer::Processor;
use crate::types::NodeId;

/// Delivery route installed when a root's subscription is created. Receives
/// the record the batch belongs to plus the expanded affected-node list.
pub(crate) type DeliverFn = Arc<dyn Fn(&Arc<ObservationRecord>, &[NodeId]) + Send + Sync>;

/// Per-root observation state: the processors interested in the root and
/// the teardown capability for its native subscription.
///
/// Created on first registration for a root, destroyed the instant the
/// processor set drains.
pub struct ObservationRecord {
    processors: Mutex<Vec<Arc<Processor>>>,
    subscription: Mutex<Option<Subscription>>,
}

impl ObservationRecord {
    fn new() -> Self {
        Self {
            processors: Mutex::new(Vec::new()),
            subscription: Mutex::new(None),
        }
    }

    /// Copy of the current processor set. Delivery iterates this snapshot so
    /// handlers can freely register and unregister mid-batch.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Processor>> {
        self.processors.lock().clone()
    }

    pub(crate) fn push_processor(&self, processor: Arc<Processor>) {
        self.processors.lock().push(processor);
    }

    /// Remove `processor` by identity. Returns (was present, set now empty).
    pub(crate) fn remove_processor(&self, processor: &Arc<Processor>) -> (bool, bool) {
        let mut processors = self.processors.lock();
        let before = processors.len();
        processors.retain(|p| !Arc::ptr_eq(p, processor));
        let present = processors.len() < before;
        (present, processors.is_empty())
    }

    pub fn processor_count(&self) -> usize {
        self.processors.lock().len()
    }
}

/// Owns the root → [`ObservationRecord`] table and the native subscriptions
/// behind it.
pub struct Multiplexer {
    host: Arc<dyn TreeHost>,
    records: Mutex<HashMap<NodeId, Arc<ObservationRecord>>>,
}

impl Multiplexer {
    pub fn new(host: Arc<dyn TreeHost>) -> Self {
        Self {
            host,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn host(&self) -> &Arc<dyn TreeHost> {
        &self.host
    }

    /// The record for `root`, if one is currently subscribed.
    pub fn record(&self, root: NodeId) -> Option<Arc<ObservationRecord>> {
        self.records.lock().get(&root).cloned()
    }

    /// Number of live native subscriptions.
    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }

    /// Return the record for `root`, installing the native subscription on
    /// first use.
    ///
    /// The sink holds only weak references, so a notification arriving after
    /// [`release`](Self::release) upgrades to nothing and is dropped instead
    /// of reaching a stale generation.
    pub fn ensure_subscribed(
        self: &Arc<Self>,
        root: NodeId,
        deliver: DeliverFn,
    ) -> Result<Arc<ObservationRecord>, WatchError> {
        let mut records = self.records.lock();
        if let Some(record) = records.get(&root) {
            return Ok(Arc::clone(record));
        }

        let record = Arc::new(ObservationRecord::new());
        let weak_mux = Arc::downgrade(self);
        let weak_record = Arc::downgrade(&record);
        let sink: MutationSink = Arc::new(move |batch: &[Mutation]| {
            dispatch(&weak_mux, &weak_record, &deliver, batch);
        });

        let subscription = self.host.subscribe(root, sink)?;
        *record.subscription.lock() = Some(subscription);
        records.insert(root, Arc::clone(&record));
        debug_event!("observer", "subscribed", "root {root}");

        Ok(record)
    }

    /// Tear down the subscription for `root` and drop its record. Invoked
    /// when the record's processor set drains; a no-op if already released.
    pub fn release(&self, root: NodeId) {
        let record = self.records.lock().remove(&root);
        if let Some(record) = record {
            // Cancel outside the table lock: teardown re-enters the host.
            if let Some(subscription) = record.subscription.lock().take() {
                subscription.cancel();
            }
            debug_event!("observer", "released", "root {root}");
        }
    }

    /// Expand a mutation batch into the affected-node list, in encounter
    /// order with duplicates allowed: the mutation target, plus the pre-order
    /// subtree of every inserted node. Attribute-only mutations contribute
    /// the target alone.
    pub(crate) fn expand(&self, batch: &[Mutation]) -> Vec<NodeId> {
        let mut affected = Vec::new();
        for mutation in batch {
            affected.push(mutation.target);
            if let MutationKind::ChildList { added } = &mutation.kind {
                for &node in added {
                    affected.extend(self.host.descendants(node));
                }
            }
        }
        affected
    }
}

fn dispatch(
    mux: &Weak<Multiplexer>,
    record: &Weak<ObservationRecord>,
    deliver: &DeliverFn,
    batch: &[Mutation],
) {
    let (Some(mux), Some(record)) = (mux.upgrade(), record.upgrade()) else {
        return;
    };
    let affected = mux.expand(batch);
    if !affected.is_empty() {
        deliver(&record, &affected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Pattern;
    use crate::testing::FakeTree;

    fn noop_deliver() -> DeliverFn {
        Arc::new(|_, _| {})
    }

    fn any_processor() -> Arc<Processor> {
        struct Anything;
        impl Pattern for Anything {
            fn matches(&self, _: NodeId) -> Result<bool, crate::PatternError> {
                Ok(true)
            }
            fn query_all(&self, _: NodeId) -> Result<Vec<NodeId>, crate::PatternError> {
                Ok(Vec::new())
            }
        }
        Arc::new(Processor::new(Arc::new(Anything), Box::new(|_| {})))
    }

    #[test]
    fn test_one_subscription_per_root() {
        let tree = FakeTree::new();
        let mux = Arc::new(Multiplexer::new(tree.clone()));
        let root = tree.root();

        let first = mux.ensure_subscribed(root, noop_deliver()).unwrap();
        let second = mux.ensure_subscribed(root, noop_deliver()).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(tree.subscription_count(), 1);
        assert_eq!(mux.record_count(), 1);
    }

    #[test]
    fn test_release_is_idempotent() {
        let tree = FakeTree::new();
        let mux = Arc::new(Multiplexer::new(tree.clone()));
        let root = tree.root();

        let record = mux.ensure_subscribed(root, noop_deliver()).unwrap();
        record.push_processor(any_processor());
        assert_eq!(tree.subscription_count(), 1);

        mux.release(root);
        mux.release(root);

        assert_eq!(tree.subscription_count(), 0);
        assert_eq!(tree.teardown_count(), 1);
        assert_eq!(mux.record_count(), 0);
    }

    #[test]
    fn test_expand_orders_insertion_subtrees_preorder() {
        let tree = FakeTree::new();
        let mux = Arc::new(Multiplexer::new(tree.clone()));
        let root = tree.root();

        // root -> a -> (b, c); b -> d
        let a = tree.create("a");
        let b = tree.create("b");
        let c = tree.create("c");
        let d = tree.create("d");
        tree.append(a, b);
        tree.append(a, c);
        tree.append(b, d);

        let batch = vec![
            Mutation::child_list(root, vec![a]),
            Mutation::attributes(c),
        ];
        let affected = mux.expand(&batch);

        assert_eq!(affected, vec![root, a, b, d, c, c]);
    }
}

//! Host capability seams.
//!
//! The engine never touches a concrete tree. It consumes four narrow
//! capabilities from its host:
//!
//! 1. subtree change notification ([`TreeHost::subscribe`])
//! 2. pattern testing ([`Pattern::matches`])
//! 3. subtree querying ([`Pattern::query_all`])
//! 4. timer scheduling with cancellation ([`TimerHost`])
//!
//! Any host exposing these over any tree-shaped mutable structure (a
//! document, a scene graph, a config hierarchy) can back the engine
//! unchanged.

mod pattern;
mod timer;

pub use pattern::Pattern;
pub use timer::{TimerCallback, TimerHost, TimerId, TokioTimers};

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::WatchError;
use crate::types::NodeId;

/// One observed change to the host tree.
#[derive(Debug, Clone)]
pub struct Mutation {
    /// The node the change happened on. For structural changes this is the
    /// parent whose child list changed; for attribute changes, the node
    /// whose attribute changed.
    pub target: NodeId,
    pub kind: MutationKind,
}

/// What kind of change a [`Mutation`] describes.
#[derive(Debug, Clone)]
pub enum MutationKind {
    /// The target's child list changed. `added` holds the directly inserted
    /// nodes, in insertion order; removals carry an empty list.
    ChildList { added: Vec<NodeId> },
    /// An attribute on the target changed.
    Attributes,
}

impl Mutation {
    pub fn child_list(target: NodeId, added: Vec<NodeId>) -> Self {
        Self {
            target,
            kind: MutationKind::ChildList { added },
        }
    }

    pub fn attributes(target: NodeId) -> Self {
        Self {
            target,
            kind: MutationKind::Attributes,
        }
    }
}

/// One host notification: an ordered batch of mutations observed in a
/// single turn of the host's event loop.
pub type MutationBatch = Vec<Mutation>;

/// Callback a subscriber hands to [`TreeHost::subscribe`]. Invoked once per
/// notification batch, after the tree already reflects the batch.
pub type MutationSink = Arc<dyn Fn(&[Mutation]) + Send + Sync>;

/// Teardown guard for a native subscription.
///
/// Cancelling stops further notifications. Cancellation is idempotent and
/// also happens on drop, so a subscription can never outlive its owner.
pub struct Subscription {
    teardown: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    /// Invoke the stored teardown. Safe to call any number of times.
    pub fn cancel(&self) {
        if let Some(teardown) = self.teardown.lock().take() {
            teardown();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.teardown.lock().is_some())
            .finish()
    }
}

/// The mutable tree being observed.
pub trait TreeHost: Send + Sync {
    /// The default watch root (the document root, for document-shaped hosts).
    fn root(&self) -> NodeId;

    /// Install a subtree change listener under `root` reporting structural
    /// insertions and attribute changes, including a snapshot of directly
    /// added nodes per mutation.
    fn subscribe(&self, root: NodeId, sink: MutationSink) -> Result<Subscription, WatchError>;

    /// All descendants of `node` including `node` itself, in pre-order.
    /// A node the host no longer knows yields an empty list.
    fn descendants(&self, node: NodeId) -> Vec<NodeId>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscription_cancel_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let subscription = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        subscription.cancel();
        subscription.cancel();
        drop(subscription);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_tears_down_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        drop(Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

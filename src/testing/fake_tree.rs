//! In-memory tree host with synchronous mutation delivery.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{PatternError, WatchError};
use crate::host::{Mutation, MutationBatch, MutationSink, Pattern, Subscription, TreeHost};
use crate::types::NodeId;

struct NodeData {
    tag: String,
    attrs: HashMap<String, String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

struct SubscriptionEntry {
    root: NodeId,
    sink: MutationSink,
}

struct TreeInner {
    nodes: HashMap<NodeId, NodeData>,
    root: NodeId,
    next_node: u64,
    subscriptions: BTreeMap<u64, SubscriptionEntry>,
    next_subscription: u64,
    teardown_count: u64,
    fail_subscribe: bool,
    /// Open batch buffer; mutations accumulate here instead of being
    /// emitted one by one.
    batch: Option<MutationBatch>,
}

/// An in-memory mutable tree implementing [`TreeHost`].
///
/// Mutations (append, detach, attribute set) are delivered synchronously to
/// every subscription whose root contains the mutation target, mirroring a
/// subtree-scoped change observer. Detached nodes keep their identity, so
/// removal/re-insertion scenarios behave like a real document.
pub struct FakeTree {
    inner: Arc<Mutex<TreeInner>>,
}

impl FakeTree {
    /// Create a tree holding a single root node.
    pub fn new() -> Arc<Self> {
        let root = NodeId::new(1);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            NodeData {
                tag: "root".to_string(),
                attrs: HashMap::new(),
                parent: None,
                children: Vec::new(),
            },
        );
        Arc::new(Self {
            inner: Arc::new(Mutex::new(TreeInner {
                nodes,
                root,
                next_node: 2,
                subscriptions: BTreeMap::new(),
                next_subscription: 1,
                teardown_count: 0,
                fail_subscribe: false,
                batch: None,
            })),
        })
    }

    /// Create a detached node. Emits nothing until the node is appended.
    pub fn create(&self, tag: &str) -> NodeId {
        let mut inner = self.inner.lock();
        let id = NodeId::new(inner.next_node);
        inner.next_node += 1;
        inner.nodes.insert(
            id,
            NodeData {
                tag: tag.to_string(),
                attrs: HashMap::new(),
                parent: None,
                children: Vec::new(),
            },
        );
        id
    }

    /// Attach `node` under `parent`, emitting a child-list mutation on the
    /// parent. Re-attaching a detached node keeps its identity.
    pub fn append(&self, parent: NodeId, node: NodeId) {
        let mutation = {
            let mut inner = self.inner.lock();
            if let Some(old_parent) = inner.nodes.get(&node).and_then(|n| n.parent) {
                if let Some(data) = inner.nodes.get_mut(&old_parent) {
                    data.children.retain(|&c| c != node);
                }
            }
            if let Some(data) = inner.nodes.get_mut(&node) {
                data.parent = Some(parent);
            }
            if let Some(data) = inner.nodes.get_mut(&parent) {
                data.children.push(node);
            }
            Mutation::child_list(parent, vec![node])
        };
        self.push_or_emit(mutation);
    }

    /// Create a node and attach it in one step.
    pub fn append_new(&self, parent: NodeId, tag: &str) -> NodeId {
        let node = self.create(tag);
        self.append(parent, node);
        node
    }

    /// Detach `node` from its parent, emitting a child-list mutation on the
    /// parent. The node and its subtree keep their identity and can be
    /// re-appended later.
    pub fn detach(&self, node: NodeId) {
        let mutation = {
            let mut inner = self.inner.lock();
            let Some(parent) = inner.nodes.get(&node).and_then(|n| n.parent) else {
                return;
            };
            if let Some(data) = inner.nodes.get_mut(&parent) {
                data.children.retain(|&c| c != node);
            }
            if let Some(data) = inner.nodes.get_mut(&node) {
                data.parent = None;
            }
            Mutation::child_list(parent, Vec::new())
        };
        self.push_or_emit(mutation);
    }

    /// Set an attribute on `node`, emitting an attribute mutation.
    pub fn set_attr(&self, node: NodeId, key: &str, value: &str) {
        {
            let mut inner = self.inner.lock();
            let Some(data) = inner.nodes.get_mut(&node) else {
                return;
            };
            data.attrs.insert(key.to_string(), value.to_string());
        }
        self.push_or_emit(Mutation::attributes(node));
    }

    /// Run `mutate` with mutation buffering enabled, then deliver everything
    /// it produced as one notification batch, the way a host coalesces all
    /// changes from one event-loop turn.
    pub fn batch(&self, mutate: impl FnOnce(&Self)) {
        self.inner.lock().batch = Some(Vec::new());
        mutate(self);
        let buffered = self.inner.lock().batch.take().unwrap_or_default();
        self.emit(buffered);
    }

    /// Make every future `subscribe` call fail, simulating a host without a
    /// working observation primitive.
    pub fn fail_subscriptions(&self, fail: bool) {
        self.inner.lock().fail_subscribe = fail;
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.lock().subscriptions.len()
    }

    /// How many subscriptions have been torn down so far.
    pub fn teardown_count(&self) -> u64 {
        self.inner.lock().teardown_count
    }

    pub fn tag_of(&self, node: NodeId) -> Option<String> {
        self.inner.lock().nodes.get(&node).map(|n| n.tag.clone())
    }

    pub fn attr_of(&self, node: NodeId, key: &str) -> Option<String> {
        self.inner
            .lock()
            .nodes
            .get(&node)
            .and_then(|n| n.attrs.get(key).cloned())
    }

    fn push_or_emit(&self, mutation: Mutation) {
        let emit_now = {
            let mut inner = self.inner.lock();
            match inner.batch.as_mut() {
                Some(buffer) => {
                    buffer.push(mutation);
                    None
                }
                None => Some(mutation),
            }
        };
        if let Some(mutation) = emit_now {
            self.emit(vec![mutation]);
        }
    }

    /// Deliver `batch` to every subscription whose root contains the
    /// mutation target. Sinks run without the tree lock held, so handlers
    /// may mutate the tree or manage subscriptions re-entrantly.
    fn emit(&self, batch: MutationBatch) {
        if batch.is_empty() {
            return;
        }
        let deliveries: Vec<(MutationSink, MutationBatch)> = {
            let inner = self.inner.lock();
            inner
                .subscriptions
                .values()
                .filter_map(|sub| {
                    let scoped: MutationBatch = batch
                        .iter()
                        .filter(|m| is_under(&inner, m.target, sub.root))
                        .cloned()
                        .collect();
                    if scoped.is_empty() {
                        None
                    } else {
                        Some((Arc::clone(&sub.sink), scoped))
                    }
                })
                .collect()
        };
        for (sink, scoped) in deliveries {
            sink(&scoped);
        }
    }
}

impl TreeHost for FakeTree {
    fn root(&self) -> NodeId {
        self.inner.lock().root
    }

    fn subscribe(&self, root: NodeId, sink: MutationSink) -> Result<Subscription, WatchError> {
        let mut inner = self.inner.lock();
        if inner.fail_subscribe {
            return Err(WatchError::host_unavailable(
                "tree observation primitive disabled",
            ));
        }
        let id = inner.next_subscription;
        inner.next_subscription += 1;
        inner.subscriptions.insert(id, SubscriptionEntry { root, sink });

        let shared = Arc::clone(&self.inner);
        Ok(Subscription::new(move || {
            let mut inner = shared.lock();
            if inner.subscriptions.remove(&id).is_some() {
                inner.teardown_count += 1;
            }
        }))
    }

    fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let inner = self.inner.lock();
        let mut out = Vec::new();
        if inner.nodes.contains_key(&node) {
            collect_preorder(&inner, node, &mut out);
        }
        out
    }
}

fn is_under(inner: &TreeInner, node: NodeId, root: NodeId) -> bool {
    let mut current = Some(node);
    while let Some(id) = current {
        if id == root {
            return true;
        }
        current = inner.nodes.get(&id).and_then(|n| n.parent);
    }
    false
}

fn collect_preorder(inner: &TreeInner, node: NodeId, out: &mut Vec<NodeId>) {
    out.push(node);
    if let Some(data) = inner.nodes.get(&node) {
        for &child in &data.children {
            collect_preorder(inner, child, out);
        }
    }
}

/// Matches nodes by tag name, excluding the query root itself.
pub struct TagPattern {
    tree: Arc<FakeTree>,
    tag: String,
}

impl TagPattern {
    pub fn new(tree: Arc<FakeTree>, tag: impl Into<String>) -> Self {
        Self {
            tree,
            tag: tag.into(),
        }
    }
}

impl Pattern for TagPattern {
    fn name(&self) -> &str {
        &self.tag
    }

    fn matches(&self, node: NodeId) -> Result<bool, PatternError> {
        Ok(self.tree.tag_of(node).as_deref() == Some(self.tag.as_str()))
    }

    fn query_all(&self, root: NodeId) -> Result<Vec<NodeId>, PatternError> {
        Ok(self
            .tree
            .descendants(root)
            .into_iter()
            .skip(1)
            .filter(|&n| self.tree.tag_of(n).as_deref() == Some(self.tag.as_str()))
            .collect())
    }
}

/// Matches nodes carrying a specific attribute value.
pub struct AttrPattern {
    tree: Arc<FakeTree>,
    key: String,
    value: String,
    label: String,
}

impl AttrPattern {
    pub fn new(tree: Arc<FakeTree>, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        let label = format!("[{key}={value}]");
        Self {
            tree,
            key,
            value,
            label,
        }
    }
}

impl Pattern for AttrPattern {
    fn name(&self) -> &str {
        &self.label
    }

    fn matches(&self, node: NodeId) -> Result<bool, PatternError> {
        Ok(self.tree.attr_of(node, &self.key).as_deref() == Some(self.value.as_str()))
    }

    fn query_all(&self, root: NodeId) -> Result<Vec<NodeId>, PatternError> {
        Ok(self
            .tree
            .descendants(root)
            .into_iter()
            .skip(1)
            .filter(|&n| self.tree.attr_of(n, &self.key).as_deref() == Some(self.value.as_str()))
            .collect())
    }
}

/// Always fails, for exercising the synchronous pattern-error path.
pub struct BrokenPattern;

impl Pattern for BrokenPattern {
    fn name(&self) -> &str {
        "<broken>"
    }

    fn matches(&self, _node: NodeId) -> Result<bool, PatternError> {
        Err(PatternError::new("<broken>", "synthetic pattern failure"))
    }

    fn query_all(&self, _root: NodeId) -> Result<Vec<NodeId>, PatternError> {
        Err(PatternError::new("<broken>", "synthetic pattern failure"))
    }
}

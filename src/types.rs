//! Core identity types shared across the engine.

use serde::{Deserialize, Serialize};

/// Identity handle for a node in the host tree.
///
/// Nodes are identity-keyed, not value-keyed: two structurally identical
/// nodes have distinct ids, and a node keeps its id across detach and
/// re-insertion. Holding a `NodeId` never extends the node's lifetime, so
/// bookkeeping built on ids stays safe after the host drops the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_node_id_identity() {
        let a = NodeId::new(7);
        let b = NodeId::new(7);
        let c = NodeId::new(8);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.value(), 7);

        let mut set = HashSet::new();
        assert!(set.insert(a));
        assert!(!set.insert(b));
        assert!(set.insert(c));
    }

    #[test]
    fn test_node_id_display() {
        assert_eq!(NodeId::new(42).to_string(), "#42");
    }
}

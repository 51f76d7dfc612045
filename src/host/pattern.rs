//! Pattern capability: opaque declarative node predicates.
//!
//! The engine does not know any pattern syntax. A pattern is a value
//! implementing a match test and a subtree query; the host-specific pattern
//! language (CSS selectors, XPath, typed predicates) lives entirely behind
//! this trait.

use crate::error::PatternError;
use crate::types::NodeId;

/// Declarative predicate identifying nodes of interest.
pub trait Pattern: Send + Sync {
    /// Short label for logging.
    fn name(&self) -> &str {
        "pattern"
    }

    /// Does `node` match this pattern right now?
    fn matches(&self, node: NodeId) -> Result<bool, PatternError>;

    /// All currently matching descendants of `root`, in pre-order.
    fn query_all(&self, root: NodeId) -> Result<Vec<NodeId>, PatternError>;

    /// First currently matching descendant of `root`. Hosts with a cheaper
    /// short-circuiting query should override this.
    fn query_first(&self, root: NodeId) -> Result<Option<NodeId>, PatternError> {
        Ok(self.query_all(root)?.into_iter().next())
    }
}

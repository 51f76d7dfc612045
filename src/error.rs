//! Error types for the watch engine.
//!
//! Double cancellation, double unregistration, and double teardown are
//! deliberately absent from this taxonomy: they are benign no-ops at the
//! API surface, never errors.

use thiserror::Error;

/// A pattern could not be parsed or evaluated by the host's matching
/// primitive.
///
/// Surfaced synchronously from the immediate scan of a `watch` call and
/// fatal to that call only. Pattern failures during asynchronous delivery
/// are logged and treated as non-matches instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("pattern '{pattern}' failed: {reason}")]
pub struct PatternError {
    pub pattern: String,
    pub reason: String,
}

impl PatternError {
    pub fn new(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from watch operations.
#[derive(Error, Debug)]
pub enum WatchError {
    /// A pattern was rejected by the host's matching primitive.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] PatternError),

    /// The tree or its observation primitive is missing or non-functional.
    /// Surfaced once at registration time; the session fails to start.
    #[error("tree host unavailable: {reason}")]
    HostUnavailable { reason: String },

    /// Configuration could not be loaded or parsed.
    #[error("failed to load config: {reason}")]
    Config { reason: String },
}

impl WatchError {
    pub fn host_unavailable(reason: impl Into<String>) -> Self {
        Self::HostUnavailable {
            reason: reason.into(),
        }
    }
}

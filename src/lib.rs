//! dynquery: mutation-driven selector matching over live mutable trees.
//!
//! Watches a region of a host-owned mutable tree and invokes callbacks
//! exactly once (or repeatedly) when nodes matching declarative patterns
//! appear, while sharing one underlying change subscription per watch root
//! across every interested caller and releasing all resources when no
//! interest remains.
//!
//! # Architecture
//!
//! ```text
//! QueryWatcher::watch
//!   - immediate synchronous scan
//!   - settle-delay / timeout orchestration
//!   - idempotent cancellation handle
//!         |
//! ProcessorRegistry
//!   - per-root processor table
//!   - per-processor delivery dedup
//!         |
//! Multiplexer
//!   - one host Subscription per watch root
//!   - mutation batch -> affected-node expansion
//!         |
//! TreeHost / Pattern / TimerHost   (host capability seams)
//! ```
//!
//! The engine never sees a concrete tree: hosts supply change notification,
//! pattern testing, subtree queries, and timers through the traits in
//! [`host`], and the [`testing`] module ships deterministic in-memory
//! implementations of all of them.

pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod observer;
pub mod query;
pub mod testing;
pub mod types;

pub use config::{DEFAULT_SETTLE_DELAY_MS, LoggingConfig, Settings};
pub use error::{PatternError, WatchError};
pub use host::{
    Mutation, MutationBatch, MutationKind, MutationSink, Pattern, Subscription, TimerCallback,
    TimerHost, TimerId, TokioTimers, TreeHost,
};
pub use observer::{Multiplexer, ObservationRecord, Processor, ProcessorRegistry};
pub use query::{QueryWatcher, QueryWatcherBuilder, WatchHandle, WatchOptions};
pub use types::NodeId;

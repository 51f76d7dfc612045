//! Shared tree observation: one native subscription per root, fanned out
//! to every interested processor.
//!
//! # Architecture
//!
//! ```text
//! Multiplexer
//!   - one host Subscription per watch root
//!   - expands mutation batches to affected-node lists
//!         |
//! ProcessorRegistry
//!   - per-root processor set
//!   - per-processor delivery dedup
//!         |
//!    +---------+---------+
//!    |         |         |
//! Processor Processor Processor
//! ```

mod multiplexer;
mod registry;

pub use multiplexer::{Multiplexer, ObservationRecord};
pub use registry::{Processor, ProcessorRegistry};

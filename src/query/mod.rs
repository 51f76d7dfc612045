//! Public query surface: watch sessions over the observer layer.

mod options;
mod session;

pub use options::WatchOptions;
pub use session::{QueryWatcher, QueryWatcherBuilder, WatchHandle};

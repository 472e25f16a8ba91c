//! Filesystem watching and change coalescing.
//!
//! # Architecture
//!
//! ```text
//! WatchSource (notify, recursive)
//!   - PathFilter: extension allow-list, ignored directories
//!         |
//!     Coalescer (pending set + one cancellable delayed flush)
//!         |
//!     BatchSink (the analyzer dispatcher)
//! ```

mod coalescer;
mod error;
mod event;
mod filter;
mod source;

pub use coalescer::{BatchSink, Coalescer, truncate_to_recent};
pub use error::WatchError;
pub use event::{ChangeEvent, ChangeKind};
pub use filter::{IGNORED_DIRS, PathFilter, is_source_file};
pub use source::WatchSource;

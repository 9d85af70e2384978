//! Filesystem MeterDefinition loader with hot-reload via `notify` watcher.
//!
//! Scans a directory for YAML definitions and, once watching, turns file
//! create/modify/remove events into registry `add`/`update`/`delete`
//! calls.

mod core;
mod report;
mod watcher;


pub use self::core::RuleLoader;
pub use self::report::{LoadResult, LoadStatus};

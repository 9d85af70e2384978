//! Rule registry: admission (compile + rate limit), the active rule set,
//! memoized matching, and snapshot resync.

mod core;
mod resync;


pub use self::core::{Admission, RuleChangeQueue, RuleRegistry};
pub use self::resync::ResyncReport;

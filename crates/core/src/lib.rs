//! Shared data model for the metering engine: identity keys, workload
//! objects, MeterDefinition rules, Associations, errors and configuration.

pub mod association;
pub mod config;
pub mod definition;
pub mod error;
pub mod key;
pub mod object;

pub use association::Association;
pub use config::{EngineConfig, RateLimitConfig};
pub use definition::*;
pub use error::*;
pub use key::{Keyed, ObjectKey};
pub use object::{CandidateObject, ObjectMeta, OwnerReference};

//! Object → rule Associations, the rule → object inverted index, and the
//! coordinator that keeps them current as rules change.

pub mod coordinator;
pub mod error;
pub mod indexer;
pub mod object_index;
pub mod snapshot;
pub mod store;

pub use coordinator::ResyncCoordinator;
pub use error::{IndexError, Result};
pub use indexer::{IndexFn, Indexed};
pub use object_index::{AssociationChangeQueue, ObjectIndex};
pub use snapshot::load_objects;
pub use store::{IndexChange, Store};

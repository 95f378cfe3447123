//! Append-only event log boundary.
//!
//! The log itself (replication, durability) is an external collaborator; the
//! processing core only needs to read from a global position, know the head,
//! and resolve a timestamp to a position. `InMemoryEventLog` backs tests and
//! the demo API.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventLog;
pub use r#trait::{EventLog, EventLogError, StoredEvent, UncommittedEvent};

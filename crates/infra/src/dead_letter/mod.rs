//! Dead-letter queue for events a handler keeps failing on.
//!
//! Entries are keyed by (processor, handler, event): dead-lettering the same
//! event for the same handler again bumps its failure count instead of
//! creating a duplicate.

pub mod in_memory;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use pedalstream_core::DeadLetterId;

use crate::event_log::StoredEvent;

pub use in_memory::InMemoryDeadLetterQueue;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: DeadLetterId,
    pub processor: String,
    pub segment_id: u32,
    /// Name of the projection that failed.
    pub handler: String,
    pub event: StoredEvent,
    pub failure_count: u32,
    pub last_error: String,
    pub enqueued_at: DateTime<Utc>,
    pub last_retry_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Error)]
pub enum DeadLetterError {
    #[error("dead-letter storage unavailable: {0}")]
    Unavailable(String),
}

/// Storage for dead-lettered events.
pub trait DeadLetterQueue: Send + Sync {
    fn enqueue(
        &self,
        processor: &str,
        segment_id: u32,
        handler: &str,
        event: StoredEvent,
        error: String,
    ) -> Result<DeadLetterEntry, DeadLetterError>;

    fn get(&self, id: DeadLetterId) -> Result<Option<DeadLetterEntry>, DeadLetterError>;

    /// Entries of a processor, oldest first.
    fn list(&self, processor: &str) -> Result<Vec<DeadLetterEntry>, DeadLetterError>;

    /// Record another failed (manual) retry.
    fn record_failure(
        &self,
        id: DeadLetterId,
        error: String,
    ) -> Result<Option<DeadLetterEntry>, DeadLetterError>;

    /// Remove an entry. Returns `false` if it did not exist.
    fn evict(&self, id: DeadLetterId) -> Result<bool, DeadLetterError>;

    /// Remove every entry of a processor, returning how many were removed.
    fn clear(&self, processor: &str) -> Result<usize, DeadLetterError>;

    fn count(&self, processor: &str) -> Result<usize, DeadLetterError>;
}

impl<Q> DeadLetterQueue for Arc<Q>
where
    Q: DeadLetterQueue + ?Sized,
{
    fn enqueue(
        &self,
        processor: &str,
        segment_id: u32,
        handler: &str,
        event: StoredEvent,
        error: String,
    ) -> Result<DeadLetterEntry, DeadLetterError> {
        (**self).enqueue(processor, segment_id, handler, event, error)
    }

    fn get(&self, id: DeadLetterId) -> Result<Option<DeadLetterEntry>, DeadLetterError> {
        (**self).get(id)
    }

    fn list(&self, processor: &str) -> Result<Vec<DeadLetterEntry>, DeadLetterError> {
        (**self).list(processor)
    }

    fn record_failure(
        &self,
        id: DeadLetterId,
        error: String,
    ) -> Result<Option<DeadLetterEntry>, DeadLetterError> {
        (**self).record_failure(id, error)
    }

    fn evict(&self, id: DeadLetterId) -> Result<bool, DeadLetterError> {
        (**self).evict(id)
    }

    fn clear(&self, processor: &str) -> Result<usize, DeadLetterError> {
        (**self).clear(processor)
    }

    fn count(&self, processor: &str) -> Result<usize, DeadLetterError> {
        (**self).count(processor)
    }
}

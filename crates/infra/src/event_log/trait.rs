use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use std::sync::Arc;

/// An event ready to be appended (not yet assigned a position).
///
/// Use `UncommittedEvent::from_typed()` to build one from a typed domain
/// event: it serializes the payload and captures the metadata needed to
/// route and deserialize it later (event type, version, business time,
/// partition key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: String,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

/// An event committed to the log.
///
/// ## Positions
///
/// - `global_position` is assigned by the log on append: strictly increasing
///   across the whole log, starting at 1. Tracking tokens store it.
/// - `sequence_number` is the position inside the aggregate stream
///   (`aggregate_id`), starting at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub global_position: u64,

    pub aggregate_id: String,
    pub aggregate_type: String,
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    /// The key deciding which segment processes this event.
    pub fn partition_key(&self) -> &str {
        &self.aggregate_id
    }

    /// Convert a stored event into an envelope for handler dispatch.
    pub fn to_envelope(&self) -> pedalstream_events::EventEnvelope<JsonValue> {
        pedalstream_events::EventEnvelope::new(
            self.event_id,
            self.global_position,
            self.aggregate_id.clone(),
            self.aggregate_type.clone(),
            self.sequence_number,
            self.event_type.clone(),
            self.occurred_at,
            self.payload.clone(),
        )
    }
}

/// Event log operation error.
#[derive(Debug, Clone, Error)]
pub enum EventLogError {
    /// The log cannot be reached (I/O, connection loss, ...).
    #[error("event log unavailable: {0}")]
    Unavailable(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),
}

/// Ordered, globally-positioned, append-only event log.
///
/// ## Read Semantics
///
/// `read_after(after, limit)` returns up to `limit` events with
/// `global_position > after` in position order (`None` reads from the very
/// first event). Events are never filtered by the log: segment membership is
/// decided by the consumer from the partition key, so every segment walks
/// the same positions.
///
/// ## Timestamp Resolution
///
/// `position_before(at)` returns the token position from which the first
/// event with `occurred_at >= at` is the next one to read: `None` when that
/// is the very first event, the head when no such event exists.
pub trait EventLog: Send + Sync {
    fn append(&self, events: Vec<UncommittedEvent>) -> Result<Vec<StoredEvent>, EventLogError>;

    fn read_after(&self, after: Option<u64>, limit: usize) -> Result<Vec<StoredEvent>, EventLogError>;

    /// Position of the last committed event (0 for an empty log).
    fn head_position(&self) -> Result<u64, EventLogError>;

    fn position_before(&self, at: DateTime<Utc>) -> Result<Option<u64>, EventLogError>;
}

impl<L> EventLog for Arc<L>
where
    L: EventLog + ?Sized,
{
    fn append(&self, events: Vec<UncommittedEvent>) -> Result<Vec<StoredEvent>, EventLogError> {
        (**self).append(events)
    }

    fn read_after(&self, after: Option<u64>, limit: usize) -> Result<Vec<StoredEvent>, EventLogError> {
        (**self).read_after(after, limit)
    }

    fn head_position(&self) -> Result<u64, EventLogError> {
        (**self).head_position()
    }

    fn position_before(&self, at: DateTime<Utc>) -> Result<Option<u64>, EventLogError> {
        (**self).position_before(at)
    }
}

impl UncommittedEvent {
    /// Convenience constructor from a typed domain event.
    pub fn from_typed<E>(
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventLogError>
    where
        E: pedalstream_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event)
            .map_err(|e| EventLogError::InvalidAppend(format!("payload serialization failed: {e}")))?;

        Ok(Self {
            event_id,
            aggregate_id: event.partition_key().to_string(),
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use super::r#trait::{EventLog, EventLogError, StoredEvent, UncommittedEvent};

/// In-memory append-only event log.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    inner: RwLock<LogState>,
}

#[derive(Debug, Default)]
struct LogState {
    events: Vec<StoredEvent>,
    stream_versions: HashMap<String, u64>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|s| s.events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventLog for InMemoryEventLog {
    fn append(&self, events: Vec<UncommittedEvent>) -> Result<Vec<StoredEvent>, EventLogError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        // All or nothing: reject the whole append before anything is stored.
        if events.iter().any(|e| e.aggregate_id.is_empty()) {
            return Err(EventLogError::InvalidAppend(
                "aggregate_id (partition key) cannot be empty".to_string(),
            ));
        }

        let mut state = self
            .inner
            .write()
            .map_err(|_| EventLogError::Unavailable("lock poisoned".to_string()))?;

        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let global_position = state.events.len() as u64 + 1;
            let version = state.stream_versions.entry(e.aggregate_id.clone()).or_insert(0);
            *version += 1;

            let stored = StoredEvent {
                event_id: e.event_id,
                global_position,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number: *version,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            };
            state.events.push(stored.clone());
            committed.push(stored);
        }

        Ok(committed)
    }

    fn read_after(&self, after: Option<u64>, limit: usize) -> Result<Vec<StoredEvent>, EventLogError> {
        let state = self
            .inner
            .read()
            .map_err(|_| EventLogError::Unavailable("lock poisoned".to_string()))?;

        // Positions are dense and start at 1, so position p lives at index p - 1.
        let start = after.unwrap_or(0) as usize;
        Ok(state.events.iter().skip(start).take(limit).cloned().collect())
    }

    fn head_position(&self) -> Result<u64, EventLogError> {
        let state = self
            .inner
            .read()
            .map_err(|_| EventLogError::Unavailable("lock poisoned".to_string()))?;

        Ok(state.events.last().map(|e| e.global_position).unwrap_or(0))
    }

    fn position_before(&self, at: DateTime<Utc>) -> Result<Option<u64>, EventLogError> {
        let state = self
            .inner
            .read()
            .map_err(|_| EventLogError::Unavailable("lock poisoned".to_string()))?;

        match state.events.iter().find(|e| e.occurred_at >= at) {
            Some(e) if e.global_position <= 1 => Ok(None),
            Some(e) => Ok(Some(e.global_position - 1)),
            None => Ok(state.events.last().map(|e| e.global_position)),
        }
    }
}

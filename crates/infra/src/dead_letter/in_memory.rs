use std::sync::RwLock;

use chrono::Utc;

use pedalstream_core::DeadLetterId;

use super::{DeadLetterEntry, DeadLetterError, DeadLetterQueue};
use crate::event_log::StoredEvent;

/// In-memory dead-letter queue for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterQueue {
    entries: RwLock<Vec<DeadLetterEntry>>,
}

impl InMemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> DeadLetterError {
    DeadLetterError::Unavailable("lock poisoned".to_string())
}

impl DeadLetterQueue for InMemoryDeadLetterQueue {
    fn enqueue(
        &self,
        processor: &str,
        segment_id: u32,
        handler: &str,
        event: StoredEvent,
        error: String,
    ) -> Result<DeadLetterEntry, DeadLetterError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;

        if let Some(existing) = entries.iter_mut().find(|e| {
            e.processor == processor && e.handler == handler && e.event.event_id == event.event_id
        }) {
            existing.failure_count += 1;
            existing.last_error = error;
            existing.segment_id = segment_id;
            return Ok(existing.clone());
        }

        let entry = DeadLetterEntry {
            id: DeadLetterId::new(),
            processor: processor.to_string(),
            segment_id,
            handler: handler.to_string(),
            event,
            failure_count: 1,
            last_error: error,
            enqueued_at: Utc::now(),
            last_retry_at: None,
        };
        entries.push(entry.clone());
        Ok(entry)
    }

    fn get(&self, id: DeadLetterId) -> Result<Option<DeadLetterEntry>, DeadLetterError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.iter().find(|e| e.id == id).cloned())
    }

    fn list(&self, processor: &str) -> Result<Vec<DeadLetterEntry>, DeadLetterError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.iter().filter(|e| e.processor == processor).cloned().collect())
    }

    fn record_failure(
        &self,
        id: DeadLetterId,
        error: String,
    ) -> Result<Option<DeadLetterEntry>, DeadLetterError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        Ok(entries.iter_mut().find(|e| e.id == id).map(|e| {
            e.failure_count += 1;
            e.last_error = error;
            e.last_retry_at = Some(Utc::now());
            e.clone()
        }))
    }

    fn evict(&self, id: DeadLetterId) -> Result<bool, DeadLetterError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        Ok(entries.len() != before)
    }

    fn clear(&self, processor: &str) -> Result<usize, DeadLetterError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let before = entries.len();
        entries.retain(|e| e.processor != processor);
        Ok(before - entries.len())
    }

    fn count(&self, processor: &str) -> Result<usize, DeadLetterError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.iter().filter(|e| e.processor == processor).count())
    }
}

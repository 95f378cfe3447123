use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::EventEnvelope;

/// Whether an event is delivered for the first time or re-delivered after a
/// token reset.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReplayStatus {
    /// Live delivery: the processor has never applied this event before.
    Regular,
    /// Re-delivery: the processor had already passed this position before it
    /// was reset.
    Replay,
}

impl ReplayStatus {
    pub fn is_replay(self) -> bool {
        matches!(self, ReplayStatus::Replay)
    }
}

/// Failure while folding an event into a read model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectionError {
    /// The payload could not be decoded into the projection's event type.
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(String),

    /// The handler rejected or failed to apply the event.
    #[error("failed to apply event: {0}")]
    Apply(String),

    /// Read-model storage is unreachable; the processor cannot continue.
    #[error("read model storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl ProjectionError {
    /// Transient per-event failures are retried and then dead-lettered;
    /// storage failures stop the processor.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProjectionError::StorageUnavailable(_))
    }
}

/// A projection builds a read model from an append-only event stream.
///
/// Projections implement the **CQRS read model pattern**: they fold events
/// (write model) into queryable state (read model).
///
/// ## Lifecycle
///
/// 1. **Register**: the projection declares the event types it folds; the
///    `HandlerRegistry` routes each event tag to the projections that declared it
/// 2. **Apply**: events are staged in a `ProjectionBatch` opened by `begin()`
///    and become visible together on `commit()`
/// 3. **Query**: read models are queried directly (no replay needed)
/// 4. **Reset**: before a rewound replay, `on_reset()` discards all derived
///    state so the replay rebuilds it from scratch
///
/// ## Replay
///
/// Staged events carry a `ReplayStatus`. Read-model mutation must be identical
/// in both modes so a replay converges to the same state as the original
/// processing. Externally visible side effects (query-update notifications,
/// e-mails) must only happen for `ReplayStatus::Regular`.
///
/// ## Batches
///
/// A processor opens one batch per segment batch and commits it in the same
/// step that stores the segment token. A batch that is dropped without
/// `commit()` must leave no trace: no read-model writes and no side effects.
/// A worker that loses its segment mid-batch therefore discards its work and
/// the next owner applies those events exactly once.
///
/// ## Persistence
///
/// This trait makes no storage assumptions; read-model storage is an
/// infrastructure concern.
pub trait Projection: Send + Sync {
    /// Unique handler name (used for dead-letter routing and logs).
    fn name(&self) -> &str;

    /// Event type tags this projection folds.
    fn event_types(&self) -> &[&'static str];

    /// Open a unit of work for one batch of events.
    fn begin(&self) -> Box<dyn ProjectionBatch + '_>;

    /// Apply a single event and commit it immediately.
    fn apply(
        &self,
        envelope: &EventEnvelope<JsonValue>,
        status: ReplayStatus,
    ) -> Result<(), ProjectionError> {
        let mut batch = self.begin();
        batch.apply(envelope, status)?;
        batch.commit()
    }

    /// Discard all derived state before a replay from a rewound position.
    fn on_reset(&self) -> Result<(), ProjectionError> {
        Ok(())
    }

    /// Whether the processor hosting this projection may reset its tokens.
    fn supports_reset(&self) -> bool {
        true
    }
}

/// Staged changes of one projection for one batch.
pub trait ProjectionBatch {
    /// Stage one event. Later events in the batch observe earlier staged ones.
    ///
    /// A failed apply leaves the batch as it was, so the event can be retried
    /// or skipped.
    fn apply(
        &mut self,
        envelope: &EventEnvelope<JsonValue>,
        status: ReplayStatus,
    ) -> Result<(), ProjectionError>;

    /// Make every staged change visible, then run deferred side effects.
    fn commit(self: Box<Self>) -> Result<(), ProjectionError>;
}

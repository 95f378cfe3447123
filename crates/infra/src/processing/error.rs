use thiserror::Error;

use pedalstream_core::{DeadLetterId, WorkerId};

use crate::dead_letter::DeadLetterError;
use crate::event_log::EventLogError;
use crate::read_model::ReadModelError;

use super::status::ProcessorState;
use super::token_store::TokenStoreError;

/// Errors surfaced by processors, the coordinator and the replay controller.
#[derive(Debug, Clone, Error)]
pub enum ProcessorError {
    /// Another live owner holds the segment, or a split/merge on it is pending.
    #[error("segment {segment} of processor '{processor}' is held by {}", holder(owner))]
    ClaimConflict {
        processor: String,
        segment: u32,
        owner: Option<WorkerId>,
    },

    #[error("segment {segment} of processor '{processor}' cannot be merged: {reason}")]
    InvalidMerge {
        processor: String,
        segment: u32,
        reason: String,
    },

    #[error("handler '{handler}' failed on event at position {position} (segment {segment} of '{processor}'): {message}")]
    HandlerApply {
        processor: String,
        segment: u32,
        handler: String,
        position: u64,
        message: String,
    },

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("processor '{0}' does not support resetting its tokens")]
    ResetNotSupported(String),

    #[error("unknown processor '{0}'")]
    UnknownProcessor(String),

    #[error("processor '{processor}' has no segment {segment}")]
    UnknownSegment { processor: String, segment: u32 },

    #[error("processor '{processor}' is {actual}, expected {expected}")]
    InvalidState {
        processor: String,
        expected: ProcessorState,
        actual: ProcessorState,
    },

    #[error("dead letter {0} not found")]
    DeadLetterNotFound(DeadLetterId),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("failed to start processor threads: {0}")]
    Spawn(String),
}

fn holder(owner: &Option<WorkerId>) -> String {
    match owner {
        Some(owner) => format!("worker {owner}"),
        None => "a pending split or merge".to_string(),
    }
}

impl ProcessorError {
    /// Conflicts may succeed when retried later; everything else will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProcessorError::ClaimConflict { .. })
    }
}

impl From<EventLogError> for ProcessorError {
    fn from(value: EventLogError) -> Self {
        ProcessorError::StorageUnavailable(value.to_string())
    }
}

impl From<TokenStoreError> for ProcessorError {
    fn from(value: TokenStoreError) -> Self {
        ProcessorError::StorageUnavailable(value.to_string())
    }
}

impl From<ReadModelError> for ProcessorError {
    fn from(value: ReadModelError) -> Self {
        ProcessorError::StorageUnavailable(value.to_string())
    }
}

impl From<DeadLetterError> for ProcessorError {
    fn from(value: DeadLetterError) -> Self {
        ProcessorError::StorageUnavailable(value.to_string())
    }
}

//! Replay: pause a processor, rewrite its tokens, resume.
//!
//! Resetting is only allowed while a processor is paused and only if every
//! projection it hosts supports it. Events below the previous high-water
//! mark are re-delivered with `ReplayStatus::Replay`, so projections rebuild
//! their state without re-emitting side effects.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::event_log::EventLog;

use super::error::ProcessorError;
use super::registry::ProcessorRegistry;

/// Where a reset moves the tokens to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ResetTarget {
    /// Before the first event.
    Tail,
    /// The next event read is the first with `occurred_at >= t`.
    Timestamp(DateTime<Utc>),
    /// The next event read is the one after this position.
    Position(u64),
}

impl ResetTarget {
    /// Parse a raw target: RFC 3339 timestamp, else unsigned position.
    /// An absent or blank target means the tail.
    pub fn parse(raw: Option<&str>) -> Result<Self, ProcessorError> {
        let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
            return Ok(ResetTarget::Tail);
        };

        if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
            return Ok(ResetTarget::Timestamp(at.with_timezone(&Utc)));
        }
        raw.parse::<u64>().map(ResetTarget::Position).map_err(|_| {
            ProcessorError::Validation(format!(
                "reset target '{raw}' is neither an RFC 3339 timestamp nor a log position"
            ))
        })
    }

    /// Token position implementing this target (`None` = tail).
    pub fn resolve(&self, log: &dyn EventLog) -> Result<Option<u64>, ProcessorError> {
        match self {
            ResetTarget::Tail => Ok(None),
            ResetTarget::Timestamp(at) => Ok(log.position_before(*at)?),
            ResetTarget::Position(p) => Ok(Some(*p)),
        }
    }
}

/// Drives pause → reset → resume for registered processors.
#[derive(Clone)]
pub struct ReplayController {
    registry: Arc<ProcessorRegistry>,
    log: Arc<dyn EventLog>,
}

impl ReplayController {
    pub fn new(registry: Arc<ProcessorRegistry>, log: Arc<dyn EventLog>) -> Self {
        Self { registry, log }
    }

    pub fn pause(&self, processor: &str) -> Result<(), ProcessorError> {
        self.registry.get(processor)?.pause()
    }

    pub fn reset_tokens(&self, processor: &str, target: ResetTarget) -> Result<(), ProcessorError> {
        let processor = self.registry.get(processor)?;
        let position = target.resolve(self.log.as_ref())?;
        processor.reset_tokens(position)
    }

    pub fn resume(&self, processor: &str) -> Result<(), ProcessorError> {
        self.registry.get(processor)?.resume()
    }

    /// Parse `raw_target`, then pause, reset and resume the processor.
    ///
    /// Non-resettable processors and unparsable targets are rejected before
    /// the processor is paused.
    pub fn initiate_replay(&self, processor: &str, raw_target: Option<&str>) -> Result<ResetTarget, ProcessorError> {
        let handle = self.registry.get(processor)?;
        if !handle.supports_reset() {
            return Err(ProcessorError::ResetNotSupported(processor.to_string()));
        }
        let target = ResetTarget::parse(raw_target)?;

        info!(processor, ?target, "initiating replay");
        handle.pause()?;

        if let Err(err) = self.reset_tokens(processor, target) {
            warn!(processor, error = %err, "reset failed; resuming from the current tokens");
            if let Err(resume_err) = handle.resume() {
                warn!(processor, error = %resume_err, "could not resume after failed reset");
            }
            return Err(err);
        }

        handle.resume()?;
        Ok(target)
    }
}

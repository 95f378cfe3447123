//! Batch execution for one work package.
//!
//! Reads up to `batch_size` events after the package token and stages those
//! whose partition key hashes into the segment in one `ProjectionBatch` per
//! handler. The staged changes, any dead letters and the advanced token are
//! committed together under the segment lease; a batch revoked before that
//! point is dropped without a trace. Handler failures are retried and then
//! dead-lettered so one poison event never stalls its segment.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;

use tracing::{debug, error, info, warn};

use pedalstream_events::{Projection, ProjectionBatch, ReplayStatus};

use crate::event_log::StoredEvent;

use super::error::ProcessorError;
use super::processor::ProcessorInner;
use super::segment::{Segment, partition_hash};
use super::work_package::WorkPackage;

/// Outcome of one batch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum BatchOutcome {
    /// Nothing new in the log.
    CaughtUp,
    /// Token advanced; `applied` events belonged to the segment.
    Advanced { applied: usize },
    /// Stopped before completion; nothing was committed.
    Revoked,
}

/// Uncommitted work of one batch.
#[derive(Default)]
struct StagedBatch<'a> {
    projections: Vec<(&'a str, Box<dyn ProjectionBatch + 'a>)>,
    dead_letters: Vec<(&'a str, StoredEvent, ProcessorError)>,
}

impl<'a> StagedBatch<'a> {
    fn projection(&mut self, handler: &'a dyn Projection) -> &mut (dyn ProjectionBatch + 'a) {
        let index = match self.projections.iter().position(|(name, _)| *name == handler.name()) {
            Some(index) => index,
            None => {
                self.projections.push((handler.name(), handler.begin()));
                self.projections.len() - 1
            }
        };
        self.projections[index].1.as_mut()
    }
}

impl ProcessorInner {
    pub(crate) fn run_batch(&self, package: &Arc<WorkPackage>) {
        self.active.fetch_add(1, Ordering::SeqCst);
        let result = self.process_batch(package);
        self.active.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(outcome) => {
                debug!(processor = %self.name, segment = package.segment().id(), ?outcome, "batch finished");
            }
            Err(err @ ProcessorError::ClaimConflict { .. })
            | Err(err @ ProcessorError::UnknownSegment { .. }) => {
                warn!(processor = %self.name, segment = package.segment().id(), error = %err, "claim lost during batch");
                package.revoke();
                self.forget(package);
            }
            Err(err) => self.fail(&err),
        }
    }

    fn process_batch(&self, package: &WorkPackage) -> Result<BatchOutcome, ProcessorError> {
        let segment = package.segment();
        let mut token = package.token();
        let was_replaying = token.is_replaying();

        let events = self.log.read_after(token.position(), self.config.batch_size)?;
        if events.is_empty() {
            return Ok(BatchOutcome::CaughtUp);
        }

        let mut staged = StagedBatch::default();
        let mut applied = 0;
        for event in &events {
            if package.is_revoked() {
                return Ok(BatchOutcome::Revoked);
            }

            let position = event.global_position;
            let hash = partition_hash(event.partition_key());
            if segment.matches_hash(hash) && !token.already_applied(hash, position) {
                self.dispatch(&mut staged, segment, event, token.replay_status_for(position))?;
                applied += 1;
            }
            token = token.advanced_to(position);
        }

        if package.is_revoked() {
            return Ok(BatchOutcome::Revoked);
        }

        // Checked again under the ledger lock: a stopper sets the flag before
        // it releases, splits or merges the segment.
        let lease = self.coordinator.commit_token(
            &self.name,
            segment.id(),
            self.owner,
            token.clone(),
            || {
                if package.is_revoked() {
                    return Ok(false);
                }
                self.commit_staged(segment, staged)?;
                Ok(true)
            },
        )?;
        let Some(lease) = lease else {
            return Ok(BatchOutcome::Revoked);
        };

        if was_replaying && !token.is_replaying() {
            info!(processor = %self.name, segment = segment.id(), "replay finished");
        }
        package.advance(token, lease);

        Ok(BatchOutcome::Advanced { applied })
    }

    fn commit_staged(&self, segment: Segment, staged: StagedBatch<'_>) -> Result<(), ProcessorError> {
        for (handler, event, failure) in staged.dead_letters {
            self.dead_letter(segment, handler, &event, &failure)?;
        }
        for (handler, batch) in staged.projections {
            batch.commit().map_err(|err| {
                ProcessorError::StorageUnavailable(format!("committing handler '{handler}': {err}"))
            })?;
        }
        Ok(())
    }

    /// Stage one event in every handler registered for its type.
    fn dispatch<'a>(
        &'a self,
        staged: &mut StagedBatch<'a>,
        segment: Segment,
        event: &StoredEvent,
        status: ReplayStatus,
    ) -> Result<(), ProcessorError> {
        let handlers = self.handlers.handlers_for(&event.event_type);
        if handlers.is_empty() {
            return Ok(());
        }

        let envelope = event.to_envelope();
        for handler in handlers {
            let mut attempt = 1;
            loop {
                let result = staged.projection(handler.as_ref()).apply(&envelope, status);
                match result {
                    Ok(()) => break,
                    Err(err) if err.is_fatal() => {
                        return Err(ProcessorError::StorageUnavailable(err.to_string()));
                    }
                    Err(err) if attempt < self.config.max_attempts => {
                        debug!(
                            processor = %self.name,
                            handler = handler.name(),
                            position = event.global_position,
                            attempt,
                            error = %err,
                            "handler failed; retrying"
                        );
                        thread::sleep(self.config.retry_backoff);
                        attempt += 1;
                    }
                    Err(err) => {
                        let failure = ProcessorError::HandlerApply {
                            processor: self.name.clone(),
                            segment: segment.id(),
                            handler: handler.name().to_string(),
                            position: event.global_position,
                            message: err.to_string(),
                        };
                        staged.dead_letters.push((handler.name(), event.clone(), failure));
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn dead_letter(
        &self,
        segment: Segment,
        handler: &str,
        event: &StoredEvent,
        failure: &ProcessorError,
    ) -> Result<(), ProcessorError> {
        match &self.dead_letters {
            Some(queue) => {
                let entry = queue.enqueue(&self.name, segment.id(), handler, event.clone(), failure.to_string())?;
                warn!(
                    processor = %self.name,
                    segment = segment.id(),
                    handler,
                    position = event.global_position,
                    dead_letter = %entry.id,
                    failures = entry.failure_count,
                    "event dead-lettered"
                );
            }
            None => {
                error!(
                    processor = %self.name,
                    segment = segment.id(),
                    handler,
                    position = event.global_position,
                    error = %failure,
                    "no dead-letter queue configured; skipping event"
                );
            }
        }
        Ok(())
    }
}

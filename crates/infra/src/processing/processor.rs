//! Pooled streaming event processor.
//!
//! One supervisor thread per processor claims unclaimed segments, keeps the
//! leases of held segments alive and schedules idle work packages on a
//! bounded `WorkerPool`. Control operations (split, merge, release, pause,
//! reset, resume) run on the caller's thread and stop the affected packages
//! cooperatively before touching the coordinator.

use std::collections::{BTreeMap, HashMap};
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use pedalstream_core::{DeadLetterId, WorkerId};
use pedalstream_events::{HandlerRegistry, Projection, ReplayStatus};

use crate::dead_letter::{DeadLetterEntry, DeadLetterQueue};
use crate::event_log::EventLog;

use super::config::{InitialPosition, ProcessorConfig};
use super::coordinator::{ClaimedSegment, SegmentCoordinator};
use super::error::ProcessorError;
use super::segment::Segment;
use super::status::{ProcessorState, ProcessorStatus, SegmentStatus};
use super::token::TrackingToken;
use super::work_package::WorkPackage;
use super::worker_pool::WorkerPool;

/// Reported processor type.
pub const PROCESSOR_TYPE: &str = "pooled-streaming";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// State shared by the processor handle, its supervisor and its workers.
pub(crate) struct ProcessorInner {
    pub(super) name: String,
    pub(super) owner: WorkerId,
    pub(super) config: ProcessorConfig,
    pub(super) log: Arc<dyn EventLog>,
    pub(super) coordinator: Arc<SegmentCoordinator>,
    pub(super) handlers: HandlerRegistry,
    pub(super) dead_letters: Option<Arc<dyn DeadLetterQueue>>,
    state: Mutex<ProcessorState>,
    last_error: Mutex<Option<String>>,
    packages: Mutex<BTreeMap<u32, Arc<WorkPackage>>>,
    cooldowns: Mutex<HashMap<u32, Instant>>,
    /// Held for a whole supervisor tick; state transitions take it so no tick
    /// straddles a pause.
    tick: Mutex<()>,
    pub(super) active: AtomicUsize,
}

impl ProcessorInner {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ProcessorState {
        *lock(&self.state)
    }

    fn set_state(&self, state: ProcessorState) {
        *lock(&self.state) = state;
    }

    pub(super) fn package(&self, segment_id: u32) -> Option<Arc<WorkPackage>> {
        lock(&self.packages).get(&segment_id).cloned()
    }

    fn packages(&self) -> Vec<Arc<WorkPackage>> {
        lock(&self.packages).values().cloned().collect()
    }

    fn install(&self, claimed: ClaimedSegment) {
        let id = claimed.segment.id();
        lock(&self.packages).insert(id, Arc::new(WorkPackage::new(claimed)));
    }

    /// Drop a package from the map if it is still the registered one.
    pub(super) fn forget(&self, package: &Arc<WorkPackage>) {
        let mut packages = lock(&self.packages);
        let id = package.segment().id();
        if packages.get(&id).is_some_and(|p| Arc::ptr_eq(p, package)) {
            packages.remove(&id);
        }
    }

    /// Stop a package (bounded wait, then revoke) and unregister it.
    ///
    /// A revoked batch may still be staging events when this returns, but it
    /// can no longer commit them, so the segment is safe to hand over.
    fn stop_package(&self, package: &Arc<WorkPackage>, timeout: Duration) {
        if !package.stop(timeout) {
            warn!(
                processor = %self.name,
                segment = package.segment().id(),
                "in-flight batch did not finish in time; revoking"
            );
        }
        self.forget(package);
    }

    /// Enter the error state: stop scheduling and abort every package.
    pub(super) fn fail(&self, err: &ProcessorError) {
        error!(processor = %self.name, error = %err, "processor entering error state");
        self.set_state(ProcessorState::Error);
        *lock(&self.last_error) = Some(err.to_string());
        for package in self.packages() {
            package.abort();
        }
    }

    fn in_cooldown(&self, segment_id: u32) -> bool {
        let now = Instant::now();
        let mut cooldowns = lock(&self.cooldowns);
        cooldowns.retain(|_, until| *until > now);
        cooldowns.contains_key(&segment_id)
    }

    fn supervise(&self, pool: &WorkerPool) {
        let _tick = lock(&self.tick);
        if self.state() != ProcessorState::Running {
            return;
        }

        let result = self
            .extend_leases()
            .and_then(|()| self.claim_available());
        if let Err(err) = result {
            self.fail(&err);
            return;
        }

        for package in self.packages() {
            if package.try_schedule() && !pool.submit(package.clone()) {
                package.finish();
            }
        }
    }

    fn extend_leases(&self) -> Result<(), ProcessorError> {
        let half_lease = self.coordinator_lease() / 2;
        for package in self.packages() {
            if package.is_aborted() {
                continue;
            }
            let remaining = package.lease_expires_at() - Utc::now();
            if remaining > half_lease {
                continue;
            }

            let segment = package.segment().id();
            match self.coordinator.extend_claim(&self.name, segment, self.owner) {
                Ok(expires_at) => package.set_lease(expires_at),
                Err(err @ ProcessorError::ClaimConflict { .. }) | Err(err @ ProcessorError::UnknownSegment { .. }) => {
                    warn!(processor = %self.name, segment, error = %err, "lost claim on segment");
                    package.revoke();
                    self.forget(&package);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn coordinator_lease(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.lease_duration).unwrap_or_else(|_| chrono::Duration::seconds(10))
    }

    fn claim_available(&self) -> Result<(), ProcessorError> {
        let mut held = lock(&self.packages).len();
        if held >= self.config.max_claimed_segments {
            return Ok(());
        }

        for entry in self.coordinator.unclaimed(&self.name)? {
            if held >= self.config.max_claimed_segments {
                break;
            }
            let id = entry.segment.id();
            if self.package(id).is_some() || self.in_cooldown(id) || self.coordinator.is_pending(&self.name, id) {
                continue;
            }

            match self.coordinator.claim(&self.name, id, self.owner) {
                Ok(claimed) => {
                    info!(processor = %self.name, segment = %claimed.segment, "claimed segment");
                    self.install(claimed);
                    held += 1;
                }
                Err(ProcessorError::ClaimConflict { .. }) | Err(ProcessorError::UnknownSegment { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

struct Runtime {
    shutdown: mpsc::Sender<()>,
    supervisor: Option<thread::JoinHandle<()>>,
}

impl Runtime {
    fn spawn(inner: &Arc<ProcessorInner>) -> Result<Self, ProcessorError> {
        let spawn_error = |e: std::io::Error| ProcessorError::Spawn(e.to_string());

        let pool = WorkerPool::spawn(inner, inner.config.worker_threads).map_err(spawn_error)?;
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let supervisor_inner = inner.clone();
        let supervisor = thread::Builder::new()
            .name(format!("{}-supervisor", inner.name))
            .spawn(move || supervisor_loop(&supervisor_inner, pool, shutdown_rx))
            .map_err(spawn_error)?;

        Ok(Self {
            shutdown: shutdown_tx,
            supervisor: Some(supervisor),
        })
    }

    fn stop(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.supervisor.take() {
            let _ = j.join();
        }
    }
}

fn supervisor_loop(inner: &ProcessorInner, pool: WorkerPool, shutdown_rx: mpsc::Receiver<()>) {
    loop {
        match shutdown_rx.recv_timeout(inner.config.claim_interval) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => inner.supervise(&pool),
        }
    }
    pool.shutdown();
    debug!(processor = %inner.name, "supervisor stopped");
}

/// A named event processor hosting a set of projections.
pub struct EventProcessor {
    inner: Arc<ProcessorInner>,
    runtime: Mutex<Option<Runtime>>,
}

/// Builder for `EventProcessor`.
pub struct EventProcessorBuilder {
    name: String,
    log: Arc<dyn EventLog>,
    coordinator: Arc<SegmentCoordinator>,
    config: ProcessorConfig,
    handlers: HandlerRegistry,
    dead_letters: Option<Arc<dyn DeadLetterQueue>>,
    owner: WorkerId,
}

impl EventProcessorBuilder {
    pub fn config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn projection(mut self, projection: Arc<dyn Projection>) -> Self {
        self.handlers.register(projection);
        self
    }

    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn dead_letter_queue(mut self, queue: Arc<dyn DeadLetterQueue>) -> Self {
        self.dead_letters = Some(queue);
        self
    }

    /// Lease owner identity (defaults to a fresh id per processor).
    pub fn owner(mut self, owner: WorkerId) -> Self {
        self.owner = owner;
        self
    }

    pub fn build(self) -> EventProcessor {
        EventProcessor {
            inner: Arc::new(ProcessorInner {
                name: self.name,
                owner: self.owner,
                config: self.config,
                log: self.log,
                coordinator: self.coordinator,
                handlers: self.handlers,
                dead_letters: self.dead_letters,
                state: Mutex::new(ProcessorState::Paused),
                last_error: Mutex::new(None),
                packages: Mutex::new(BTreeMap::new()),
                cooldowns: Mutex::new(HashMap::new()),
                tick: Mutex::new(()),
                active: AtomicUsize::new(0),
            }),
            runtime: Mutex::new(None),
        }
    }
}

impl EventProcessor {
    pub fn builder(
        name: impl Into<String>,
        log: Arc<dyn EventLog>,
        coordinator: Arc<SegmentCoordinator>,
    ) -> EventProcessorBuilder {
        EventProcessorBuilder {
            name: name.into(),
            log,
            coordinator,
            config: ProcessorConfig::default(),
            handlers: HandlerRegistry::new(),
            dead_letters: None,
            owner: WorkerId::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn owner(&self) -> WorkerId {
        self.inner.owner
    }

    pub fn state(&self) -> ProcessorState {
        self.inner.state()
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.inner.config
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.inner.handlers
    }

    pub fn supports_reset(&self) -> bool {
        self.inner.handlers.supports_reset()
    }

    /// Segments this node currently processes.
    pub fn claimed_segments(&self) -> Vec<Segment> {
        self.inner.packages().iter().map(|p| p.segment()).collect()
    }

    fn invalid_state(&self, expected: ProcessorState, actual: ProcessorState) -> ProcessorError {
        ProcessorError::InvalidState {
            processor: self.inner.name.clone(),
            expected,
            actual,
        }
    }

    /// Surface a storage failure as the error state; pass everything else through.
    fn escalate(&self, err: ProcessorError) -> ProcessorError {
        if matches!(err, ProcessorError::StorageUnavailable(_)) {
            self.inner.fail(&err);
        }
        err
    }

    fn ensure_runtime(&self) -> Result<(), ProcessorError> {
        let mut runtime = lock(&self.runtime);
        if runtime.is_none() {
            *runtime = Some(Runtime::spawn(&self.inner)?);
        }
        Ok(())
    }

    fn initial_token(&self) -> Result<TrackingToken, ProcessorError> {
        Ok(match self.inner.config.initial_position {
            InitialPosition::Tail => TrackingToken::tail(),
            InitialPosition::Head => {
                TrackingToken::at_position(Some(self.inner.log.head_position()?).filter(|h| *h > 0))
            }
        })
    }

    /// Start processing: initialize tokens on first start, then let the
    /// supervisor claim segments. Clears the error state.
    pub fn start(&self) -> Result<(), ProcessorError> {
        let inner = &self.inner;
        {
            let _tick = lock(&inner.tick);
            match inner.state() {
                ProcessorState::Running if lock(&self.runtime).is_some() => return Ok(()),
                ProcessorState::Pausing | ProcessorState::Resetting => {
                    return Err(self.invalid_state(ProcessorState::Paused, inner.state()));
                }
                ProcessorState::Error => {
                    let packages = mem::take(&mut *lock(&inner.packages));
                    for package in packages.values() {
                        package.stop(inner.config.shutdown_timeout);
                    }
                    if let Err(err) = inner.coordinator.release_all(&inner.name, inner.owner) {
                        warn!(processor = %inner.name, error = %err, "could not release claims after error");
                    }
                    *lock(&inner.last_error) = None;
                    inner.set_state(ProcessorState::Paused);
                }
                _ => {}
            }
        }

        let initial = self.initial_token().map_err(|e| self.escalate(e))?;
        inner
            .coordinator
            .initialize(&inner.name, inner.config.initial_segment_count, initial)
            .map_err(|e| self.escalate(e))?;

        self.ensure_runtime()?;
        inner.set_state(ProcessorState::Running);
        info!(processor = %inner.name, owner = %inner.owner, "event processor started");
        Ok(())
    }

    /// Stop scheduling, wait for in-flight batches and release every claim.
    pub fn pause(&self) -> Result<(), ProcessorError> {
        let inner = &self.inner;
        {
            let _tick = lock(&inner.tick);
            match inner.state() {
                ProcessorState::Paused => return Ok(()),
                ProcessorState::Pausing | ProcessorState::Resetting => {
                    return Err(self.invalid_state(ProcessorState::Running, inner.state()));
                }
                ProcessorState::Running | ProcessorState::Error => {
                    inner.set_state(ProcessorState::Pausing);
                }
            }
        }

        let packages = mem::take(&mut *lock(&inner.packages));
        for package in packages.values() {
            if !package.stop(inner.config.shutdown_timeout) {
                warn!(
                    processor = %inner.name,
                    segment = package.segment().id(),
                    "in-flight batch did not finish before the shutdown timeout"
                );
            }
        }

        let released = inner
            .coordinator
            .release_all(&inner.name, inner.owner)
            .map_err(|e| self.escalate(e))?;

        inner.set_state(ProcessorState::Paused);
        info!(processor = %inner.name, released, "event processor paused");
        Ok(())
    }

    /// Cooperative shutdown: pause, then stop the supervisor and worker threads.
    pub fn shutdown(&self) -> Result<(), ProcessorError> {
        let paused = self.pause();
        if let Some(runtime) = lock(&self.runtime).take() {
            runtime.stop();
        }
        info!(processor = %self.inner.name, "event processor shut down");
        paused
    }

    /// Rewrite every token to `position` (`None` = tail) and reset the
    /// hosted projections. Only allowed while paused.
    pub fn reset_tokens(&self, position: Option<u64>) -> Result<(), ProcessorError> {
        let inner = &self.inner;
        if !self.supports_reset() {
            return Err(ProcessorError::ResetNotSupported(inner.name.clone()));
        }
        {
            let _tick = lock(&inner.tick);
            let state = inner.state();
            if state != ProcessorState::Paused {
                return Err(self.invalid_state(ProcessorState::Paused, state));
            }
            inner.set_state(ProcessorState::Resetting);
        }

        match inner.coordinator.reset_tokens(&inner.name, inner.owner, position) {
            Ok(()) => {}
            Err(err @ ProcessorError::StorageUnavailable(_)) => return Err(self.escalate(err)),
            Err(err) => {
                inner.set_state(ProcessorState::Paused);
                return Err(err);
            }
        }

        for projection in inner.handlers.projections() {
            if let Err(err) = projection.on_reset() {
                let err = ProcessorError::StorageUnavailable(format!(
                    "reset of projection '{}' failed: {err}",
                    projection.name()
                ));
                return Err(self.escalate(err));
            }
        }

        inner.set_state(ProcessorState::Paused);
        info!(processor = %inner.name, ?position, "event processor reset");
        Ok(())
    }

    /// Claim every segment (all or nothing) and start processing again.
    ///
    /// On `ClaimConflict` the processor stays paused.
    pub fn resume(&self) -> Result<(), ProcessorError> {
        let inner = &self.inner;
        {
            let _tick = lock(&inner.tick);
            let state = inner.state();
            match state {
                ProcessorState::Running => return Ok(()),
                ProcessorState::Paused => {}
                _ => return Err(self.invalid_state(ProcessorState::Paused, state)),
            }

            let claimed = inner
                .coordinator
                .claim_all(&inner.name, inner.owner)
                .map_err(|e| self.escalate(e))?;
            for segment in claimed {
                inner.install(segment);
            }
        }

        self.ensure_runtime()?;
        inner.set_state(ProcessorState::Running);
        info!(processor = %inner.name, "event processor resumed");
        Ok(())
    }

    /// Claim a specific segment for this node.
    pub fn claim_segment(&self, segment_id: u32) -> Result<bool, ProcessorError> {
        let inner = &self.inner;
        if inner.package(segment_id).is_some() {
            return Ok(true);
        }
        lock(&inner.cooldowns).remove(&segment_id);

        let claimed = inner
            .coordinator
            .claim(&inner.name, segment_id, inner.owner)
            .map_err(|e| self.escalate(e))?;
        info!(processor = %inner.name, segment = %claimed.segment, "segment claimed on request");
        inner.install(claimed);
        Ok(true)
    }

    /// Stop processing a segment and give up its claim.
    ///
    /// Waits at most `timeout` for an in-flight batch; the segment is not
    /// reclaimed by this node for `timeout` afterwards.
    pub fn release_segment(&self, segment_id: u32, timeout: Duration) -> Result<bool, ProcessorError> {
        let inner = &self.inner;
        lock(&inner.cooldowns).insert(segment_id, Instant::now() + timeout);

        let package = inner.package(segment_id);
        if let Some(package) = &package {
            inner.stop_package(package, timeout);
        }

        let released = inner
            .coordinator
            .release(&inner.name, segment_id, inner.owner)
            .map_err(|e| self.escalate(e))?;
        info!(processor = %inner.name, segment = segment_id, released, "segment released");
        Ok(package.is_some() || released)
    }

    /// Re-claim segments whose local processing was stopped by a failed split/merge.
    fn restore(&self, segment_ids: &[u32]) {
        let inner = &self.inner;
        for id in segment_ids {
            if let Ok(claimed) = inner.coordinator.claim(&inner.name, *id, inner.owner) {
                inner.install(claimed);
            }
        }
    }

    /// Split a segment this node processes. Returns `false` if it is not
    /// claimed locally.
    pub fn split_segment(&self, segment_id: u32) -> Result<bool, ProcessorError> {
        let inner = &self.inner;
        let Some(package) = inner.package(segment_id) else {
            return Ok(false);
        };

        let pending = inner
            .coordinator
            .begin_split(&inner.name, segment_id)
            .map_err(|e| self.escalate(e))?;
        inner.stop_package(&package, inner.config.shutdown_timeout);

        let (low, high) = match pending.commit(inner.owner) {
            Ok(halves) => halves,
            Err(err) => {
                self.restore(&[segment_id]);
                return Err(self.escalate(err));
            }
        };

        for half in [low, high] {
            let claimed = inner
                .coordinator
                .claim(&inner.name, half.id(), inner.owner)
                .map_err(|e| self.escalate(e))?;
            inner.install(claimed);
        }
        Ok(true)
    }

    /// Merge a segment with its sibling and process the result on this node.
    pub fn merge_segment(&self, segment_id: u32) -> Result<bool, ProcessorError> {
        let inner = &self.inner;
        let pending = inner
            .coordinator
            .begin_merge(&inner.name, segment_id)
            .map_err(|e| self.escalate(e))?;
        if pending.is_noop() {
            return Ok(true);
        }

        let mut stopped = Vec::new();
        for id in pending.segment_ids() {
            if let Some(package) = inner.package(*id) {
                inner.stop_package(&package, inner.config.shutdown_timeout);
                stopped.push(*id);
            }
        }

        let merged = match pending.commit(inner.owner) {
            Ok(merged) => merged,
            Err(err) => {
                self.restore(&stopped);
                return Err(self.escalate(err));
            }
        };

        let claimed = inner
            .coordinator
            .claim(&inner.name, merged.id(), inner.owner)
            .map_err(|e| self.escalate(e))?;
        inner.install(claimed);
        Ok(true)
    }

    /// Split the largest segment this node processes.
    pub fn split_largest_segment(&self) -> Result<bool, ProcessorError> {
        let largest = self
            .claimed_segments()
            .into_iter()
            .filter(Segment::can_split)
            .min_by_key(|s| (s.mask(), s.id()));
        match largest {
            Some(segment) => self.split_segment(segment.id()),
            None => Ok(false),
        }
    }

    /// Merge the smallest locally processed segment that has a mergeable sibling.
    pub fn merge_smallest_segment(&self) -> Result<bool, ProcessorError> {
        let inner = &self.inner;
        let all: Vec<Segment> = inner
            .coordinator
            .status(&inner.name)
            .map_err(|e| self.escalate(e))?
            .into_iter()
            .map(|e| e.segment)
            .collect();

        let mut candidates: Vec<Segment> = self
            .claimed_segments()
            .into_iter()
            .filter(|s| !s.is_root())
            .filter(|s| all.iter().any(|o| s.merged_with(o).is_some()))
            .collect();
        candidates.sort_by_key(|s| (std::cmp::Reverse(s.mask()), s.id()));

        match candidates.first() {
            Some(segment) => self.merge_segment(segment.id()),
            None => Ok(false),
        }
    }

    fn dead_letter_queue(&self) -> Result<&Arc<dyn DeadLetterQueue>, ProcessorError> {
        self.inner.dead_letters.as_ref().ok_or_else(|| {
            ProcessorError::Validation(format!(
                "processor '{}' has no dead-letter queue",
                self.inner.name
            ))
        })
    }

    fn dead_letter(&self, id: DeadLetterId) -> Result<DeadLetterEntry, ProcessorError> {
        self.dead_letter_queue()?
            .get(id)?
            .filter(|e| e.processor == self.inner.name)
            .ok_or(ProcessorError::DeadLetterNotFound(id))
    }

    pub fn dead_letters(&self) -> Result<Vec<DeadLetterEntry>, ProcessorError> {
        Ok(self.dead_letter_queue()?.list(&self.inner.name)?)
    }

    /// Re-apply a dead-lettered event through the handler that failed on it.
    ///
    /// Success evicts the entry; failure bumps its failure count.
    pub fn retry_dead_letter(&self, id: DeadLetterId) -> Result<(), ProcessorError> {
        let inner = &self.inner;
        let queue = self.dead_letter_queue()?;
        let entry = self.dead_letter(id)?;
        let projection = inner.handlers.find(&entry.handler).ok_or_else(|| {
            ProcessorError::Validation(format!("handler '{}' is not registered", entry.handler))
        })?;

        match projection.apply(&entry.event.to_envelope(), ReplayStatus::Regular) {
            Ok(()) => {
                queue.evict(id)?;
                info!(processor = %inner.name, dead_letter = %id, "dead letter retried successfully");
                Ok(())
            }
            Err(err) => {
                queue.record_failure(id, err.to_string())?;
                warn!(processor = %inner.name, dead_letter = %id, error = %err, "dead letter retry failed");
                Err(ProcessorError::HandlerApply {
                    processor: inner.name.clone(),
                    segment: entry.segment_id,
                    handler: entry.handler,
                    position: entry.event.global_position,
                    message: err.to_string(),
                })
            }
        }
    }

    pub fn evict_dead_letter(&self, id: DeadLetterId) -> Result<(), ProcessorError> {
        self.dead_letter(id)?;
        self.dead_letter_queue()?.evict(id)?;
        Ok(())
    }

    /// Status snapshot. Never fails: storage problems are reported as `error`.
    pub fn status(&self) -> ProcessorStatus {
        let inner = &self.inner;
        let state = inner.state();
        let mut error = state == ProcessorState::Error;
        let mut last_error = lock(&inner.last_error).clone();

        let head = inner.log.head_position().unwrap_or_else(|e| {
            error = true;
            last_error.get_or_insert_with(|| e.to_string());
            0
        });
        let entries = inner.coordinator.status(&inner.name).unwrap_or_else(|e| {
            error = true;
            last_error.get_or_insert_with(|| e.to_string());
            Vec::new()
        });

        let local: Vec<u32> = lock(&inner.packages).keys().copied().collect();
        let now = Utc::now();
        let segments = entries
            .into_iter()
            .map(|e| {
                let current_index = e.token.reported_position();
                SegmentStatus {
                    segment: e.segment.id(),
                    one_of: e.segment.one_of(),
                    token_type: e.token.kind().as_str().to_string(),
                    current_index,
                    replaying: e.token.is_replaying(),
                    behind: head.saturating_sub(current_index.unwrap_or(0)),
                    mergeable_segment: e.segment.mergeable_segment_id(),
                    split_segment: e.segment.split_segment_id(),
                    owner: e.live_owner(now),
                    claimed_locally: local.contains(&e.segment.id()),
                }
            })
            .collect();

        let active = inner.active.load(Ordering::SeqCst);
        ProcessorStatus {
            name: inner.name.clone(),
            token_store_identifier: inner.coordinator.storage_identifier().to_string(),
            state,
            running: state == ProcessorState::Running,
            error,
            last_error,
            resettable: self.supports_reset(),
            active_threads: active,
            available_threads: inner.config.worker_threads.saturating_sub(active),
            batch_size: inner.config.batch_size,
            processor_type: PROCESSOR_TYPE.to_string(),
            dead_letter_queue: inner.dead_letters.is_some(),
            segments,
        }
    }
}

impl Drop for EventProcessor {
    fn drop(&mut self) {
        if let Some(runtime) = lock(&self.runtime).take() {
            runtime.stop();
        }
    }
}

impl core::fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventProcessor")
            .field("name", &self.inner.name)
            .field("owner", &self.inner.owner)
            .field("state", &self.inner.state())
            .field("handlers", &self.inner.handlers)
            .finish()
    }
}

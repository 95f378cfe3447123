//! Integration tests for the full processing pipeline.
//!
//! Tests: EventLog → EventProcessor (segments, worker pool) → Projection →
//! ReadModel / QueryUpdateHub
//!
//! Verifies:
//! - Events reach the read model and live subscribers exactly once per segment
//! - Replays rebuild the same state without re-notifying subscribers
//! - Split, merge, release and multi-node claims keep processing going
//! - Poison events are dead-lettered without stalling their segment
//! - A batch revoked mid-flight commits nothing; its events are applied once

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use chrono::{DateTime, Utc};
    use serde_json::{Value as JsonValue, json};
    use uuid::Uuid;

    use pedalstream_core::WorkerId;
    use pedalstream_events::{
        EventEnvelope, Projection, ProjectionBatch, ProjectionError, QueryUpdateHub, ReplayStatus,
    };
    use pedalstream_rental::events::BIKE_AGGREGATE;
    use pedalstream_rental::{BikeRegistered, BikeRequested, BikeStatus, RentalEvent, RentalStatus};

    use crate::dead_letter::{DeadLetterQueue, InMemoryDeadLetterQueue};
    use crate::event_log::{EventLog, InMemoryEventLog, UncommittedEvent};
    use crate::processing::{
        EventProcessor, InMemoryTokenStore, ProcessorConfig, ProcessorError, ProcessorRegistry,
        ProcessorState, ReplayController, SegmentCoordinator,
    };
    use crate::projections::BikeStatusProjection;
    use crate::read_model::InMemoryReadModelStore;

    type Store = Arc<InMemoryReadModelStore<String, BikeStatus>>;

    struct Fixture {
        log: Arc<InMemoryEventLog>,
        coordinator: Arc<SegmentCoordinator>,
        projection: Arc<BikeStatusProjection<Store>>,
        dead_letters: Arc<InMemoryDeadLetterQueue>,
    }

    fn setup() -> Fixture {
        let store: Store = Arc::new(InMemoryReadModelStore::new());
        Fixture {
            log: Arc::new(InMemoryEventLog::new()),
            coordinator: Arc::new(SegmentCoordinator::new(
                Arc::new(InMemoryTokenStore::new()),
                Duration::from_secs(10),
            )),
            projection: Arc::new(BikeStatusProjection::new(store, Arc::new(QueryUpdateHub::new()))),
            dead_letters: Arc::new(InMemoryDeadLetterQueue::new()),
        }
    }

    fn fast_config() -> ProcessorConfig {
        ProcessorConfig::default()
            .with_claim_interval(Duration::from_millis(5))
            .with_retry(3, Duration::from_millis(1))
            .with_shutdown_timeout(Duration::from_secs(2))
    }

    fn processor(f: &Fixture, name: &str, config: ProcessorConfig) -> Arc<EventProcessor> {
        Arc::new(
            EventProcessor::builder(name, f.log.clone(), f.coordinator.clone())
                .config(config)
                .projection(f.projection.clone())
                .dead_letter_queue(f.dead_letters.clone())
                .build(),
        )
    }

    fn registered(bike_id: &str, at: DateTime<Utc>) -> RentalEvent {
        RentalEvent::BikeRegistered(BikeRegistered {
            bike_id: bike_id.to_string(),
            bike_type: "city".to_string(),
            location: "Utrecht".to_string(),
            occurred_at: at,
        })
    }

    fn requested(bike_id: &str, renter: &str, at: DateTime<Utc>) -> RentalEvent {
        RentalEvent::BikeRequested(BikeRequested {
            bike_id: bike_id.to_string(),
            renter: renter.to_string(),
            rental_reference: Uuid::now_v7().to_string(),
            occurred_at: at,
        })
    }

    fn append(log: &InMemoryEventLog, events: &[RentalEvent]) {
        let uncommitted = events
            .iter()
            .map(|e| UncommittedEvent::from_typed(BIKE_AGGREGATE, Uuid::now_v7(), e).unwrap())
            .collect();
        log.append(uncommitted).unwrap();
    }

    fn register_bikes(log: &InMemoryEventLog, range: std::ops::Range<usize>) {
        let now = Utc::now();
        let events: Vec<_> = range.map(|i| registered(&format!("bike-{i}"), now)).collect();
        append(log, &events);
    }

    /// Helper: poll until `condition` holds or the timeout expires.
    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    fn caught_up(p: &EventProcessor) -> bool {
        let status = p.status();
        status.running
            && !status.segments.is_empty()
            && status.segments.iter().all(|s| s.behind == 0 && !s.replaying)
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn requested_bike_is_visible_and_segment_is_not_behind() {
        let f = setup();
        let p = processor(&f, "P", fast_config());
        p.start().unwrap();
        assert_eq!(f.log.head_position().unwrap(), 0);

        let now = Utc::now();
        append(&f.log, &[registered("A", now), requested("A", "U", now)]);

        assert!(wait_until(WAIT, || {
            f.projection
                .find_one("A")
                .unwrap()
                .is_some_and(|b| b.status == RentalStatus::Requested)
        }));
        let a = f.projection.find_one("A").unwrap().unwrap();
        assert_eq!(a.renter.as_deref(), Some("U"));

        assert!(wait_until(WAIT, || caught_up(&p)));
        let status = p.status();
        assert_eq!(status.segments.len(), 1);
        assert_eq!(status.segments[0].behind, 0);
        assert_eq!(status.segments[0].current_index, Some(2));
        assert!(status.segments[0].claimed_locally);

        p.shutdown().unwrap();
    }

    #[test]
    fn replay_to_timestamp_rebuilds_state_without_notifications() {
        let f = setup();
        let p = processor(&f, "P", fast_config());
        let registry = Arc::new(ProcessorRegistry::new().with(p.clone()).unwrap());
        let replay = ReplayController::new(registry, f.log.clone());
        p.start().unwrap();

        let t0 = Utc::now();
        append(
            &f.log,
            &[
                registered("A", t0 + chrono::Duration::seconds(1)),
                requested("A", "U", t0 + chrono::Duration::seconds(2)),
            ],
        );

        let all = f.projection.subscribe_all();
        let one = f.projection.subscribe_one("A");
        assert!(wait_until(WAIT, || caught_up(&p) && f.projection.find_one("A").unwrap().is_some()));
        assert_eq!(all.drain().len(), 2);
        assert_eq!(one.drain().len(), 1);
        let before = f.projection.find_all().unwrap();

        let target = t0.to_rfc3339();
        replay.initiate_replay("P", Some(&target)).unwrap();

        assert!(wait_until(WAIT, || caught_up(&p)));
        assert_eq!(f.projection.find_all().unwrap(), before);
        let a = f.projection.find_one("A").unwrap().unwrap();
        assert_eq!(a.status, RentalStatus::Requested);
        assert_eq!(a.renter.as_deref(), Some("U"));

        assert!(all.drain().is_empty());
        assert!(one.drain().is_empty());

        // Live processing notifies again once the replay is over.
        append(&f.log, &[registered("B", Utc::now())]);
        assert!(wait_until(WAIT, || !all.drain().is_empty()));

        p.shutdown().unwrap();
    }

    #[test]
    fn replay_from_tail_yields_an_equal_read_model() {
        let f = setup();
        let p = processor(&f, "P", fast_config().with_initial_segment_count(4));
        let registry = Arc::new(ProcessorRegistry::new().with(p.clone()).unwrap());
        let replay = ReplayController::new(registry, f.log.clone());
        p.start().unwrap();

        register_bikes(&f.log, 0..20);
        let now = Utc::now();
        append(&f.log, &[requested("bike-3", "alice", now), requested("bike-7", "bob", now)]);
        assert!(wait_until(WAIT, || caught_up(&p) && f.projection.find_all().unwrap().len() == 20));
        let before = f.projection.find_all().unwrap();

        replay.initiate_replay("P", None).unwrap();
        assert!(wait_until(WAIT, || caught_up(&p)));
        assert_eq!(f.projection.find_all().unwrap(), before);

        p.shutdown().unwrap();
    }

    #[test]
    fn split_and_merge_while_running_keep_processing() {
        let f = setup();
        let p = processor(&f, "P", fast_config());
        p.start().unwrap();

        register_bikes(&f.log, 0..5);
        assert!(wait_until(WAIT, || caught_up(&p)));

        assert!(p.split_segment(0).unwrap());
        assert_eq!(p.claimed_segments().len(), 2);
        assert!(!p.split_segment(42).unwrap());

        register_bikes(&f.log, 5..10);
        assert!(wait_until(WAIT, || caught_up(&p) && f.projection.find_all().unwrap().len() == 10));
        let status = p.status();
        assert_eq!(status.segments.len(), 2);
        assert!(status.segments.iter().all(|s| s.one_of == 2));

        assert!(p.merge_segment(1).unwrap());
        let status = p.status();
        assert_eq!(status.segments.len(), 1);
        assert_eq!(status.segments[0].current_index, Some(10));

        register_bikes(&f.log, 10..12);
        assert!(wait_until(WAIT, || f.projection.find_all().unwrap().len() == 12));

        p.shutdown().unwrap();
    }

    #[test]
    fn admin_split_and_merge_pick_largest_and_smallest_segments() {
        let f = setup();
        let p = processor(&f, "P", fast_config().with_initial_segment_count(2));
        p.start().unwrap();
        assert!(wait_until(WAIT, || p.claimed_segments().len() == 2));

        assert!(p.split_largest_segment().unwrap());
        let masks: Vec<_> = p.claimed_segments().iter().map(|s| s.mask()).collect();
        assert_eq!(masks.iter().filter(|m| **m == 3).count(), 2);

        assert!(p.merge_smallest_segment().unwrap());
        assert!(p.claimed_segments().iter().all(|s| s.mask() == 1));

        p.shutdown().unwrap();
    }

    #[test]
    fn released_segment_is_reclaimed_after_the_cooldown() {
        let f = setup();
        let p = processor(&f, "P", fast_config().with_initial_segment_count(2));
        p.start().unwrap();
        assert!(wait_until(WAIT, || p.claimed_segments().len() == 2));

        assert!(p.release_segment(0, Duration::from_millis(200)).unwrap());
        assert!(p.claimed_segments().iter().all(|s| s.id() != 0));
        let seg0 = p.status().segments.into_iter().find(|s| s.segment == 0).unwrap();
        assert_eq!(seg0.owner, None);

        assert!(wait_until(WAIT, || p.claimed_segments().iter().any(|s| s.id() == 0)));
        p.shutdown().unwrap();
    }

    #[test]
    fn two_nodes_share_segments_and_process_every_event() {
        let f = setup();
        let config = fast_config()
            .with_initial_segment_count(2)
            .with_max_claimed_segments(1);
        let node_a = processor(&f, "P", config.clone());
        let node_b = processor(&f, "P", config);
        node_a.start().unwrap();
        node_b.start().unwrap();

        assert!(wait_until(WAIT, || {
            node_a.claimed_segments().len() == 1 && node_b.claimed_segments().len() == 1
        }));
        assert_ne!(node_a.claimed_segments(), node_b.claimed_segments());

        register_bikes(&f.log, 0..30);
        assert!(wait_until(WAIT, || f.projection.find_all().unwrap().len() == 30));

        let err = node_a.claim_segment(node_b.claimed_segments()[0].id()).unwrap_err();
        assert!(matches!(err, ProcessorError::ClaimConflict { .. }));

        node_a.shutdown().unwrap();
        node_b.shutdown().unwrap();
    }

    #[test]
    fn poison_event_is_dead_lettered_and_the_segment_moves_on() {
        let f = setup();
        let p = processor(&f, "P", fast_config());
        p.start().unwrap();

        f.log
            .append(vec![UncommittedEvent {
                event_id: Uuid::now_v7(),
                aggregate_id: "bike-x".to_string(),
                aggregate_type: BIKE_AGGREGATE.to_string(),
                event_type: RentalEvent::REGISTERED.to_string(),
                event_version: 1,
                occurred_at: Utc::now(),
                payload: json!({"not": "a rental event"}),
            }])
            .unwrap();
        register_bikes(&f.log, 0..1);

        assert!(wait_until(WAIT, || f.projection.find_one("bike-0").unwrap().is_some()));
        assert!(wait_until(WAIT, || caught_up(&p)));

        let letters = p.dead_letters().unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].handler, BikeStatusProjection::<Store>::NAME);
        assert_eq!(letters[0].event.global_position, 1);
        assert_eq!(letters[0].failure_count, 1);

        let err = p.retry_dead_letter(letters[0].id).unwrap_err();
        assert!(matches!(err, ProcessorError::HandlerApply { position: 1, .. }));
        assert_eq!(f.dead_letters.get(letters[0].id).unwrap().unwrap().failure_count, 2);

        p.evict_dead_letter(letters[0].id).unwrap();
        assert!(p.dead_letters().unwrap().is_empty());
        assert!(matches!(
            p.evict_dead_letter(letters[0].id),
            Err(ProcessorError::DeadLetterNotFound(_))
        ));

        p.shutdown().unwrap();
    }

    /// Fails until `healthy` is set; `fatal` selects a storage failure.
    struct Flaky {
        healthy: AtomicBool,
        fatal: bool,
        resettable: bool,
    }

    impl Flaky {
        fn new(fatal: bool, resettable: bool) -> Self {
            Self {
                healthy: AtomicBool::new(false),
                fatal,
                resettable,
            }
        }
    }

    impl Projection for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn event_types(&self) -> &[&'static str] {
            RentalEvent::ALL_TYPES
        }

        fn begin(&self) -> Box<dyn ProjectionBatch + '_> {
            Box::new(FlakyBatch(self))
        }

        fn supports_reset(&self) -> bool {
            self.resettable
        }
    }

    struct FlakyBatch<'a>(&'a Flaky);

    impl ProjectionBatch for FlakyBatch<'_> {
        fn apply(&mut self, _envelope: &EventEnvelope<JsonValue>, _status: ReplayStatus) -> Result<(), ProjectionError> {
            if self.0.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else if self.0.fatal {
                Err(ProjectionError::StorageUnavailable("database down".to_string()))
            } else {
                Err(ProjectionError::Apply("rejected".to_string()))
            }
        }

        fn commit(self: Box<Self>) -> Result<(), ProjectionError> {
            Ok(())
        }
    }

    /// Takes `delay` per staged event; remembers what was staged and committed.
    struct Slow {
        delay: Duration,
        staged: AtomicUsize,
        committed: Mutex<Vec<u64>>,
    }

    impl Slow {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                staged: AtomicUsize::new(0),
                committed: Mutex::new(Vec::new()),
            }
        }

        fn committed(&self) -> Vec<u64> {
            self.committed.lock().unwrap().clone()
        }
    }

    impl Projection for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn event_types(&self) -> &[&'static str] {
            RentalEvent::ALL_TYPES
        }

        fn begin(&self) -> Box<dyn ProjectionBatch + '_> {
            Box::new(SlowBatch {
                slow: self,
                positions: Vec::new(),
            })
        }
    }

    struct SlowBatch<'a> {
        slow: &'a Slow,
        positions: Vec<u64>,
    }

    impl ProjectionBatch for SlowBatch<'_> {
        fn apply(&mut self, envelope: &EventEnvelope<JsonValue>, _status: ReplayStatus) -> Result<(), ProjectionError> {
            thread::sleep(self.slow.delay);
            self.slow.staged.fetch_add(1, Ordering::SeqCst);
            self.positions.push(envelope.global_position());
            Ok(())
        }

        fn commit(self: Box<Self>) -> Result<(), ProjectionError> {
            let SlowBatch { slow, positions } = *self;
            slow.committed.lock().unwrap().extend(positions);
            Ok(())
        }
    }

    #[test]
    fn revoked_batch_commits_nothing_and_every_event_is_applied_once() {
        let f = setup();
        let slow = Arc::new(Slow::new(Duration::from_millis(40)));
        let p = EventProcessor::builder("P", f.log.clone(), f.coordinator.clone())
            .config(fast_config())
            .projection(slow.clone())
            .projection(f.projection.clone())
            .build();
        let all = f.projection.subscribe_all();

        // Appended up front so the first batch holds all five events.
        register_bikes(&f.log, 0..5);
        p.start().unwrap();

        assert!(wait_until(WAIT, || slow.staged.load(Ordering::SeqCst) >= 2));
        assert!(p.release_segment(0, Duration::from_millis(10)).unwrap());

        // The revoked worker stored no token and wrote nothing.
        assert_eq!(f.coordinator.status("P").unwrap()[0].token.position(), None);
        assert!(slow.committed().is_empty());
        assert!(f.projection.find_all().unwrap().is_empty());

        assert!(wait_until(WAIT, || caught_up(&p)));
        // Give the revoked worker time to reach its commit point.
        thread::sleep(Duration::from_millis(200));

        assert_eq!(slow.committed(), vec![1, 2, 3, 4, 5]);
        assert!(slow.staged.load(Ordering::SeqCst) > 5);
        assert_eq!(f.coordinator.status("P").unwrap()[0].token.position(), Some(5));
        assert_eq!(f.projection.find_all().unwrap().len(), 5);
        assert_eq!(all.drain().len(), 5);

        p.shutdown().unwrap();
    }

    #[test]
    fn split_during_a_slow_batch_never_commits_the_revoked_work() {
        let f = setup();
        let slow = Arc::new(Slow::new(Duration::from_millis(40)));
        let p = EventProcessor::builder("P", f.log.clone(), f.coordinator.clone())
            .config(fast_config().with_shutdown_timeout(Duration::from_millis(10)))
            .projection(slow.clone())
            .build();

        register_bikes(&f.log, 0..6);
        p.start().unwrap();

        assert!(wait_until(WAIT, || slow.staged.load(Ordering::SeqCst) >= 1));
        assert!(p.split_segment(0).unwrap());
        assert!(slow.committed().is_empty());

        assert!(wait_until(WAIT, || caught_up(&p)));
        thread::sleep(Duration::from_millis(300));

        let mut committed = slow.committed();
        committed.sort_unstable();
        assert_eq!(committed, vec![1, 2, 3, 4, 5, 6]);

        p.shutdown().unwrap();
    }

    #[test]
    fn dead_letter_retry_succeeds_once_the_handler_recovers() {
        let f = setup();
        let flaky = Arc::new(Flaky::new(false, true));
        let p = EventProcessor::builder("P", f.log.clone(), f.coordinator.clone())
            .config(fast_config())
            .projection(flaky.clone())
            .dead_letter_queue(f.dead_letters.clone())
            .build();
        p.start().unwrap();

        register_bikes(&f.log, 0..2);
        assert!(wait_until(WAIT, || caught_up(&p)));
        let letters = p.dead_letters().unwrap();
        assert_eq!(letters.len(), 2);

        flaky.healthy.store(true, Ordering::SeqCst);
        p.retry_dead_letter(letters[0].id).unwrap();
        assert_eq!(p.dead_letters().unwrap().len(), 1);

        p.shutdown().unwrap();
    }

    #[test]
    fn without_a_dead_letter_queue_failures_are_skipped() {
        let f = setup();
        let p = EventProcessor::builder("P", f.log.clone(), f.coordinator.clone())
            .config(fast_config())
            .projection(Arc::new(Flaky::new(false, true)))
            .projection(f.projection.clone())
            .build();
        p.start().unwrap();

        register_bikes(&f.log, 0..3);
        assert!(wait_until(WAIT, || caught_up(&p)));
        assert_eq!(f.projection.find_all().unwrap().len(), 3);
        assert!(matches!(p.dead_letters(), Err(ProcessorError::Validation(_))));

        p.shutdown().unwrap();
    }

    #[test]
    fn storage_failure_moves_processor_to_error_until_restarted() {
        let f = setup();
        let flaky = Arc::new(Flaky::new(true, true));
        let p = EventProcessor::builder("P", f.log.clone(), f.coordinator.clone())
            .config(fast_config())
            .projection(flaky.clone())
            .build();
        p.start().unwrap();

        register_bikes(&f.log, 0..1);
        assert!(wait_until(WAIT, || p.state() == ProcessorState::Error));
        let status = p.status();
        assert!(status.error);
        assert!(!status.running);
        assert!(status.last_error.is_some());

        flaky.healthy.store(true, Ordering::SeqCst);
        p.start().unwrap();
        assert!(wait_until(WAIT, || caught_up(&p)));
        assert!(!p.status().error);

        p.shutdown().unwrap();
    }

    #[test]
    fn non_resettable_processor_rejects_replay_without_pausing() {
        let f = setup();
        let p = Arc::new(
            EventProcessor::builder("P", f.log.clone(), f.coordinator.clone())
                .config(fast_config())
                .projection(f.projection.clone())
                .projection(Arc::new(Flaky::new(false, false)))
                .build(),
        );
        let registry = Arc::new(ProcessorRegistry::new().with(p.clone()).unwrap());
        let replay = ReplayController::new(registry.clone(), f.log.clone());
        p.start().unwrap();

        let err = replay.initiate_replay("P", None).unwrap_err();
        assert!(matches!(err, ProcessorError::ResetNotSupported(_)));
        assert_eq!(p.state(), ProcessorState::Running);
        assert!(!registry.list_status()[0].resettable);

        p.shutdown().unwrap();
    }

    #[test]
    fn reset_requires_a_paused_processor() {
        let f = setup();
        let p = processor(&f, "P", fast_config());
        p.start().unwrap();

        let err = p.reset_tokens(None).unwrap_err();
        assert!(matches!(
            err,
            ProcessorError::InvalidState { expected: ProcessorState::Paused, actual: ProcessorState::Running, .. }
        ));

        p.shutdown().unwrap();
    }

    #[test]
    fn resume_conflict_leaves_processor_paused() {
        let f = setup();
        let p = processor(&f, "P", fast_config().with_initial_segment_count(2));
        p.start().unwrap();
        assert!(wait_until(WAIT, || p.claimed_segments().len() == 2));

        p.pause().unwrap();
        assert_eq!(p.state(), ProcessorState::Paused);
        assert!(p.claimed_segments().is_empty());

        let intruder = WorkerId::new();
        f.coordinator.claim("P", 1, intruder).unwrap();

        let err = p.resume().unwrap_err();
        assert!(matches!(err, ProcessorError::ClaimConflict { segment: 1, .. }));
        assert_eq!(p.state(), ProcessorState::Paused);

        f.coordinator.release("P", 1, intruder).unwrap();
        p.resume().unwrap();
        assert_eq!(p.state(), ProcessorState::Running);
        assert_eq!(p.claimed_segments().len(), 2);

        p.shutdown().unwrap();
    }

    #[test]
    fn registry_reports_every_processor_and_unknown_names_fail() {
        let f = setup();
        let registry = ProcessorRegistry::new()
            .with(processor(&f, "bike-status", fast_config()))
            .unwrap()
            .with(processor(&f, "audit", fast_config()))
            .unwrap();

        let names: Vec<_> = registry.list_status().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["audit".to_string(), "bike-status".to_string()]);
        assert!(matches!(registry.get("nope"), Err(ProcessorError::UnknownProcessor(_))));
        assert!(registry.with(processor(&f, "audit", fast_config())).is_err());
    }
}

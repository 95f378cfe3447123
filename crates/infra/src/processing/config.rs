use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::segment::MAX_INITIAL_SEGMENTS;

/// Where a processor starts reading when its tokens are first created.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialPosition {
    /// From the first event in the log.
    #[default]
    Tail,
    /// From the current head: only events appended after initialization.
    Head,
}

/// Event processor configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Maximum events read per batch
    pub batch_size: usize,
    /// Segments created when the processor is first initialized
    pub initial_segment_count: u32,
    /// Size of the worker pool executing batches
    pub worker_threads: usize,
    /// Upper bound of segments this node claims
    pub max_claimed_segments: usize,
    /// Validity of a segment claim; extended while the segment is processed
    pub lease_duration: Duration,
    /// How often the supervisor claims, extends and schedules segments
    pub claim_interval: Duration,
    /// Attempts per handler before an event is dead-lettered
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    /// Bounded wait for in-flight batches on pause, shutdown, split and merge
    pub shutdown_timeout: Duration,
    pub initial_position: InitialPosition,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            initial_segment_count: 1,
            worker_threads: 4,
            max_claimed_segments: 16,
            lease_duration: Duration::from_secs(10),
            claim_interval: Duration::from_millis(50),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(10),
            shutdown_timeout: Duration::from_secs(10),
            initial_position: InitialPosition::Tail,
        }
    }
}

impl ProcessorConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_initial_segment_count(mut self, count: u32) -> Self {
        self.initial_segment_count = count.clamp(1, MAX_INITIAL_SEGMENTS);
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    pub fn with_max_claimed_segments(mut self, max: usize) -> Self {
        self.max_claimed_segments = max;
        self
    }

    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }

    pub fn with_claim_interval(mut self, interval: Duration) -> Self {
        self.claim_interval = interval;
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_backoff = backoff;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_initial_position(mut self, position: InitialPosition) -> Self {
        self.initial_position = position;
        self
    }
}

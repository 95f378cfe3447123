//! Segment-partitioned event processing.
//!
//! - `segment` / `token`: hash-space partitioning and per-segment positions
//! - `token_store` / `coordinator`: persisted tokens and leases, split/merge
//! - `processor` / `worker_pool` / `consumer`: the pooled streaming processor
//! - `replay`: pause → reset → resume
//! - `registry`: process-wide processor registry

pub mod config;
mod consumer;
pub mod coordinator;
pub mod error;
pub mod processor;
pub mod registry;
pub mod replay;
pub mod segment;
pub mod status;
pub mod token;
pub mod token_store;
mod work_package;
mod worker_pool;

pub use config::{InitialPosition, ProcessorConfig};
pub use coordinator::{ClaimedSegment, PendingMerge, PendingSplit, SegmentCoordinator};
pub use error::ProcessorError;
pub use processor::{EventProcessor, EventProcessorBuilder, PROCESSOR_TYPE};
pub use registry::ProcessorRegistry;
pub use replay::{ReplayController, ResetTarget};
pub use segment::{Segment, partition_hash};
pub use status::{ProcessorState, ProcessorStatus, SegmentStatus};
pub use token::{MergeProgress, TokenKind, TrackingToken};
pub use token_store::{InMemoryTokenStore, TokenEntry, TokenStoreError, TrackingTokenStore};

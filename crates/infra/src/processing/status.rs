use std::fmt;

use serde::{Deserialize, Serialize};

use pedalstream_core::WorkerId;

/// Lifecycle state of an event processor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorState {
    Running,
    Pausing,
    Paused,
    Resetting,
    Error,
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessorState::Running => "running",
            ProcessorState::Pausing => "pausing",
            ProcessorState::Paused => "paused",
            ProcessorState::Resetting => "resetting",
            ProcessorState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Snapshot of one segment of a processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentStatus {
    pub segment: u32,
    pub one_of: u64,
    pub token_type: String,
    pub current_index: Option<u64>,
    pub replaying: bool,
    /// Events between the head of the log and this segment's position.
    pub behind: u64,
    pub mergeable_segment: u32,
    pub split_segment: u32,
    pub owner: Option<WorkerId>,
    pub claimed_locally: bool,
}

/// Snapshot of an event processor, as reported by the control surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorStatus {
    pub name: String,
    pub token_store_identifier: String,
    pub state: ProcessorState,
    pub running: bool,
    pub error: bool,
    pub last_error: Option<String>,
    pub resettable: bool,
    pub active_threads: usize,
    pub available_threads: usize,
    pub batch_size: usize,
    pub processor_type: String,
    pub dead_letter_queue: bool,
    pub segments: Vec<SegmentStatus>,
}

//! Segments: disjoint slices of the partition-key hash space.
//!
//! A segment `{ id, mask }` owns every hash `h` with `h & mask == id`. The
//! root `{0, 0}` owns everything. Splitting doubles the mask and hands the
//! upper half to a new id; merging is the inverse. As long as segments are
//! only ever created by splitting the root and merging siblings, the set of
//! segments of a processor covers the hash space exactly once.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Largest usable mask: partition hashes are 31 bits wide.
pub const MAX_MASK: u32 = 0x7fff_ffff;

/// Upper bound on the number of segments a processor is initialized with.
pub const MAX_INITIAL_SEGMENTS: u32 = 1 << 16;

/// Hash a partition key into the 31-bit segment hash space.
pub fn partition_hash(key: &str) -> u32 {
    crc32fast::hash(key.as_bytes()) & MAX_MASK
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Segment {
    id: u32,
    mask: u32,
}

impl Segment {
    pub const ROOT: Segment = Segment { id: 0, mask: 0 };

    pub fn new(id: u32, mask: u32) -> Self {
        Self { id, mask }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    pub fn is_root(&self) -> bool {
        self.mask == 0
    }

    pub fn matches_hash(&self, hash: u32) -> bool {
        hash & self.mask == self.id
    }

    pub fn matches_key(&self, key: &str) -> bool {
        self.matches_hash(partition_hash(key))
    }

    /// Number of equally sized segments this one is "one of".
    pub fn one_of(&self) -> u64 {
        u64::from(self.mask) + 1
    }

    pub fn can_split(&self) -> bool {
        self.mask < MAX_MASK
    }

    /// Id the upper half receives when this segment is split.
    pub fn split_segment_id(&self) -> u32 {
        self.id + self.mask + 1
    }

    /// Id of the sibling this segment merges with (its own id for the root).
    pub fn mergeable_segment_id(&self) -> u32 {
        if self.is_root() {
            return self.id;
        }
        self.id ^ (self.mask ^ (self.mask >> 1))
    }

    pub fn split(&self) -> (Segment, Segment) {
        let mask = (self.mask << 1) | 1;
        (
            Segment::new(self.id, mask),
            Segment::new(self.split_segment_id(), mask),
        )
    }

    /// The segment resulting from merging with `other`, if they are siblings.
    pub fn merged_with(&self, other: &Segment) -> Option<Segment> {
        if self.is_root() || self.mask != other.mask || other.id != self.mergeable_segment_id() {
            return None;
        }
        Some(Segment::new(self.id.min(other.id), self.mask >> 1))
    }

    /// Initial segments for `count` workers: breadth-first splits of the root.
    pub fn initial(count: u32) -> Vec<Segment> {
        let mut segments = VecDeque::from([Segment::ROOT]);
        let count = count.clamp(1, MAX_INITIAL_SEGMENTS);
        while (segments.len() as u32) < count {
            let Some(next) = segments.pop_front() else {
                break;
            };
            if !next.can_split() {
                segments.push_front(next);
                break;
            }
            let (low, high) = next.split();
            segments.push_back(low);
            segments.push_back(high);
        }
        let mut segments: Vec<_> = segments.into();
        segments.sort_by_key(|s| s.id);
        segments
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Segment[{}/{}]", self.id, self.mask)
    }
}

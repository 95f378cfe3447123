//! Segment ↔ worker assignment for named processors.
//!
//! Every operation of one processor runs under that processor's ledger
//! mutex, so claims, splits, merges and resets of a processor are
//! linearizable while different processors never contend.
//!
//! Split and merge are two-phase: `begin_split`/`begin_merge` mark the
//! affected segments as pending (the caller then stops local work on them),
//! and the returned handle commits the change. A competing request on a
//! pending segment fails immediately.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use pedalstream_core::WorkerId;

use super::error::ProcessorError;
use super::segment::Segment;
use super::token::TrackingToken;
use super::token_store::{TokenEntry, TrackingTokenStore};

/// A segment whose lease is held by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedSegment {
    pub segment: Segment,
    pub token: TrackingToken,
    pub lease_expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Ledger {
    pending: HashSet<u32>,
}

pub struct SegmentCoordinator {
    store: Arc<dyn TrackingTokenStore>,
    lease_duration: chrono::Duration,
    ledgers: Mutex<HashMap<String, Arc<Mutex<Ledger>>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl SegmentCoordinator {
    pub fn new(store: Arc<dyn TrackingTokenStore>, lease_duration: Duration) -> Self {
        Self {
            store,
            lease_duration: chrono::Duration::from_std(lease_duration)
                .unwrap_or_else(|_| chrono::Duration::seconds(10)),
            ledgers: Mutex::new(HashMap::new()),
        }
    }

    pub fn storage_identifier(&self) -> &str {
        self.store.storage_identifier()
    }

    fn ledger(&self, processor: &str) -> Arc<Mutex<Ledger>> {
        lock(&self.ledgers)
            .entry(processor.to_string())
            .or_default()
            .clone()
    }

    fn lease_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.lease_duration
    }

    fn fetch(&self, processor: &str, segment_id: u32) -> Result<TokenEntry, ProcessorError> {
        self.store
            .fetch(processor, segment_id)?
            .ok_or_else(|| ProcessorError::UnknownSegment {
                processor: processor.to_string(),
                segment: segment_id,
            })
    }

    fn conflict(processor: &str, segment: u32, owner: Option<WorkerId>) -> ProcessorError {
        ProcessorError::ClaimConflict {
            processor: processor.to_string(),
            segment,
            owner,
        }
    }

    /// Fail unless `entry` is free, expired or already held by `owner`.
    fn ensure_claimable(
        processor: &str,
        entry: &TokenEntry,
        owner: WorkerId,
        now: DateTime<Utc>,
    ) -> Result<(), ProcessorError> {
        match entry.live_owner(now) {
            Some(current) if current != owner => {
                Err(Self::conflict(processor, entry.segment.id(), Some(current)))
            }
            _ => Ok(()),
        }
    }

    /// Create the initial segments of a processor unless it already has some.
    pub fn initialize(
        &self,
        processor: &str,
        segment_count: u32,
        initial: TrackingToken,
    ) -> Result<Vec<TokenEntry>, ProcessorError> {
        let ledger = self.ledger(processor);
        let _guard = lock(&ledger);

        let existing = self.store.segments(processor)?;
        if !existing.is_empty() {
            return Ok(existing);
        }

        let entries: Vec<_> = Segment::initial(segment_count)
            .into_iter()
            .map(|s| TokenEntry::unclaimed(s, initial.clone()))
            .collect();
        self.store.replace_segments(processor, &[], entries.clone())?;

        info!(processor, segments = entries.len(), "initialized tracking tokens");
        Ok(entries)
    }

    pub fn claim(
        &self,
        processor: &str,
        segment_id: u32,
        owner: WorkerId,
    ) -> Result<ClaimedSegment, ProcessorError> {
        let ledger = self.ledger(processor);
        let guard = lock(&ledger);

        if guard.pending.contains(&segment_id) {
            return Err(Self::conflict(processor, segment_id, None));
        }

        let now = Utc::now();
        let mut entry = self.fetch(processor, segment_id)?;
        Self::ensure_claimable(processor, &entry, owner, now)?;

        let lease_expires_at = self.lease_from(now);
        entry.owner = Some(owner);
        entry.lease_expires_at = Some(lease_expires_at);
        self.store.upsert(processor, entry.clone())?;

        debug!(processor, segment = segment_id, %owner, "segment claimed");
        Ok(ClaimedSegment {
            segment: entry.segment,
            token: entry.token,
            lease_expires_at,
        })
    }

    /// Renew the lease of a segment held by `owner`.
    pub fn extend_claim(
        &self,
        processor: &str,
        segment_id: u32,
        owner: WorkerId,
    ) -> Result<DateTime<Utc>, ProcessorError> {
        let ledger = self.ledger(processor);
        let _guard = lock(&ledger);

        let mut entry = self.fetch(processor, segment_id)?;
        if entry.owner != Some(owner) {
            return Err(Self::conflict(processor, segment_id, entry.owner));
        }

        let lease_expires_at = self.lease_from(Utc::now());
        entry.lease_expires_at = Some(lease_expires_at);
        self.store.upsert(processor, entry)?;
        Ok(lease_expires_at)
    }

    /// Persist a token, fenced by the lease: only the current owner may write.
    ///
    /// Storing also renews the lease.
    pub fn store_token(
        &self,
        processor: &str,
        segment_id: u32,
        owner: WorkerId,
        token: TrackingToken,
    ) -> Result<DateTime<Utc>, ProcessorError> {
        let ledger = self.ledger(processor);
        let _guard = lock(&ledger);

        let entry = self.owned(processor, segment_id, owner)?;
        self.write_token(processor, entry, token)
    }

    /// Commit a batch together with the token it advanced to.
    ///
    /// `commit` runs under the ledger lock once ownership is verified, so no
    /// claim, release, split or merge of the segment interleaves with it. The
    /// token is stored only when `commit` returns `Ok(true)`; `Ok(false)`
    /// abandons the batch and yields `Ok(None)`.
    pub fn commit_token<F>(
        &self,
        processor: &str,
        segment_id: u32,
        owner: WorkerId,
        token: TrackingToken,
        commit: F,
    ) -> Result<Option<DateTime<Utc>>, ProcessorError>
    where
        F: FnOnce() -> Result<bool, ProcessorError>,
    {
        let ledger = self.ledger(processor);
        let _guard = lock(&ledger);

        let entry = self.owned(processor, segment_id, owner)?;
        if !commit()? {
            return Ok(None);
        }
        self.write_token(processor, entry, token).map(Some)
    }

    fn owned(&self, processor: &str, segment_id: u32, owner: WorkerId) -> Result<TokenEntry, ProcessorError> {
        let entry = self.fetch(processor, segment_id)?;
        if entry.owner != Some(owner) {
            return Err(Self::conflict(processor, segment_id, entry.owner));
        }
        Ok(entry)
    }

    fn write_token(
        &self,
        processor: &str,
        mut entry: TokenEntry,
        token: TrackingToken,
    ) -> Result<DateTime<Utc>, ProcessorError> {
        let lease_expires_at = self.lease_from(Utc::now());
        entry.token = token;
        entry.lease_expires_at = Some(lease_expires_at);
        self.store.upsert(processor, entry)?;
        Ok(lease_expires_at)
    }

    /// Give up a lease. Returns `false` when `owner` did not hold it.
    pub fn release(&self, processor: &str, segment_id: u32, owner: WorkerId) -> Result<bool, ProcessorError> {
        let ledger = self.ledger(processor);
        let _guard = lock(&ledger);

        let Some(mut entry) = self.store.fetch(processor, segment_id)? else {
            return Ok(false);
        };
        if entry.owner != Some(owner) {
            return Ok(false);
        }

        entry.owner = None;
        entry.lease_expires_at = None;
        self.store.upsert(processor, entry)?;
        debug!(processor, segment = segment_id, %owner, "segment released");
        Ok(true)
    }

    /// Claim every segment of a processor, or none of them.
    pub fn claim_all(&self, processor: &str, owner: WorkerId) -> Result<Vec<ClaimedSegment>, ProcessorError> {
        let ledger = self.ledger(processor);
        let guard = lock(&ledger);

        let now = Utc::now();
        let entries = self.store.segments(processor)?;
        for entry in &entries {
            if guard.pending.contains(&entry.segment.id()) {
                return Err(Self::conflict(processor, entry.segment.id(), None));
            }
            Self::ensure_claimable(processor, entry, owner, now)?;
        }

        let lease_expires_at = self.lease_from(now);
        let claimed: Vec<_> = entries
            .into_iter()
            .map(|mut e| {
                e.owner = Some(owner);
                e.lease_expires_at = Some(lease_expires_at);
                e
            })
            .collect();
        let ids: Vec<_> = claimed.iter().map(|e| e.segment.id()).collect();
        self.store.replace_segments(processor, &ids, claimed.clone())?;

        Ok(claimed
            .into_iter()
            .map(|e| ClaimedSegment {
                segment: e.segment,
                token: e.token,
                lease_expires_at,
            })
            .collect())
    }

    pub fn release_all(&self, processor: &str, owner: WorkerId) -> Result<usize, ProcessorError> {
        let ledger = self.ledger(processor);
        let _guard = lock(&ledger);

        let released: Vec<_> = self
            .store
            .segments(processor)?
            .into_iter()
            .filter(|e| e.owner == Some(owner))
            .map(|mut e| {
                e.owner = None;
                e.lease_expires_at = None;
                e
            })
            .collect();
        let ids: Vec<_> = released.iter().map(|e| e.segment.id()).collect();
        let count = released.len();
        self.store.replace_segments(processor, &ids, released)?;
        Ok(count)
    }

    /// Rewrite every token of a processor to `position`.
    ///
    /// Fails with `ClaimConflict` (and changes nothing) if another worker
    /// holds a live lease on any segment.
    pub fn reset_tokens(
        &self,
        processor: &str,
        owner: WorkerId,
        position: Option<u64>,
    ) -> Result<(), ProcessorError> {
        let ledger = self.ledger(processor);
        let guard = lock(&ledger);

        let now = Utc::now();
        let entries = self.store.segments(processor)?;
        for entry in &entries {
            if guard.pending.contains(&entry.segment.id()) {
                return Err(Self::conflict(processor, entry.segment.id(), None));
            }
            Self::ensure_claimable(processor, entry, owner, now)?;
        }

        let reset: Vec<_> = entries
            .into_iter()
            .map(|mut e| {
                e.token = e.token.reset_to(position);
                e
            })
            .collect();
        let ids: Vec<_> = reset.iter().map(|e| e.segment.id()).collect();
        self.store.replace_segments(processor, &ids, reset)?;

        info!(processor, ?position, "tracking tokens reset");
        Ok(())
    }

    /// Segments nobody holds a live lease on.
    pub fn unclaimed(&self, processor: &str) -> Result<Vec<TokenEntry>, ProcessorError> {
        let now = Utc::now();
        Ok(self
            .store
            .segments(processor)?
            .into_iter()
            .filter(|e| e.live_owner(now).is_none())
            .collect())
    }

    pub fn status(&self, processor: &str) -> Result<Vec<TokenEntry>, ProcessorError> {
        Ok(self.store.segments(processor)?)
    }

    pub fn is_pending(&self, processor: &str, segment_id: u32) -> bool {
        lock(&self.ledger(processor)).pending.contains(&segment_id)
    }

    /// Split a segment held by `owner` in one step.
    pub fn split(
        &self,
        processor: &str,
        segment_id: u32,
        owner: WorkerId,
    ) -> Result<(Segment, Segment), ProcessorError> {
        self.begin_split(processor, segment_id)?.commit(owner)
    }

    /// Merge a segment with its sibling in one step.
    pub fn merge(&self, processor: &str, segment_id: u32, owner: WorkerId) -> Result<Segment, ProcessorError> {
        self.begin_merge(processor, segment_id)?.commit(owner)
    }

    /// Register a pending split of `segment_id`.
    pub fn begin_split(&self, processor: &str, segment_id: u32) -> Result<PendingSplit<'_>, ProcessorError> {
        let ledger = self.ledger(processor);
        let mut guard = lock(&ledger);

        let entry = self.fetch(processor, segment_id)?;
        if !entry.segment.can_split() {
            return Err(ProcessorError::Validation(format!(
                "{} cannot be split any further",
                entry.segment
            )));
        }
        if guard.pending.contains(&segment_id) {
            return Err(Self::conflict(processor, segment_id, None));
        }
        guard.pending.insert(segment_id);

        Ok(PendingSplit {
            pending: PendingGuard {
                coordinator: self,
                processor: processor.to_string(),
                segments: vec![segment_id],
            },
            segment: entry.segment,
        })
    }

    /// Register a pending merge of `segment_id` with its sibling.
    pub fn begin_merge(&self, processor: &str, segment_id: u32) -> Result<PendingMerge<'_>, ProcessorError> {
        let ledger = self.ledger(processor);
        let mut guard = lock(&ledger);

        let entry = self.fetch(processor, segment_id)?;
        let invalid = |reason: String| ProcessorError::InvalidMerge {
            processor: processor.to_string(),
            segment: segment_id,
            reason,
        };

        if entry.segment.is_root() {
            return Ok(PendingMerge {
                pending: PendingGuard {
                    coordinator: self,
                    processor: processor.to_string(),
                    segments: vec![],
                },
                segment: entry.segment,
                sibling: None,
            });
        }

        let sibling_id = entry.segment.mergeable_segment_id();
        let sibling = self
            .store
            .fetch(processor, sibling_id)?
            .filter(|s| s.segment.mask() == entry.segment.mask())
            .ok_or_else(|| invalid(format!("sibling segment {sibling_id} has been split further")))?;

        if guard.pending.contains(&segment_id) || guard.pending.contains(&sibling_id) {
            return Err(invalid("a split or merge is already pending".to_string()));
        }
        guard.pending.insert(segment_id);
        guard.pending.insert(sibling_id);

        Ok(PendingMerge {
            pending: PendingGuard {
                coordinator: self,
                processor: processor.to_string(),
                segments: vec![segment_id, sibling_id],
            },
            segment: entry.segment,
            sibling: Some(sibling.segment),
        })
    }
}

impl core::fmt::Debug for SegmentCoordinator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SegmentCoordinator")
            .field("store", &self.store.storage_identifier())
            .field("lease_duration", &self.lease_duration)
            .finish()
    }
}

/// Clears pending markers when a split/merge completes or is abandoned.
struct PendingGuard<'a> {
    coordinator: &'a SegmentCoordinator,
    processor: String,
    segments: Vec<u32>,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let ledger = self.coordinator.ledger(&self.processor);
        let mut guard = lock(&ledger);
        for id in &self.segments {
            guard.pending.remove(id);
        }
    }
}

/// A registered split, committed with `commit`.
pub struct PendingSplit<'a> {
    pending: PendingGuard<'a>,
    segment: Segment,
}

impl PendingSplit<'_> {
    pub fn segment(&self) -> Segment {
        self.segment
    }

    /// Replace the segment by its two halves, both claimed by `owner`.
    pub fn commit(self, owner: WorkerId) -> Result<(Segment, Segment), ProcessorError> {
        let coordinator = self.pending.coordinator;
        let processor = self.pending.processor.as_str();
        let ledger = coordinator.ledger(processor);
        let _guard = lock(&ledger);

        let now = Utc::now();
        let entry = coordinator.fetch(processor, self.segment.id())?;
        if entry.segment != self.segment || entry.live_owner(now) != Some(owner) {
            return Err(SegmentCoordinator::conflict(
                processor,
                self.segment.id(),
                entry.live_owner(now),
            ));
        }

        let (low, high) = entry.segment.split();
        let (low_token, high_token) = entry.token.split(entry.segment);
        let lease_expires_at = Some(coordinator.lease_from(now));
        let halves = vec![
            TokenEntry {
                segment: low,
                token: low_token,
                owner: Some(owner),
                lease_expires_at,
            },
            TokenEntry {
                segment: high,
                token: high_token,
                owner: Some(owner),
                lease_expires_at,
            },
        ];
        coordinator
            .store
            .replace_segments(processor, &[entry.segment.id()], halves)?;

        info!(processor, segment = %entry.segment, low = %low, high = %high, "segment split");
        Ok((low, high))
    }
}

/// A registered merge, committed with `commit`.
pub struct PendingMerge<'a> {
    pending: PendingGuard<'a>,
    segment: Segment,
    sibling: Option<Segment>,
}

impl PendingMerge<'_> {
    /// Segment ids that must stop processing before the commit.
    pub fn segment_ids(&self) -> &[u32] {
        &self.pending.segments
    }

    pub fn is_noop(&self) -> bool {
        self.sibling.is_none()
    }

    /// Replace the two siblings by their parent, claimed by `owner`.
    pub fn commit(self, owner: WorkerId) -> Result<Segment, ProcessorError> {
        let Some(sibling) = self.sibling else {
            return Ok(self.segment);
        };

        let coordinator = self.pending.coordinator;
        let processor = self.pending.processor.as_str();
        let ledger = coordinator.ledger(processor);
        let _guard = lock(&ledger);

        let invalid = |reason: String| ProcessorError::InvalidMerge {
            processor: processor.to_string(),
            segment: self.segment.id(),
            reason,
        };

        let now = Utc::now();
        let this = coordinator.fetch(processor, self.segment.id())?;
        let other = coordinator
            .store
            .fetch(processor, sibling.id())?
            .filter(|e| e.segment == sibling)
            .ok_or_else(|| invalid(format!("sibling segment {} is gone", sibling.id())))?;
        if this.segment != self.segment {
            return Err(invalid("segment changed while the merge was pending".to_string()));
        }

        SegmentCoordinator::ensure_claimable(processor, &this, owner, now)?;
        SegmentCoordinator::ensure_claimable(processor, &other, owner, now)?;

        for entry in [&this, &other] {
            if entry.token.merge_progress().is_some() {
                return Err(invalid(format!(
                    "segment {} is still catching up with a previous merge",
                    entry.segment.id()
                )));
            }
        }

        let merged = this
            .segment
            .merged_with(&other.segment)
            .ok_or_else(|| invalid("segments are not siblings".to_string()))?;
        let token = TrackingToken::merged(this.segment, &this.token, other.segment, &other.token);

        coordinator.store.replace_segments(
            processor,
            &[this.segment.id(), other.segment.id()],
            vec![TokenEntry {
                segment: merged,
                token,
                owner: Some(owner),
                lease_expires_at: Some(coordinator.lease_from(now)),
            }],
        )?;

        info!(processor, merged = %merged, "segments merged");
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::token_store::InMemoryTokenStore;
    use std::sync::Barrier;
    use std::thread;

    fn coordinator() -> SegmentCoordinator {
        SegmentCoordinator::new(Arc::new(InMemoryTokenStore::new()), Duration::from_secs(30))
    }

    #[test]
    fn initialize_is_idempotent() {
        let c = coordinator();
        assert_eq!(c.initialize("p", 2, TrackingToken::tail()).unwrap().len(), 2);
        assert_eq!(c.initialize("p", 8, TrackingToken::tail()).unwrap().len(), 2);
    }

    #[test]
    fn claim_conflicts_with_live_owner_only() {
        let c = coordinator();
        c.initialize("p", 1, TrackingToken::tail()).unwrap();
        let (a, b) = (WorkerId::new(), WorkerId::new());

        c.claim("p", 0, a).unwrap();
        c.claim("p", 0, a).unwrap();
        let err = c.claim("p", 0, b).unwrap_err();
        assert!(matches!(err, ProcessorError::ClaimConflict { owner: Some(o), .. } if o == a));

        assert!(c.release("p", 0, a).unwrap());
        c.claim("p", 0, b).unwrap();
    }

    #[test]
    fn expired_lease_can_be_taken_over() {
        let c = SegmentCoordinator::new(Arc::new(InMemoryTokenStore::new()), Duration::from_millis(5));
        c.initialize("p", 1, TrackingToken::tail()).unwrap();
        let (a, b) = (WorkerId::new(), WorkerId::new());

        c.claim("p", 0, a).unwrap();
        thread::sleep(Duration::from_millis(20));
        c.claim("p", 0, b).unwrap();

        let err = c.store_token("p", 0, a, TrackingToken::at(1)).unwrap_err();
        assert!(matches!(err, ProcessorError::ClaimConflict { .. }));
    }

    #[test]
    fn commit_token_stores_only_after_the_commit_succeeds() {
        let c = coordinator();
        c.initialize("p", 1, TrackingToken::tail()).unwrap();
        let owner = WorkerId::new();
        c.claim("p", 0, owner).unwrap();

        let declined = c.commit_token("p", 0, owner, TrackingToken::at(3), || Ok(false)).unwrap();
        assert!(declined.is_none());
        assert_eq!(c.status("p").unwrap()[0].token.position(), None);

        let failed = c.commit_token("p", 0, owner, TrackingToken::at(3), || {
            Err(ProcessorError::StorageUnavailable("down".to_string()))
        });
        assert!(matches!(failed, Err(ProcessorError::StorageUnavailable(_))));
        assert_eq!(c.status("p").unwrap()[0].token.position(), None);

        let stored = c.commit_token("p", 0, owner, TrackingToken::at(3), || Ok(true)).unwrap();
        assert!(stored.is_some());
        assert_eq!(c.status("p").unwrap()[0].token.position(), Some(3));
    }

    #[test]
    fn commit_token_by_a_former_owner_never_runs_the_commit() {
        let c = coordinator();
        c.initialize("p", 1, TrackingToken::tail()).unwrap();
        let (a, b) = (WorkerId::new(), WorkerId::new());
        c.claim("p", 0, a).unwrap();
        assert!(c.release("p", 0, a).unwrap());
        c.claim("p", 0, b).unwrap();

        let mut ran = false;
        let err = c
            .commit_token("p", 0, a, TrackingToken::at(1), || {
                ran = true;
                Ok(true)
            })
            .unwrap_err();

        assert!(matches!(err, ProcessorError::ClaimConflict { owner: Some(o), .. } if o == b));
        assert!(!ran);
        assert_eq!(c.status("p").unwrap()[0].token.position(), None);
    }

    #[test]
    fn concurrent_claims_have_exactly_one_winner() {
        let c = Arc::new(coordinator());
        c.initialize("p", 1, TrackingToken::tail()).unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let c = c.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    c.claim("p", 0, WorkerId::new())
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(ProcessorError::ClaimConflict { .. }))));
    }

    #[test]
    fn split_then_merge_restores_one_segment_at_max_position() {
        let c = coordinator();
        let owner = WorkerId::new();
        c.initialize("p", 1, TrackingToken::at(4)).unwrap();
        c.claim("p", 0, owner).unwrap();

        let (low, high) = c.split("p", 0, owner).unwrap();
        assert_eq!((low, high), Segment::ROOT.split());
        c.store_token("p", low.id(), owner, TrackingToken::at(7)).unwrap();
        c.store_token("p", high.id(), owner, TrackingToken::at(9)).unwrap();

        let merged = c.merge("p", high.id(), owner).unwrap();
        assert_eq!(merged, Segment::ROOT);

        let status = c.status("p").unwrap();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].token.position(), Some(7));
        assert_eq!(status[0].token.reported_position(), Some(9));
    }

    #[test]
    fn split_requires_the_live_owner() {
        let c = coordinator();
        c.initialize("p", 1, TrackingToken::tail()).unwrap();
        c.claim("p", 0, WorkerId::new()).unwrap();

        let err = c.split("p", 0, WorkerId::new()).unwrap_err();
        assert!(matches!(err, ProcessorError::ClaimConflict { .. }));
        assert_eq!(c.status("p").unwrap().len(), 1);
    }

    #[test]
    fn competing_changes_on_a_pending_segment_are_rejected() {
        let c = coordinator();
        let owner = WorkerId::new();
        c.initialize("p", 2, TrackingToken::tail()).unwrap();

        let pending = c.begin_split("p", 0).unwrap();
        assert!(matches!(c.begin_split("p", 0), Err(ProcessorError::ClaimConflict { owner: None, .. })));
        assert!(matches!(c.begin_merge("p", 1), Err(ProcessorError::InvalidMerge { .. })));
        assert!(matches!(c.claim("p", 0, owner), Err(ProcessorError::ClaimConflict { .. })));

        drop(pending);
        assert!(!c.is_pending("p", 0));
        c.claim("p", 0, owner).unwrap();
    }

    #[test]
    fn merge_requires_a_sibling_with_the_same_mask() {
        let c = coordinator();
        let owner = WorkerId::new();
        c.initialize("p", 3, TrackingToken::tail()).unwrap();

        // Segments are 0/3, 1/1, 2/3: the sibling of 1/1 (0/1) was split further.
        let err = c.merge("p", 1, owner).unwrap_err();
        assert!(matches!(err, ProcessorError::InvalidMerge { .. }));

        let merged = c.merge("p", 2, owner).unwrap();
        assert_eq!(merged, Segment::new(0, 1));
    }

    #[test]
    fn merge_conflicts_with_sibling_held_by_another_worker() {
        let c = coordinator();
        c.initialize("p", 2, TrackingToken::tail()).unwrap();
        c.claim("p", 1, WorkerId::new()).unwrap();

        let err = c.merge("p", 0, WorkerId::new()).unwrap_err();
        assert!(matches!(err, ProcessorError::ClaimConflict { segment: 1, .. }));
        assert_eq!(c.status("p").unwrap().len(), 2);
    }

    #[test]
    fn merging_the_root_is_a_noop() {
        let c = coordinator();
        c.initialize("p", 1, TrackingToken::tail()).unwrap();
        assert_eq!(c.merge("p", 0, WorkerId::new()).unwrap(), Segment::ROOT);
        assert_eq!(c.status("p").unwrap().len(), 1);
    }

    #[test]
    fn claim_all_is_all_or_nothing() {
        let c = coordinator();
        let (a, b) = (WorkerId::new(), WorkerId::new());
        c.initialize("p", 2, TrackingToken::tail()).unwrap();
        c.claim("p", 1, b).unwrap();

        assert!(matches!(c.claim_all("p", a), Err(ProcessorError::ClaimConflict { .. })));
        assert_eq!(c.status("p").unwrap()[0].owner, None);

        c.release_all("p", b).unwrap();
        assert_eq!(c.claim_all("p", a).unwrap().len(), 2);
        assert!(c.unclaimed("p").unwrap().is_empty());
    }

    #[test]
    fn reset_rewrites_every_token_unless_another_worker_holds_a_lease() {
        let c = coordinator();
        let (a, b) = (WorkerId::new(), WorkerId::new());
        c.initialize("p", 2, TrackingToken::at(10)).unwrap();

        c.claim("p", 0, b).unwrap();
        assert!(matches!(c.reset_tokens("p", a, None), Err(ProcessorError::ClaimConflict { .. })));
        c.release("p", 0, b).unwrap();

        c.reset_tokens("p", a, Some(3)).unwrap();
        for entry in c.status("p").unwrap() {
            assert_eq!(entry.token.position(), Some(3));
            assert_eq!(entry.token.replay_until(), Some(10));
        }
    }
}

//! Tracking token persistence.
//!
//! One entry per (processor, segment): the token plus the current claim.
//! The store is the only state shared between workers; the coordinator is
//! responsible for fencing writes by lease owner.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use pedalstream_core::WorkerId;

use super::segment::Segment;
use super::token::TrackingToken;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEntry {
    pub segment: Segment,
    pub token: TrackingToken,
    pub owner: Option<WorkerId>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl TokenEntry {
    pub fn unclaimed(segment: Segment, token: TrackingToken) -> Self {
        Self {
            segment,
            token,
            owner: None,
            lease_expires_at: None,
        }
    }

    /// Owner whose lease is still valid at `now`.
    pub fn live_owner(&self, now: DateTime<Utc>) -> Option<WorkerId> {
        match (self.owner, self.lease_expires_at) {
            (Some(owner), Some(expires)) if expires > now => Some(owner),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum TokenStoreError {
    #[error("token store unavailable: {0}")]
    Unavailable(String),
}

/// Token store for persisting segment positions and claims.
pub trait TrackingTokenStore: Send + Sync {
    /// Identifier reported in processor status (which store backs the tokens).
    fn storage_identifier(&self) -> &str;

    /// Every segment of a processor, ordered by segment id.
    fn segments(&self, processor: &str) -> Result<Vec<TokenEntry>, TokenStoreError>;

    fn fetch(&self, processor: &str, segment_id: u32) -> Result<Option<TokenEntry>, TokenStoreError>;

    fn upsert(&self, processor: &str, entry: TokenEntry) -> Result<(), TokenStoreError>;

    /// Atomically remove `removed` and insert `added` (split, merge, reset).
    fn replace_segments(
        &self,
        processor: &str,
        removed: &[u32],
        added: Vec<TokenEntry>,
    ) -> Result<(), TokenStoreError>;
}

impl<S> TrackingTokenStore for Arc<S>
where
    S: TrackingTokenStore + ?Sized,
{
    fn storage_identifier(&self) -> &str {
        (**self).storage_identifier()
    }

    fn segments(&self, processor: &str) -> Result<Vec<TokenEntry>, TokenStoreError> {
        (**self).segments(processor)
    }

    fn fetch(&self, processor: &str, segment_id: u32) -> Result<Option<TokenEntry>, TokenStoreError> {
        (**self).fetch(processor, segment_id)
    }

    fn upsert(&self, processor: &str, entry: TokenEntry) -> Result<(), TokenStoreError> {
        (**self).upsert(processor, entry)
    }

    fn replace_segments(
        &self,
        processor: &str,
        removed: &[u32],
        added: Vec<TokenEntry>,
    ) -> Result<(), TokenStoreError> {
        (**self).replace_segments(processor, removed, added)
    }
}

/// In-memory token store for tests/dev.
#[derive(Debug)]
pub struct InMemoryTokenStore {
    identifier: String,
    inner: RwLock<HashMap<String, BTreeMap<u32, TokenEntry>>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::with_identifier(format!("in-memory-{}", uuid::Uuid::now_v7()))
    }

    pub fn with_identifier(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> TokenStoreError {
    TokenStoreError::Unavailable("lock poisoned".to_string())
}

impl TrackingTokenStore for InMemoryTokenStore {
    fn storage_identifier(&self) -> &str {
        &self.identifier
    }

    fn segments(&self, processor: &str) -> Result<Vec<TokenEntry>, TokenStoreError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map
            .get(processor)
            .map(|segments| segments.values().cloned().collect())
            .unwrap_or_default())
    }

    fn fetch(&self, processor: &str, segment_id: u32) -> Result<Option<TokenEntry>, TokenStoreError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.get(processor).and_then(|s| s.get(&segment_id)).cloned())
    }

    fn upsert(&self, processor: &str, entry: TokenEntry) -> Result<(), TokenStoreError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.entry(processor.to_string())
            .or_default()
            .insert(entry.segment.id(), entry);
        Ok(())
    }

    fn replace_segments(
        &self,
        processor: &str,
        removed: &[u32],
        added: Vec<TokenEntry>,
    ) -> Result<(), TokenStoreError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        let segments = map.entry(processor.to_string()).or_default();
        for id in removed {
            segments.remove(id);
        }
        for entry in added {
            segments.insert(entry.segment.id(), entry);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn entries_are_scoped_per_processor_and_ordered() {
        let store = InMemoryTokenStore::with_identifier("test");
        let (low, high) = Segment::ROOT.split();
        store.upsert("a", TokenEntry::unclaimed(high, TrackingToken::at(2))).unwrap();
        store.upsert("a", TokenEntry::unclaimed(low, TrackingToken::tail())).unwrap();

        let ids: Vec<_> = store.segments("a").unwrap().iter().map(|e| e.segment.id()).collect();
        assert_eq!(ids, vec![0, 1]);
        assert!(store.segments("b").unwrap().is_empty());
        assert_eq!(store.storage_identifier(), "test");
    }

    #[test]
    fn replace_segments_swaps_entries() {
        let store = InMemoryTokenStore::new();
        store.upsert("a", TokenEntry::unclaimed(Segment::ROOT, TrackingToken::at(5))).unwrap();

        let (low, high) = Segment::ROOT.split();
        store
            .replace_segments(
                "a",
                &[0],
                vec![
                    TokenEntry::unclaimed(low, TrackingToken::at(5)),
                    TokenEntry::unclaimed(high, TrackingToken::at(5)),
                ],
            )
            .unwrap();

        let segments: Vec<_> = store.segments("a").unwrap().iter().map(|e| e.segment).collect();
        assert_eq!(segments, vec![low, high]);
    }

    #[test]
    fn expired_lease_has_no_live_owner() {
        let now = Utc::now();
        let mut entry = TokenEntry::unclaimed(Segment::ROOT, TrackingToken::tail());
        entry.owner = Some(WorkerId::new());
        entry.lease_expires_at = Some(now - Duration::seconds(1));
        assert_eq!(entry.live_owner(now), None);

        entry.lease_expires_at = Some(now + Duration::seconds(1));
        assert_eq!(entry.live_owner(now), entry.owner);
    }
}

//! Tracking tokens: how far a segment has consumed the event log.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use pedalstream_events::ReplayStatus;

use super::segment::Segment;

/// Progress of one half of a merged segment that was ahead of the other.
///
/// Events of `ahead` at or below `ahead_position` were already applied
/// before the merge and are skipped while the merged token catches up.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeProgress {
    pub ahead: Segment,
    pub ahead_position: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    NotSet,
    GlobalSequence,
    Replay,
    Merged,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::NotSet => "NotSet",
            TokenKind::GlobalSequence => "GlobalSequenceTrackingToken",
            TokenKind::Replay => "ReplayToken",
            TokenKind::Merged => "MergedTrackingToken",
        }
    }
}

/// Position of a segment in the log.
///
/// - `position`: global position of the last consumed event (`None` = tail)
/// - `replay_until`: high-water mark before the last reset; events at or
///   below it are delivered as replays
/// - `merge`: catch-up state after a merge of two segments at different positions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingToken {
    position: Option<u64>,
    replay_until: Option<u64>,
    merge: Option<MergeProgress>,
}

impl TrackingToken {
    /// Token before the first event.
    pub fn tail() -> Self {
        Self::default()
    }

    pub fn at(position: u64) -> Self {
        Self {
            position: Some(position),
            ..Self::default()
        }
    }

    pub fn at_position(position: Option<u64>) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    /// Position reading resumes after.
    pub fn position(&self) -> Option<u64> {
        self.position
    }

    pub fn replay_until(&self) -> Option<u64> {
        self.replay_until
    }

    pub fn merge_progress(&self) -> Option<&MergeProgress> {
        self.merge.as_ref()
    }

    /// Furthest position this token is known to cover.
    pub fn reported_position(&self) -> Option<u64> {
        match (self.position, self.merge) {
            (p, Some(m)) => Some(p.unwrap_or(0).max(m.ahead_position)),
            (p, None) => p,
        }
    }

    pub fn kind(&self) -> TokenKind {
        if self.merge.is_some() {
            TokenKind::Merged
        } else if self.replay_until.is_some() {
            TokenKind::Replay
        } else if self.position.is_some() {
            TokenKind::GlobalSequence
        } else {
            TokenKind::NotSet
        }
    }

    pub fn is_replaying(&self) -> bool {
        self.replay_until.is_some()
    }

    /// Compare by reported position (tail sorts first).
    pub fn cmp_progress(&self, other: &TrackingToken) -> Ordering {
        self.reported_position().cmp(&other.reported_position())
    }

    pub fn replay_status_for(&self, position: u64) -> ReplayStatus {
        match self.replay_until {
            Some(until) if position <= until => ReplayStatus::Replay,
            _ => ReplayStatus::Regular,
        }
    }

    /// Whether an event was already applied by the ahead half of a merge.
    pub fn already_applied(&self, hash: u32, position: u64) -> bool {
        self.merge
            .is_some_and(|m| position <= m.ahead_position && m.ahead.matches_hash(hash))
    }

    /// Token after consuming everything up to `position`.
    pub fn advanced_to(&self, position: u64) -> Self {
        Self {
            position: Some(position),
            replay_until: self.replay_until.filter(|until| position < *until),
            merge: self.merge.filter(|m| position < m.ahead_position),
        }
    }

    /// Token rewound (or forwarded) to `target`.
    ///
    /// When the target lies before what was already consumed, everything up
    /// to the previous high-water mark is flagged as replay.
    pub fn reset_to(&self, target: Option<u64>) -> Self {
        let high_water = self.reported_position().max(self.replay_until);
        let replay_until = match high_water {
            Some(hw) if target.is_none_or(|t| t < hw) => Some(hw),
            _ => None,
        };
        Self {
            position: target,
            replay_until,
            merge: None,
        }
    }

    /// Tokens for the two halves of `segment` after a split.
    pub fn split(&self, segment: Segment) -> (TrackingToken, TrackingToken) {
        let (low, high) = segment.split();
        (self.for_half(low), self.for_half(high))
    }

    fn for_half(&self, half: Segment) -> TrackingToken {
        match self.merge {
            Some(m) if m.ahead == half => Self {
                position: Some(m.ahead_position),
                replay_until: self.replay_until.filter(|u| m.ahead_position < *u),
                merge: None,
            },
            Some(m) if m.ahead.merged_with(&half).is_some() => Self {
                merge: None,
                ..self.clone()
            },
            _ => self.clone(),
        }
    }

    /// Token of the segment merged from `a` (owning `a_segment`) and `b`.
    ///
    /// The merged token reads from the lower position; the half that was
    /// ahead is recorded so none of its events is applied twice.
    pub fn merged(
        a_segment: Segment,
        a: &TrackingToken,
        b_segment: Segment,
        b: &TrackingToken,
    ) -> TrackingToken {
        let replay_until = a.replay_until.max(b.replay_until);
        let (behind, ahead, ahead_segment) = match a.position.cmp(&b.position) {
            Ordering::Equal => {
                return Self {
                    position: a.position,
                    replay_until,
                    merge: None,
                };
            }
            Ordering::Less => (a, b, b_segment),
            Ordering::Greater => (b, a, a_segment),
        };

        Self {
            position: behind.position,
            replay_until,
            merge: ahead.position.map(|p| MergeProgress {
                ahead: ahead_segment,
                ahead_position: p,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_token_shape() {
        assert_eq!(TrackingToken::tail().kind(), TokenKind::NotSet);
        assert_eq!(TrackingToken::at(3).kind(), TokenKind::GlobalSequence);
        assert_eq!(TrackingToken::at(3).reset_to(None).kind(), TokenKind::Replay);
    }

    #[test]
    fn reset_flags_replay_until_previous_position() {
        let token = TrackingToken::at(10).reset_to(Some(4));
        assert_eq!(token.position(), Some(4));
        assert_eq!(token.replay_until(), Some(10));
        assert_eq!(token.replay_status_for(5), ReplayStatus::Replay);
        assert_eq!(token.replay_status_for(10), ReplayStatus::Replay);
        assert_eq!(token.replay_status_for(11), ReplayStatus::Regular);

        let caught_up = token.advanced_to(10);
        assert!(!caught_up.is_replaying());
        assert_eq!(caught_up.kind(), TokenKind::GlobalSequence);
    }

    #[test]
    fn reset_forward_is_not_a_replay() {
        let token = TrackingToken::at(4).reset_to(Some(9));
        assert_eq!(token.replay_until(), None);
        assert_eq!(token.position(), Some(9));
    }

    #[test]
    fn second_reset_keeps_original_high_water_mark() {
        let token = TrackingToken::at(10).reset_to(Some(6)).advanced_to(7).reset_to(None);
        assert_eq!(token.replay_until(), Some(10));
    }

    #[test]
    fn merge_reads_from_lower_and_reports_higher() {
        let (low, high) = Segment::ROOT.split();
        let merged = TrackingToken::merged(low, &TrackingToken::at(3), high, &TrackingToken::at(8));

        assert_eq!(merged.position(), Some(3));
        assert_eq!(merged.reported_position(), Some(8));
        assert_eq!(merged.kind(), TokenKind::Merged);

        let high_hash = (0..).find(|h| high.matches_hash(*h)).unwrap();
        let low_hash = (0..).find(|h| low.matches_hash(*h)).unwrap();
        assert!(merged.already_applied(high_hash, 5));
        assert!(!merged.already_applied(high_hash, 9));
        assert!(!merged.already_applied(low_hash, 5));

        assert_eq!(merged.advanced_to(8).kind(), TokenKind::GlobalSequence);
    }

    #[test]
    fn splitting_a_merged_token_restores_half_positions() {
        let (low, high) = Segment::ROOT.split();
        let merged = TrackingToken::merged(low, &TrackingToken::at(3), high, &TrackingToken::at(8));

        let (l, h) = merged.split(Segment::ROOT);
        assert_eq!(l, TrackingToken::at(3));
        assert_eq!(h, TrackingToken::at(8));
    }

    #[test]
    fn merged_tail_and_position() {
        let (low, high) = Segment::ROOT.split();
        let merged = TrackingToken::merged(low, &TrackingToken::tail(), high, &TrackingToken::at(2));
        assert_eq!(merged.position(), None);
        assert_eq!(merged.reported_position(), Some(2));
    }
}

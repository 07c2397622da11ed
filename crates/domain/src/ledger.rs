//! Vote state transitions shared by posts and comments.

use crate::errors::CoreError;
use crate::models::{VotableEntity, VoteDirection, VoteState};

/// Result of applying one vote action to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteChange {
    pub new_score: i64,
    pub new_own_vote: VoteState,
    pub score_delta: i64,
}

/// Computes the effect of clicking `direction` on `entity`.
///
/// Clicking the direction that is already active retracts the vote; clicking
/// the opposite one flips it. Pure and total: every (state, direction) pair
/// has exactly one outcome, and scores saturate at the `i64` bounds.
pub fn apply_vote(entity: &VotableEntity, direction: VoteDirection) -> VoteChange {
    let requested = direction.as_state();
    let new_own_vote = if entity.own_vote == requested {
        VoteState::None
    } else {
        requested
    };
    let score_delta = new_own_vote.contribution() - entity.own_vote.contribution();

    VoteChange {
        new_score: entity.score.saturating_add(score_delta),
        new_own_vote,
        score_delta,
    }
}

impl VotableEntity {
    pub fn with_change(&self, change: VoteChange) -> Self {
        Self {
            id: self.id.clone(),
            score: change.new_score,
            own_vote: change.new_own_vote,
        }
    }

    pub fn voted(&self, direction: VoteDirection) -> Self {
        self.with_change(apply_vote(self, direction))
    }
}

/// Outcome of comparing an optimistic value with the server's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    Confirmed(VotableEntity),
    /// The server disagreed; its value is authoritative.
    Overridden {
        settled: VotableEntity,
        conflict: CoreError,
    },
}

impl Reconciliation {
    pub fn settled(&self) -> &VotableEntity {
        match self {
            Reconciliation::Confirmed(entity) => entity,
            Reconciliation::Overridden { settled, .. } => settled,
        }
    }

    pub fn conflict(&self) -> Option<&CoreError> {
        match self {
            Reconciliation::Confirmed(_) => None,
            Reconciliation::Overridden { conflict, .. } => Some(conflict),
        }
    }
}

pub fn reconcile(local: &VotableEntity, server_score: i64, server_vote: VoteState) -> Reconciliation {
    if local.score == server_score && local.own_vote == server_vote {
        return Reconciliation::Confirmed(local.clone());
    }

    Reconciliation::Overridden {
        settled: VotableEntity::new(local.id.clone(), server_score, server_vote),
        conflict: CoreError::StaleConflict {
            entity: local.id.clone(),
            local_score: local.score,
            local_vote: local.own_vote,
            server_score,
            server_vote,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityRef, PostId};

    fn entity(score: i64, own_vote: VoteState) -> VotableEntity {
        VotableEntity::new(
            EntityRef::Post(PostId::new_unchecked("p1".into())),
            score,
            own_vote,
        )
    }

    #[test]
    fn transition_table() {
        use VoteDirection::{Down, Up};
        let cases = [
            (VoteState::None, Up, VoteState::Up, 1),
            (VoteState::None, Down, VoteState::Down, -1),
            (VoteState::Up, Up, VoteState::None, -1),
            (VoteState::Down, Down, VoteState::None, 1),
            (VoteState::Up, Down, VoteState::Down, -2),
            (VoteState::Down, Up, VoteState::Up, 2),
        ];

        for (current, requested, expected_vote, expected_delta) in cases {
            let change = apply_vote(&entity(7, current), requested);
            assert_eq!(change.new_own_vote, expected_vote, "{current} -> {requested}");
            assert_eq!(change.score_delta, expected_delta, "{current} -> {requested}");
            assert_eq!(change.new_score, 7 + expected_delta);
        }
    }

    #[test]
    fn scores_saturate_at_the_bounds() {
        let top = apply_vote(&entity(i64::MAX, VoteState::None), VoteDirection::Up);
        assert_eq!((top.new_score, top.new_own_vote), (i64::MAX, VoteState::Up));

        let bottom = apply_vote(&entity(i64::MIN, VoteState::Up), VoteDirection::Down);
        assert_eq!((bottom.new_score, bottom.new_own_vote), (i64::MIN, VoteState::Down));
        assert_eq!(bottom.score_delta, -2);

        assert_eq!(entity(i64::MIN, VoteState::Up).others_score(), i64::MIN);
        assert_eq!(entity(i64::MAX, VoteState::Down).others_score(), i64::MAX);
    }

    #[test]
    fn double_click_returns_to_start() {
        for own_vote in [VoteState::None, VoteState::Up, VoteState::Down] {
            for direction in [VoteDirection::Up, VoteDirection::Down] {
                let start = entity(-4, own_vote);
                let twice = start.voted(direction).voted(direction);
                assert_eq!(twice, start, "{own_vote} clicked {direction} twice");
            }
        }
    }

    #[test]
    fn others_score_is_preserved() {
        for own_vote in [VoteState::None, VoteState::Up, VoteState::Down] {
            for direction in [VoteDirection::Up, VoteDirection::Down] {
                let start = entity(12, own_vote);
                assert_eq!(start.voted(direction).others_score(), start.others_score());
            }
        }
    }

    #[test]
    fn scenario_upvote_then_retract() {
        let start = entity(10, VoteState::None);
        let once = start.voted(VoteDirection::Up);
        assert_eq!((once.score, once.own_vote), (11, VoteState::Up));
        let twice = once.voted(VoteDirection::Up);
        assert_eq!((twice.score, twice.own_vote), (10, VoteState::None));
    }

    #[test]
    fn scenario_flip_up_to_down() {
        let flipped = entity(5, VoteState::Up).voted(VoteDirection::Down);
        assert_eq!((flipped.score, flipped.own_vote), (3, VoteState::Down));
    }

    #[test]
    fn reconcile_trusts_server() {
        let local = entity(11, VoteState::Up);
        assert_eq!(
            reconcile(&local, 11, VoteState::Up),
            Reconciliation::Confirmed(local.clone())
        );

        let result = reconcile(&local, 14, VoteState::Up);
        assert_eq!(result.settled().score, 14);
        assert!(matches!(
            result.conflict(),
            Some(CoreError::StaleConflict { local_score: 11, server_score: 14, .. })
        ));
    }
}

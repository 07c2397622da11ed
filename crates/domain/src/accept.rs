//! The accepted-answer rule: only the post author accepts, and at most one
//! comment per post carries the flag. Accepting another comment moves the
//! flag (last accept wins).

use crate::errors::{CoreError, Result};
use crate::models::{CommentId, CommentNode, UserId};
use crate::tree;

/// Anything holding the accepted flags of one post's comments.
pub trait AcceptanceSet {
    fn contains_comment(&self, id: &CommentId) -> bool;

    /// Every comment currently flagged, in thread order.
    fn accepted_ids(&self) -> Vec<CommentId>;

    fn set_accepted(&mut self, id: &CommentId, accepted: bool);
}

pub fn authorize(requester: &UserId, post_author: &UserId) -> Result<()> {
    if requester != post_author {
        return Err(CoreError::PermissionDenied {
            requester: requester.clone(),
            post_author: post_author.clone(),
        });
    }
    Ok(())
}

/// Marks `target` as the accepted answer and clears every other flag.
///
/// Returns the comment that lost the flag, if any.
pub fn enforce_accept<S: AcceptanceSet + ?Sized>(
    set: &mut S,
    target: &CommentId,
    requester: &UserId,
    post_author: &UserId,
) -> Result<Option<CommentId>> {
    authorize(requester, post_author)?;

    if !set.contains_comment(target) {
        return Err(CoreError::UnknownComment(target.clone()));
    }

    let accepted = set.accepted_ids();
    if accepted.len() == 1 && &accepted[0] == target {
        return Err(CoreError::AlreadyAccepted(target.clone()));
    }

    replace_accepted(set, &[target.clone()]);
    Ok(accepted.into_iter().find(|id| id != target))
}

/// Sets the flags to exactly `ids`. Used for rollback and for server results.
pub fn replace_accepted<S: AcceptanceSet + ?Sized>(set: &mut S, ids: &[CommentId]) {
    for id in set.accepted_ids() {
        if !ids.contains(&id) {
            set.set_accepted(&id, false);
        }
    }
    for id in ids {
        if set.contains_comment(id) {
            set.set_accepted(id, true);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acceptance {
    pub tree: Vec<CommentNode>,
    pub previous: Option<CommentId>,
}

pub fn accept(
    comment_id: &CommentId,
    mut tree: Vec<CommentNode>,
    requester: &UserId,
    post_author: &UserId,
) -> Result<Acceptance> {
    let previous = enforce_accept(&mut tree, comment_id, requester, post_author)?;
    Ok(Acceptance { tree, previous })
}

pub fn has_accepted_answer(forest: &[CommentNode]) -> bool {
    tree::walk(forest).any(|node| node.is_accepted)
}

pub fn accepted_comment(forest: &[CommentNode]) -> Option<&CommentNode> {
    tree::walk(forest).find(|node| node.is_accepted)
}

impl AcceptanceSet for Vec<CommentNode> {
    fn contains_comment(&self, id: &CommentId) -> bool {
        tree::find(self, id).is_some()
    }

    fn accepted_ids(&self) -> Vec<CommentId> {
        tree::walk(self)
            .filter(|node| node.is_accepted)
            .map(|node| node.id.clone())
            .collect()
    }

    fn set_accepted(&mut self, id: &CommentId, accepted: bool) {
        tree::for_each_mut(self, &mut |node| {
            if &node.id == id {
                node.is_accepted = accepted;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CommentRecord;
    use crate::tree::{build_tree, DEFAULT_MAX_DEPTH};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn uid(s: &str) -> UserId {
        UserId::new_unchecked(s.into())
    }

    fn cid(s: &str) -> CommentId {
        CommentId::new_unchecked(s.into())
    }

    fn record(id: &str, parent: Option<&str>) -> CommentRecord {
        CommentRecord {
            id: cid(id),
            parent_id: parent.map(cid),
            author_id: uid("someone"),
            content: String::new(),
            score: 0,
            own_vote: Default::default(),
            is_accepted: false,
            is_deleted: false,
            created_at: None,
            replies: Vec::new(),
        }
    }

    fn thread() -> Vec<CommentNode> {
        build_tree(
            &[
                record("A", None),
                record("B", Some("A")),
                record("C", Some("B")),
            ],
            DEFAULT_MAX_DEPTH,
        )
    }

    #[test]
    fn last_accept_wins() {
        let author = uid("alice");
        let first = accept(&cid("A"), thread(), &author, &author).expect("author may accept");
        assert_eq!(first.previous, None);
        assert_eq!(first.tree.accepted_ids(), vec![cid("A")]);

        let second = accept(&cid("C"), first.tree, &author, &author).expect("author may accept");
        assert_eq!(second.previous, Some(cid("A")));
        assert_eq!(second.tree.accepted_ids(), vec![cid("C")]);
        assert_eq!(
            accepted_comment(&second.tree).map(|n| n.id.clone()),
            Some(cid("C"))
        );
    }

    #[test]
    fn only_author_may_accept() {
        let err = accept(&cid("B"), thread(), &uid("mallory"), &uid("alice"))
            .expect_err("non-author");
        assert!(matches!(err, CoreError::PermissionDenied { .. }));
    }

    #[test]
    fn accepting_twice_is_reported() {
        let author = uid("alice");
        let once = accept(&cid("B"), thread(), &author, &author).expect("first accept");
        let err = accept(&cid("B"), once.tree, &author, &author).expect_err("second accept");
        assert_eq!(err, CoreError::AlreadyAccepted(cid("B")));
    }

    #[test]
    fn unknown_target_is_rejected() {
        let author = uid("alice");
        let err = accept(&cid("Z"), thread(), &author, &author).expect_err("missing");
        assert_eq!(err, CoreError::UnknownComment(cid("Z")));
        assert!(!has_accepted_answer(&thread()));
    }

    #[test]
    fn repairs_trees_with_several_flags() {
        let mut records = vec![record("A", None), record("B", Some("A")), record("C", None)];
        records[0].is_accepted = true;
        records[2].is_accepted = true;
        let author = uid("alice");
        let result = accept(&cid("B"), build_tree(&records, DEFAULT_MAX_DEPTH), &author, &author)
            .expect("accept");
        assert_eq!(result.tree.accepted_ids(), vec![cid("B")]);
    }

    #[test]
    fn exactly_one_accepted_after_any_sequence() {
        let mut rng = StdRng::seed_from_u64(99);
        let author = uid("alice");
        let records: Vec<CommentRecord> = (0..30)
            .map(|i| {
                let parent = if i == 0 || rng.gen_bool(0.4) {
                    None
                } else {
                    Some(format!("c{}", rng.gen_range(0..i)))
                };
                record(&format!("c{i}"), parent.as_deref())
            })
            .collect();
        let mut tree = build_tree(&records, DEFAULT_MAX_DEPTH);

        for _ in 0..50 {
            let target = cid(&format!("c{}", rng.gen_range(0..30)));
            match accept(&target, tree.clone(), &author, &author) {
                Ok(result) => tree = result.tree,
                Err(CoreError::AlreadyAccepted(id)) => assert_eq!(id, target),
                Err(other) => panic!("unexpected error: {other}"),
            }
            assert_eq!(tree.accepted_ids(), vec![target]);
        }
    }
}

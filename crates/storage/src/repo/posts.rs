use domain::{CommentRecord, CoreError, EntityRef, PostId, PostRecord, PostView, Result};
use tracing::{debug, info, warn};

use crate::{PostState, WorkingSet};

impl WorkingSet {
    /// Creates the post's state, replacing whatever was held for it before.
    pub fn load(&mut self, post: PostRecord, comments: &[CommentRecord]) -> &PostState {
        let post_id = post.id.clone();
        if let Some(previous) = self.posts.remove(&post_id) {
            debug!("Reloading post {} ({} comments)", post_id, previous.comment_count());
            self.forget_owners(&previous);
        }

        let state = PostState::new(post, comments, self.max_depth);
        for id in state.comments.ids() {
            match self.owners.get(id) {
                Some(owner) if *owner != post_id => warn!(
                    "Comment {} on post {} already belongs to post {}, keeping the first owner",
                    id, post_id, owner
                ),
                _ => {
                    self.owners.insert(id.clone(), post_id.clone());
                }
            }
        }
        info!("Loaded post {} with {} comments", post_id, state.comment_count());

        self.posts.entry(post_id).or_insert(state)
    }

    /// Drops the post and everything it owns.
    pub fn unload(&mut self, post_id: &PostId) -> Option<PostState> {
        let state = self.posts.remove(post_id)?;
        self.forget_owners(&state);
        info!("Unloaded post {}", post_id);
        Some(state)
    }

    /// Hides the post from the UI while keeping its records for late results.
    pub fn detach(&mut self, post_id: &PostId) -> bool {
        match self.posts.get_mut(post_id) {
            Some(state) => {
                state.detached = true;
                debug!("Detached post {}", post_id);
                true
            }
            None => false,
        }
    }

    pub fn is_detached(&self, post_id: &PostId) -> bool {
        self.posts.get(post_id).is_some_and(|p| p.detached)
    }

    pub fn view(
        &self,
        post_id: &PostId,
        pending: Vec<EntityRef>,
        accept_pending: bool,
    ) -> Result<PostView> {
        let state = self
            .posts
            .get(post_id)
            .ok_or_else(|| CoreError::UnknownPost(post_id.clone()))?;

        Ok(PostView {
            post: state.entity(),
            author_id: state.record.author_id.clone(),
            title: state.record.title.clone(),
            comments: state.forest.clone(),
            accepted: domain::accept::accepted_comment(&state.forest).map(|n| n.id.clone()),
            pending,
            accept_pending,
        })
    }

    pub(crate) fn post_mut(&mut self, post_id: &PostId) -> Result<&mut PostState> {
        self.posts
            .get_mut(post_id)
            .ok_or_else(|| CoreError::UnknownPost(post_id.clone()))
    }

    fn forget_owners(&mut self, state: &PostState) {
        for id in state.comments.ids() {
            if self.owners.get(id) == Some(&state.record.id) {
                self.owners.remove(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{CommentId, UserId, VoteState};

    fn post(id: &str) -> PostRecord {
        PostRecord {
            id: PostId::new_unchecked(id.into()),
            author_id: UserId::new_unchecked("alice".into()),
            title: format!("Question {id}"),
            score: 3,
            own_vote: VoteState::None,
        }
    }

    fn comment(id: &str, parent: Option<&str>) -> CommentRecord {
        CommentRecord {
            id: CommentId::new_unchecked(id.into()),
            parent_id: parent.map(|p| CommentId::new_unchecked(p.into())),
            author_id: UserId::new_unchecked("bob".into()),
            content: String::new(),
            score: 0,
            own_vote: VoteState::None,
            is_accepted: false,
            is_deleted: false,
            created_at: None,
            replies: Vec::new(),
        }
    }

    #[test]
    fn load_and_unload_manage_ownership() {
        let mut set = WorkingSet::default();
        let p1 = PostId::new_unchecked("p1".into());
        set.load(post("p1"), &[comment("a", None), comment("b", Some("a"))]);

        let a = EntityRef::Comment(CommentId::new_unchecked("a".into()));
        assert_eq!(set.post_of(&a), Some(&p1));
        assert_eq!(set.post(&p1).map(|p| p.forest().len()), Some(1));

        let removed = set.unload(&p1).expect("was loaded");
        assert_eq!(removed.comment_count(), 2);
        assert_eq!(set.post_of(&a), None);
        assert!(set.is_empty());
    }

    #[test]
    fn reload_replaces_comments() {
        let mut set = WorkingSet::default();
        set.load(post("p1"), &[comment("a", None), comment("b", None)]);
        set.load(post("p1"), &[comment("c", None)]);

        let b = EntityRef::Comment(CommentId::new_unchecked("b".into()));
        assert_eq!(set.post_of(&b), None);
        assert_eq!(
            set.post(&PostId::new_unchecked("p1".into()))
                .map(|p| p.comment_count()),
            Some(1)
        );
    }

    #[test]
    fn view_reports_accepted_answer() {
        let mut set = WorkingSet::default();
        let mut accepted = comment("b", Some("a"));
        accepted.is_accepted = true;
        set.load(post("p1"), &[comment("a", None), accepted]);

        let view = set
            .view(&PostId::new_unchecked("p1".into()), Vec::new(), false)
            .expect("loaded");
        assert!(view.has_accepted_answer());
        assert_eq!(view.accepted, Some(CommentId::new_unchecked("b".into())));
        assert_eq!(view.post.score, 3);

        assert!(matches!(
            set.view(&PostId::new_unchecked("nope".into()), Vec::new(), false),
            Err(CoreError::UnknownPost(_))
        ));
    }

    #[test]
    fn load_keeps_only_the_last_accepted_flag() {
        let mut set = WorkingSet::default();
        let mut first = comment("a", None);
        first.is_accepted = true;
        let mut second = comment("b", None);
        second.is_accepted = true;
        set.load(post("p1"), &[first, comment("c", Some("a")), second]);

        let p1 = PostId::new_unchecked("p1".into());
        assert_eq!(
            set.accepted_ids(&p1).expect("loaded"),
            vec![CommentId::new_unchecked("b".into())]
        );
        let view = set.view(&p1, Vec::new(), false).expect("loaded");
        assert_eq!(view.accepted, Some(CommentId::new_unchecked("b".into())));
    }

    #[test]
    fn shared_comment_id_stays_with_the_first_post() {
        let mut set = WorkingSet::default();
        let p1 = PostId::new_unchecked("p1".into());
        let p2 = PostId::new_unchecked("p2".into());
        set.load(post("p1"), &[comment("a", None)]);
        set.load(post("p2"), &[comment("a", None), comment("b", None)]);

        let a = EntityRef::Comment(CommentId::new_unchecked("a".into()));
        let b = EntityRef::Comment(CommentId::new_unchecked("b".into()));
        assert_eq!(set.post_of(&a), Some(&p1));
        assert_eq!(set.post_of(&b), Some(&p2));

        set.unload(&p2);
        assert_eq!(set.post_of(&a), Some(&p1));
        assert_eq!(set.post_of(&b), None);
    }

    #[test]
    fn detach_marks_post() {
        let mut set = WorkingSet::default();
        let p1 = PostId::new_unchecked("p1".into());
        set.load(post("p1"), &[]);
        assert!(!set.is_detached(&p1));
        assert!(set.detach(&p1));
        assert!(set.is_detached(&p1));
        assert!(!set.detach(&PostId::new_unchecked("p2".into())));
    }
}

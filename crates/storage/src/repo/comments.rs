use domain::accept::{self, AcceptanceSet};
use domain::{tree, CommentId, CommentNode, CommentRecord, CoreError, PostId, Result, UserId};
use tracing::debug;

use crate::WorkingSet;

impl WorkingSet {
    /// Inserts or updates a comment (and any nested replies) under a post.
    /// Returns how many comments were new.
    ///
    /// An incoming accepted flag takes over from whichever comment held it.
    /// Ids owned by another loaded post are refused.
    pub fn upsert_comment(&mut self, post_id: &PostId, record: CommentRecord) -> Result<usize> {
        let flat = tree::unnest(std::slice::from_ref(&record));
        if let Some((comment, owner)) = flat.iter().find_map(|r| {
            self.owners
                .get(&r.id)
                .filter(|owner| *owner != post_id)
                .map(|owner| (r.id.clone(), owner.clone()))
        }) {
            return Err(CoreError::DuplicateComment { comment, owner });
        }

        let max_depth = self.max_depth;
        let state = self.post_mut(post_id)?;

        let accepted = flat.iter().rev().find(|r| r.is_accepted).map(|r| r.id.clone());
        let mut inserted = Vec::new();
        for flat in flat {
            let id = flat.id.clone();
            if state.comments.upsert(flat) {
                inserted.push(id);
            }
        }
        if let Some(accepted) = accepted {
            accept::replace_accepted(&mut state.comments, std::slice::from_ref(&accepted));
        }
        state.rebuild(max_depth);

        let count = inserted.len();
        for id in inserted {
            self.owners.insert(id, post_id.clone());
        }
        debug!("Upserted comment {} on post {} ({} new)", record.id, post_id, count);
        Ok(count)
    }

    /// Soft-deletes a comment; its replies keep their place in the thread.
    pub fn remove_comment(&mut self, post_id: &PostId, comment_id: &CommentId) -> Result<()> {
        let max_depth = self.max_depth;
        let state = self.post_mut(post_id)?;
        if !state.comments.soft_delete(comment_id) {
            return Err(CoreError::UnknownComment(comment_id.clone()));
        }
        state.rebuild(max_depth);
        debug!("Removed comment {} on post {}", comment_id, post_id);
        Ok(())
    }

    pub fn find_comment(&self, post_id: &PostId, comment_id: &CommentId) -> Result<&CommentNode> {
        let state = self
            .posts
            .get(post_id)
            .ok_or_else(|| CoreError::UnknownPost(post_id.clone()))?;
        tree::find(&state.forest, comment_id)
            .ok_or_else(|| CoreError::UnknownComment(comment_id.clone()))
    }

    /// Applies the accepted-answer rule to the post owning `comment_id`.
    /// Returns the owning post and the comment that lost the flag.
    pub fn accept(
        &mut self,
        comment_id: &CommentId,
        requester: &UserId,
    ) -> Result<(PostId, Option<CommentId>)> {
        let post_id = self
            .owners
            .get(comment_id)
            .cloned()
            .ok_or_else(|| CoreError::UnknownComment(comment_id.clone()))?;
        let max_depth = self.max_depth;
        let state = self.post_mut(&post_id)?;

        let author = state.record.author_id.clone();
        let previous = accept::enforce_accept(&mut state.comments, comment_id, requester, &author)?;
        state.rebuild(max_depth);

        Ok((post_id, previous))
    }

    pub fn accepted_ids(&self, post_id: &PostId) -> Result<Vec<CommentId>> {
        self.posts
            .get(post_id)
            .map(|state| state.comments.accepted_ids())
            .ok_or_else(|| CoreError::UnknownPost(post_id.clone()))
    }

    /// Forces the accepted flags of a post to exactly `ids`.
    pub fn replace_accepted(&mut self, post_id: &PostId, ids: &[CommentId]) -> Result<()> {
        let max_depth = self.max_depth;
        let state = self.post_mut(post_id)?;
        accept::replace_accepted(&mut state.comments, ids);
        state.rebuild(max_depth);
        Ok(())
    }
}

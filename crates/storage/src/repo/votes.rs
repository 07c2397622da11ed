use domain::{CoreError, EntityRef, PostId, Result, VotableEntity};

use crate::WorkingSet;

impl WorkingSet {
    pub fn post_of(&self, entity: &EntityRef) -> Option<&PostId> {
        match entity {
            EntityRef::Post(id) => self.posts.get_key_value(id).map(|(k, _)| k),
            EntityRef::Comment(id) => self.owners.get(id),
        }
    }

    /// Current score and own vote of a post or comment.
    pub fn entity(&self, entity: &EntityRef) -> Result<VotableEntity> {
        match entity {
            EntityRef::Post(id) => self
                .posts
                .get(id)
                .map(|p| p.entity())
                .ok_or_else(|| CoreError::UnknownPost(id.clone())),
            EntityRef::Comment(id) => self
                .owners
                .get(id)
                .and_then(|post_id| self.posts.get(post_id))
                .and_then(|p| p.comments.get(id))
                .map(|c| c.entity())
                .ok_or_else(|| CoreError::UnknownComment(id.clone())),
        }
    }

    /// Writes score and own vote back. Returns the owning post.
    pub fn set_entity(&mut self, entity: &VotableEntity) -> Result<PostId> {
        let post_id = self
            .post_of(&entity.id)
            .cloned()
            .ok_or_else(|| match &entity.id {
                EntityRef::Post(id) => CoreError::UnknownPost(id.clone()),
                EntityRef::Comment(id) => CoreError::UnknownComment(id.clone()),
            })?;
        let max_depth = self.max_depth;
        let state = self.post_mut(&post_id)?;

        match &entity.id {
            EntityRef::Post(_) => {
                state.record.score = entity.score;
                state.record.own_vote = entity.own_vote;
            }
            EntityRef::Comment(id) => {
                let record = state
                    .comments
                    .get_mut(id)
                    .ok_or_else(|| CoreError::UnknownComment(id.clone()))?;
                record.score = entity.score;
                record.own_vote = entity.own_vote;
                state.rebuild(max_depth);
            }
        }

        Ok(post_id)
    }
}

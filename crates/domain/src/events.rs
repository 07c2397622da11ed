use crate::models::{CommentId, EntityRef, PostId, VotableEntity};
use serde::{Deserialize, Serialize};

/// State changes broadcast to whoever renders a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoreEvent {
    EntityUpdated {
        post_id: PostId,
        entity: VotableEntity,
        pending: bool,
    },
    AcceptanceChanged {
        post_id: PostId,
        accepted: Option<CommentId>,
        pending: bool,
    },
    TreeRebuilt {
        post_id: PostId,
        comment_count: usize,
    },
    RolledBack {
        post_id: PostId,
        target: RollbackTarget,
        reason: String,
    },
    PostUnloaded {
        post_id: PostId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackTarget {
    Vote(EntityRef),
    Accept(CommentId),
}

impl CoreEvent {
    pub fn post_id(&self) -> &PostId {
        match self {
            CoreEvent::EntityUpdated { post_id, .. }
            | CoreEvent::AcceptanceChanged { post_id, .. }
            | CoreEvent::TreeRebuilt { post_id, .. }
            | CoreEvent::RolledBack { post_id, .. }
            | CoreEvent::PostUnloaded { post_id } => post_id,
        }
    }
}

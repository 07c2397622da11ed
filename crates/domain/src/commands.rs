use crate::errors::CoreError;
use crate::models::{
    CommentId, CommentNode, CommentRecord, EntityRef, PostId, PostRecord, UserId, VotableEntity,
    VoteDirection,
};
use serde::{Deserialize, Serialize};

/// Everything the render layer may ask of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    LoadPost {
        post: PostRecord,
        #[serde(default)]
        comments: Vec<CommentRecord>,
    },
    UnloadPost {
        post_id: PostId,
    },
    /// A comment pushed by the server (new or edited).
    IngestComment {
        post_id: PostId,
        comment: CommentRecord,
    },
    RemoveComment {
        post_id: PostId,
        comment_id: CommentId,
    },
    Vote {
        entity: EntityRef,
        direction: VoteDirection,
    },
    Accept {
        comment_id: CommentId,
        requester: UserId,
    },
    Reply {
        post_id: PostId,
        parent_id: Option<CommentId>,
        content: String,
    },
    Snapshot {
        post_id: PostId,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::LoadPost { .. } => "load_post",
            Command::UnloadPost { .. } => "unload_post",
            Command::IngestComment { .. } => "ingest_comment",
            Command::RemoveComment { .. } => "remove_comment",
            Command::Vote { .. } => "vote",
            Command::Accept { .. } => "accept",
            Command::Reply { .. } => "reply",
            Command::Snapshot { .. } => "snapshot",
        }
    }
}

/// Read-only picture of one loaded post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostView {
    pub post: VotableEntity,
    pub author_id: UserId,
    pub title: String,
    pub comments: Vec<CommentNode>,
    pub accepted: Option<CommentId>,
    /// Entities with a vote awaiting the server.
    pub pending: Vec<EntityRef>,
    pub accept_pending: bool,
}

impl PostView {
    pub fn has_accepted_answer(&self) -> bool {
        self.accepted.is_some()
    }
}

/// How a vote or accept mutation ended once the server answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Vote {
        entity: VotableEntity,
        /// Set when the server overrode the optimistic value.
        conflict: Option<CoreError>,
    },
    Accept {
        accepted: CommentId,
        previous: Option<CommentId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Settled(Settlement),
    Replied(CommentRecord),
    View(PostView),
}

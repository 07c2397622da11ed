use crate::models::{CommentId, EntityRef, PostId, UserId, VoteState};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the vote and comment engine.
///
/// None of these are fatal: the worst case is a stale view that heals on the
/// next reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Caller passed something other than `up`/`down`. A contract violation,
    /// rejected at the parsing boundary before the ledger is reached.
    #[error("Invalid vote direction: {0}")]
    InvalidDirection(String),

    #[error("User {requester} may not accept answers on a post authored by {post_author}")]
    PermissionDenied {
        requester: UserId,
        post_author: UserId,
    },

    #[error("Comment {0} is already the accepted answer")]
    AlreadyAccepted(CommentId),

    /// The API collaborator failed. Always rolls the mutation back.
    #[error("Network failure ({reason}): {message}")]
    NetworkFailure { reason: String, message: String },

    /// The server settled on a different value than the optimistic one.
    /// Resolved by trusting the server.
    #[error("Stale state for {entity}: local score {local_score} ({local_vote}), server score {server_score} ({server_vote})")]
    StaleConflict {
        entity: EntityRef,
        local_score: i64,
        local_vote: VoteState,
        server_score: i64,
        server_vote: VoteState,
    },

    #[error("Post {0} is not loaded")]
    UnknownPost(PostId),

    #[error("Comment {0} is not loaded")]
    UnknownComment(CommentId),

    #[error("Comment {comment} already belongs to post {owner}")]
    DuplicateComment { comment: CommentId, owner: PostId },

    #[error("Cannot reply to {parent}: depth {depth} reached the nesting limit of {max_depth}")]
    ReplyDepthExceeded {
        parent: CommentId,
        depth: usize,
        max_depth: usize,
    },

    #[error("Post {0} was unloaded before the mutation could start")]
    PostUnloaded(PostId),

    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("Coordinator is no longer running")]
    CoordinatorClosed,

    #[error("Command {0} produced an unexpected outcome")]
    UnexpectedOutcome(&'static str),
}

impl CoreError {
    /// Errors the UI should offer a retry for.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::NetworkFailure { .. })
    }

    /// Local guards that mirror server-side rules; shown as hints, not failures.
    pub fn is_advisory(&self) -> bool {
        matches!(
            self,
            CoreError::PermissionDenied { .. } | CoreError::AlreadyAccepted(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors_for_the_ui() {
        let network = CoreError::NetworkFailure {
            reason: "timeout".into(),
            message: "upstream took too long".into(),
        };
        assert!(network.is_retryable());
        assert!(!network.is_advisory());

        let denied = CoreError::PermissionDenied {
            requester: UserId::new_unchecked("bob".into()),
            post_author: UserId::new_unchecked("alice".into()),
        };
        assert!(denied.is_advisory());
        assert!(!denied.is_retryable());
        assert_eq!(
            denied.to_string(),
            "User bob may not accept answers on a post authored by alice"
        );
    }
}

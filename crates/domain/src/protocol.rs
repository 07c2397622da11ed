//! Record shapes exchanged with the API collaborator.

use crate::errors::CoreError;
use crate::models::{CommentId, EntityKind, EntityRef, PostId, UserId, VoteDirection, VoteState};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub entity_id: String,
    pub entity_type: EntityKind,
    pub direction: VoteDirection,
}

impl VoteRequest {
    pub fn new(entity: &EntityRef, direction: VoteDirection) -> Self {
        Self {
            entity_id: entity.id_str().to_string(),
            entity_type: entity.kind(),
            direction,
        }
    }

    pub fn entity(&self) -> EntityRef {
        match self.entity_type {
            EntityKind::Post => EntityRef::Post(PostId::new_unchecked(self.entity_id.clone())),
            EntityKind::Comment => {
                EntityRef::Comment(CommentId::new_unchecked(self.entity_id.clone()))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResult {
    pub score: i64,
    pub own_vote: VoteState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptRequest {
    pub comment_id: CommentId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptResult {
    pub accepted_comment_id: CommentId,
    pub previous_accepted_comment_id: Option<CommentId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRequest {
    pub post_id: PostId,
    pub parent_id: Option<CommentId>,
    pub content: String,
}

/// Failure reported by the API collaborator. `reason` is machine-readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub reason: String,
    pub message: String,
}

impl ApiError {
    pub const PERMISSION_DENIED: &'static str = "permission_denied";
    pub const ALREADY_ACCEPTED: &'static str = "already_accepted";
    pub const NOT_FOUND: &'static str = "not_found";
    pub const UNAVAILABLE: &'static str = "unavailable";

    pub fn new(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Generic mapping: any collaborator failure is a network failure.
    pub fn into_core(self) -> CoreError {
        CoreError::NetworkFailure {
            reason: self.reason,
            message: self.message,
        }
    }

    /// Mapping for accept calls, where the server's authoritative rejections
    /// keep their meaning.
    pub fn into_accept_error(
        self,
        target: &CommentId,
        requester: &UserId,
        post_author: &UserId,
    ) -> CoreError {
        match self.reason.as_str() {
            Self::PERMISSION_DENIED => CoreError::PermissionDenied {
                requester: requester.clone(),
                post_author: post_author.clone(),
            },
            Self::ALREADY_ACCEPTED => CoreError::AlreadyAccepted(target.clone()),
            _ => self.into_core(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

impl std::error::Error for ApiError {}

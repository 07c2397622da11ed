use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::CoreError;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl TryFrom<String> for $name {
            type Error = CoreError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::new(s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl $name {
            pub fn new(s: impl Into<String>) -> Result<Self, CoreError> {
                let s = s.into();
                if s.trim().is_empty() {
                    return Err(CoreError::InvalidId(format!(
                        "{} cannot be empty",
                        stringify!($name)
                    )));
                }
                Ok(Self(s))
            }

            pub fn new_unchecked(s: String) -> Self {
                Self(s)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(PostId);
string_id!(CommentId);
string_id!(
    /// Author or viewer identity, as issued by the auth collaborator.
    UserId
);

/// The caller's own vote on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteState {
    #[default]
    None,
    Up,
    Down,
}

impl VoteState {
    /// How much this vote adds to the aggregate score.
    pub fn contribution(self) -> i64 {
        match self {
            VoteState::None => 0,
            VoteState::Up => 1,
            VoteState::Down => -1,
        }
    }
}

impl fmt::Display for VoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VoteState::None => "none",
            VoteState::Up => "up",
            VoteState::Down => "down",
        };
        f.write_str(s)
    }
}

/// A requested vote. Retraction is expressed by repeating the current direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    pub fn as_state(self) -> VoteState {
        match self {
            VoteDirection::Up => VoteState::Up,
            VoteDirection::Down => VoteState::Down,
        }
    }
}

impl fmt::Display for VoteDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.as_state(), f)
    }
}

impl FromStr for VoteDirection {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(VoteDirection::Up),
            "down" => Ok(VoteDirection::Down),
            other => Err(CoreError::InvalidDirection(other.to_string())),
        }
    }
}

impl TryFrom<i32> for VoteDirection {
    type Error = CoreError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(VoteDirection::Up),
            -1 => Ok(VoteDirection::Down),
            other => Err(CoreError::InvalidDirection(other.to_string())),
        }
    }
}

impl TryFrom<VoteState> for VoteDirection {
    type Error = CoreError;

    fn try_from(state: VoteState) -> Result<Self, Self::Error> {
        match state {
            VoteState::Up => Ok(VoteDirection::Up),
            VoteState::Down => Ok(VoteDirection::Down),
            VoteState::None => Err(CoreError::InvalidDirection("none".to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Post,
    Comment,
}

/// Something that can be voted on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityRef {
    Post(PostId),
    Comment(CommentId),
}

impl EntityRef {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Post(_) => EntityKind::Post,
            EntityRef::Comment(_) => EntityKind::Comment,
        }
    }

    pub fn id_str(&self) -> &str {
        match self {
            EntityRef::Post(id) => id.as_str(),
            EntityRef::Comment(id) => id.as_str(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Post(id) => write!(f, "post:{}", id),
            EntityRef::Comment(id) => write!(f, "comment:{}", id),
        }
    }
}

/// Score plus the caller's own vote for one post or comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotableEntity {
    pub id: EntityRef,
    pub score: i64,
    pub own_vote: VoteState,
}

impl VotableEntity {
    pub fn new(id: EntityRef, score: i64, own_vote: VoteState) -> Self {
        Self {
            id,
            score,
            own_vote,
        }
    }

    /// Sum of every other user's vote.
    pub fn others_score(&self) -> i64 {
        self.score.saturating_sub(self.own_vote.contribution())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: PostId,
    pub author_id: UserId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub own_vote: VoteState,
}

impl PostRecord {
    pub fn entity(&self) -> VotableEntity {
        VotableEntity::new(EntityRef::Post(self.id.clone()), self.score, self.own_vote)
    }
}

/// A comment as handed over by the API collaborator. `replies` lets the
/// server return a thread that is already nested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: CommentId,
    #[serde(default)]
    pub parent_id: Option<CommentId>,
    pub author_id: UserId,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub own_vote: VoteState,
    #[serde(default)]
    pub is_accepted: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<CommentRecord>,
}

impl CommentRecord {
    pub fn entity(&self) -> VotableEntity {
        VotableEntity::new(EntityRef::Comment(self.id.clone()), self.score, self.own_vote)
    }
}

/// A comment placed in its thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentNode {
    pub id: CommentId,
    pub parent_id: Option<CommentId>,
    pub author_id: UserId,
    pub content: String,
    pub score: i64,
    pub own_vote: VoteState,
    pub is_accepted: bool,
    pub is_deleted: bool,
    pub created_at: Option<NaiveDateTime>,
    pub depth: usize,
    /// Whether the UI may offer a reply box under this node.
    pub can_reply: bool,
    pub children: Vec<CommentNode>,
}

impl CommentNode {
    pub fn entity(&self) -> VotableEntity {
        VotableEntity::new(EntityRef::Comment(self.id.clone()), self.score, self.own_vote)
    }

    /// Copy of this node as a flat record, without its replies.
    pub fn to_record(&self) -> CommentRecord {
        CommentRecord {
            id: self.id.clone(),
            parent_id: self.parent_id.clone(),
            author_id: self.author_id.clone(),
            content: self.content.clone(),
            score: self.score,
            own_vote: self.own_vote,
            is_accepted: self.is_accepted,
            is_deleted: self.is_deleted,
            created_at: self.created_at,
            replies: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_directions_at_the_boundary() {
        assert_eq!("up".parse::<VoteDirection>(), Ok(VoteDirection::Up));
        assert_eq!(" Down ".parse::<VoteDirection>(), Ok(VoteDirection::Down));
        assert_eq!(
            "sideways".parse::<VoteDirection>(),
            Err(CoreError::InvalidDirection("sideways".into()))
        );
        assert_eq!(VoteDirection::try_from(-1), Ok(VoteDirection::Down));
        assert!(VoteDirection::try_from(0).is_err());
        assert!(VoteDirection::try_from(2).is_err());
        assert!(VoteDirection::try_from(VoteState::None).is_err());
        assert_eq!(
            VoteDirection::try_from(VoteState::Up),
            Ok(VoteDirection::Up)
        );
    }

    #[test]
    fn rejects_empty_ids() {
        assert!(PostId::new("  ").is_err());
        assert_eq!(CommentId::new("c1").map(|c| c.to_string()), Ok("c1".into()));
    }

    #[test]
    fn others_score_excludes_own_vote() {
        let e = VotableEntity::new(
            EntityRef::Post(PostId::new_unchecked("p".into())),
            5,
            VoteState::Up,
        );
        assert_eq!(e.others_score(), 4);
        let e = VotableEntity::new(e.id.clone(), -3, VoteState::Down);
        assert_eq!(e.others_score(), -2);
    }

    #[test]
    fn comment_record_accepts_sparse_json() {
        let json = r#"{
            "id": "c1",
            "author_id": "u1",
            "replies": [{ "id": "c2", "author_id": "u2", "own_vote": "down", "score": -1 }]
        }"#;
        let record: CommentRecord = serde_json::from_str(json).expect("valid record");
        assert_eq!(record.parent_id, None);
        assert_eq!(record.own_vote, VoteState::None);
        assert_eq!(record.replies.len(), 1);
        assert_eq!(record.replies[0].own_vote, VoteState::Down);

        let entity: EntityRef = serde_json::from_str(r#"{"comment":"c9"}"#).expect("valid ref");
        assert_eq!(entity.to_string(), "comment:c9");
    }

    #[test]
    fn empty_ids_are_rejected_when_deserializing() {
        assert!(serde_json::from_str::<PostId>(r#""""#).is_err());
        assert!(serde_json::from_str::<UserId>(r#""   ""#).is_err());
        assert!(serde_json::from_str::<CommentRecord>(r#"{ "id": "", "author_id": "u1" }"#).is_err());

        let id: CommentId = serde_json::from_str(r#""c1""#).expect("valid id");
        assert_eq!(serde_json::to_string(&id).expect("serializes"), r#""c1""#);
    }
}

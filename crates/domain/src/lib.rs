pub mod accept;
mod commands;
mod errors;
mod events;
pub mod ledger;
mod models;
pub mod protocol;
pub mod tree;

pub use commands::{Command, Outcome, PostView, Settlement};
pub use errors::{CoreError, Result};
pub use events::{CoreEvent, RollbackTarget};
pub use models::{
    CommentId, CommentNode, CommentRecord, EntityKind, EntityRef, PostId, PostRecord, UserId,
    VotableEntity, VoteDirection, VoteState,
};

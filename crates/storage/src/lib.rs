use std::collections::HashMap;

use domain::accept::{self, AcceptanceSet};
use domain::tree::{self, DEFAULT_MAX_DEPTH};
use domain::{CommentId, CommentNode, CommentRecord, PostId, PostRecord, UserId, VotableEntity};
use tracing::warn;

mod arena;
mod repo;

pub use arena::CommentArena;

/// Every post the client currently holds, with its comments and vote state.
///
/// Owned by exactly one writer (the coordinator); readers get cloned views.
#[derive(Debug)]
pub struct WorkingSet {
    pub(crate) max_depth: usize,
    pub(crate) posts: HashMap<PostId, PostState>,
    /// Which post owns each loaded comment.
    pub(crate) owners: HashMap<CommentId, PostId>,
}

impl WorkingSet {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            posts: HashMap::new(),
            owners: HashMap::new(),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn post(&self, post_id: &PostId) -> Option<&PostState> {
        self.posts.get(post_id)
    }

    pub fn post_ids(&self) -> impl Iterator<Item = &PostId> {
        self.posts.keys()
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }
}

impl Default for WorkingSet {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

/// One loaded post. The post exclusively owns its comments.
#[derive(Debug, Clone)]
pub struct PostState {
    pub(crate) record: PostRecord,
    pub(crate) comments: CommentArena,
    pub(crate) forest: Vec<CommentNode>,
    pub(crate) detached: bool,
}

impl PostState {
    pub(crate) fn new(record: PostRecord, comments: &[CommentRecord], max_depth: usize) -> Self {
        let mut comments = CommentArena::from_records(comments);
        let accepted = comments.accepted_ids();
        if let [.., last] = accepted.as_slice() {
            if accepted.len() > 1 {
                warn!(
                    "Post {} arrived with {} accepted answers, keeping {}",
                    record.id,
                    accepted.len(),
                    last
                );
                accept::replace_accepted(&mut comments, std::slice::from_ref(last));
            }
        }

        let mut state = Self {
            record,
            comments,
            forest: Vec::new(),
            detached: false,
        };
        state.rebuild(max_depth);
        state
    }

    pub(crate) fn rebuild(&mut self, max_depth: usize) {
        self.forest = tree::build_tree(self.comments.records(), max_depth);
    }

    pub fn id(&self) -> &PostId {
        &self.record.id
    }

    pub fn author_id(&self) -> &UserId {
        &self.record.author_id
    }

    pub fn entity(&self) -> VotableEntity {
        self.record.entity()
    }

    pub fn comments(&self) -> &CommentArena {
        &self.comments
    }

    pub fn forest(&self) -> &[CommentNode] {
        &self.forest
    }

    pub fn comment_count(&self) -> usize {
        self.comments.len()
    }

    /// Unloaded by the UI but kept alive until in-flight mutations settle.
    pub fn is_detached(&self) -> bool {
        self.detached
    }
}

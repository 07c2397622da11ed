use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use domain::protocol::{
    AcceptRequest, AcceptResult, ApiError, ReplyRequest, VoteRequest, VoteResult,
};
use domain::{CommentId, CommentRecord, EntityRef, PostId, PostRecord, UserId, VotableEntity};
use rand::Rng;
use tokio::sync::{Mutex, Semaphore};
use tracing::debug;

use crate::traits::ApiService;

/// A call as the server received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    Vote(VoteRequest),
    Accept(AcceptRequest),
    Reply(ReplyRequest),
}

struct ServerPost {
    author_id: UserId,
    accepted: Option<CommentId>,
}

#[derive(Default)]
struct ServerState {
    entities: HashMap<EntityRef, VotableEntity>,
    posts: HashMap<PostId, ServerPost>,
    comment_posts: HashMap<CommentId, PostId>,
    failures: VecDeque<ApiError>,
    in_flight: HashMap<String, usize>,
    max_in_flight: usize,
    calls: Vec<ApiCall>,
    next_comment: u64,
}

impl ServerState {
    fn enter(&mut self, key: &str) {
        let n = self.in_flight.entry(key.to_string()).or_default();
        *n += 1;
        self.max_in_flight = self.max_in_flight.max(*n);
    }

    fn leave(&mut self, key: &str) {
        if let Some(n) = self.in_flight.get_mut(key) {
            *n -= 1;
            if *n == 0 {
                self.in_flight.remove(key);
            }
        }
    }
}

/// Server stand-in holding the authoritative copy of every seeded post. Used
/// by the replay binary and the coordinator tests.
///
/// A gated instance parks every call until [`InMemoryApi::release`] or
/// [`InMemoryApi::open_gate`] lets it through.
pub struct InMemoryApi {
    viewer: UserId,
    state: Mutex<ServerState>,
    gate: Option<Semaphore>,
    latency_ms: u64,
}

impl InMemoryApi {
    pub fn new(viewer: UserId) -> Self {
        Self {
            viewer,
            state: Mutex::new(ServerState::default()),
            gate: None,
            latency_ms: 0,
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub async fn seed(&self, post: &PostRecord, comments: &[CommentRecord]) {
        let mut state = self.state.lock().await;
        state.entities.insert(post.entity().id.clone(), post.entity());

        let mut accepted = None;
        for comment in domain::tree::unnest(comments) {
            if comment.is_accepted {
                accepted = Some(comment.id.clone());
            }
            state.entities.insert(comment.entity().id.clone(), comment.entity());
            state.comment_posts.insert(comment.id.clone(), post.id.clone());
        }
        state.posts.insert(
            post.id.clone(),
            ServerPost {
                author_id: post.author_id.clone(),
                accepted,
            },
        );
    }

    /// The next call, of any kind, fails with `error`.
    pub async fn fail_next(&self, error: ApiError) {
        self.state.lock().await.failures.push_back(error);
    }

    /// Lets `n` parked calls through.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Lets every call through, now and later.
    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.close();
        }
    }

    pub async fn calls(&self) -> Vec<ApiCall> {
        self.state.lock().await.calls.clone()
    }

    /// Highest number of overlapping calls seen for one entity or post.
    pub async fn max_in_flight(&self) -> usize {
        self.state.lock().await.max_in_flight
    }

    /// Someone else voted on `entity`.
    pub async fn add_external_vote(&self, entity: &EntityRef, delta: i64) {
        if let Some(e) = self.state.lock().await.entities.get_mut(entity) {
            e.score += delta;
        }
    }

    pub async fn server_entity(&self, entity: &EntityRef) -> Option<VotableEntity> {
        self.state.lock().await.entities.get(entity).cloned()
    }

    pub async fn accepted(&self, post_id: &PostId) -> Option<CommentId> {
        self.state
            .lock()
            .await
            .posts
            .get(post_id)
            .and_then(|p| p.accepted.clone())
    }

    /// Records the call, then waits for the gate and the simulated latency.
    /// Returns the queued failure, if any.
    async fn arrive(&self, call: ApiCall, key: &str) -> Option<ApiError> {
        {
            let mut state = self.state.lock().await;
            state.calls.push(call);
            state.enter(key);
        }

        if let Some(gate) = &self.gate {
            // A closed gate means it was opened for good.
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if self.latency_ms > 0 {
            let delay = {
                let mut rng = rand::thread_rng();
                self.latency_ms + rng.gen_range(0..=self.latency_ms / 2)
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.state.lock().await.failures.pop_front()
    }
}

#[async_trait]
impl ApiService for InMemoryApi {
    async fn vote(&self, request: VoteRequest) -> Result<VoteResult, ApiError> {
        let entity = request.entity();
        let key = entity.to_string();
        let failure = self.arrive(ApiCall::Vote(request.clone()), &key).await;

        let mut state = self.state.lock().await;
        state.leave(&key);
        if let Some(e) = failure {
            debug!("Vote on {} failed on purpose: {}", entity, e);
            return Err(e);
        }

        let current = state
            .entities
            .get_mut(&entity)
            .ok_or_else(|| ApiError::new(ApiError::NOT_FOUND, format!("{} does not exist", entity)))?;
        *current = current.voted(request.direction);
        debug!("Server vote on {}: {} ({})", entity, current.score, current.own_vote);

        Ok(VoteResult {
            score: current.score,
            own_vote: current.own_vote,
        })
    }

    async fn accept(&self, request: AcceptRequest) -> Result<AcceptResult, ApiError> {
        let key = format!("accept/{}", request.comment_id);
        let failure = self.arrive(ApiCall::Accept(request.clone()), &key).await;

        let mut state = self.state.lock().await;
        state.leave(&key);
        if let Some(e) = failure {
            return Err(e);
        }

        let post_id = state.comment_posts.get(&request.comment_id).cloned().ok_or_else(|| {
            ApiError::new(
                ApiError::NOT_FOUND,
                format!("comment {} does not exist", request.comment_id),
            )
        })?;
        let viewer = self.viewer.clone();
        let post = state.posts.get_mut(&post_id).ok_or_else(|| {
            ApiError::new(ApiError::NOT_FOUND, format!("post {} does not exist", post_id))
        })?;

        if post.author_id != viewer {
            return Err(ApiError::new(
                ApiError::PERMISSION_DENIED,
                "only the question author can accept an answer",
            ));
        }
        if post.accepted.as_ref() == Some(&request.comment_id) {
            return Err(ApiError::new(
                ApiError::ALREADY_ACCEPTED,
                format!("comment {} is already accepted", request.comment_id),
            ));
        }

        let previous = post.accepted.replace(request.comment_id.clone());
        Ok(AcceptResult {
            accepted_comment_id: request.comment_id,
            previous_accepted_comment_id: previous,
        })
    }

    async fn create_reply(&self, request: ReplyRequest) -> Result<CommentRecord, ApiError> {
        let key = format!("reply/{}", request.post_id);
        let failure = self.arrive(ApiCall::Reply(request.clone()), &key).await;

        let mut state = self.state.lock().await;
        state.leave(&key);
        if let Some(e) = failure {
            return Err(e);
        }

        if !state.posts.contains_key(&request.post_id) {
            return Err(ApiError::new(
                ApiError::NOT_FOUND,
                format!("post {} does not exist", request.post_id),
            ));
        }
        if let Some(parent) = &request.parent_id {
            if state.comment_posts.get(parent) != Some(&request.post_id) {
                return Err(ApiError::new(
                    ApiError::NOT_FOUND,
                    format!("comment {} is not on post {}", parent, request.post_id),
                ));
            }
        }

        state.next_comment += 1;
        let record = CommentRecord {
            id: CommentId::new_unchecked(format!("r{}", state.next_comment)),
            parent_id: request.parent_id,
            author_id: self.viewer.clone(),
            content: request.content,
            score: 0,
            own_vote: Default::default(),
            is_accepted: false,
            is_deleted: false,
            created_at: Some(Utc::now().naive_utc()),
            replies: Vec::new(),
        };
        state.entities.insert(record.entity().id.clone(), record.entity());
        state.comment_posts.insert(record.id.clone(), request.post_id);
        Ok(record)
    }
}

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use domain::protocol::{AcceptRequest, AcceptResult, ApiError, ReplyRequest, VoteRequest, VoteResult};
use domain::{
    ledger, Command, CommentId, CommentRecord, CoreError, CoreEvent, EntityRef, Outcome, PostId,
    Result, RollbackTarget, Settlement, UserId, VotableEntity, VoteDirection,
};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use storage::WorkingSet;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::traits::ApiService;
use crate::CommandEnvelope;

type Responder = oneshot::Sender<Result<Outcome>>;

/// Mutations on the same key never overlap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LaneKey {
    Vote(EntityRef),
    Accept(PostId),
}

impl fmt::Display for LaneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaneKey::Vote(entity) => write!(f, "vote/{}", entity),
            LaneKey::Accept(post_id) => write!(f, "accept/post:{}", post_id),
        }
    }
}

enum Mutation {
    Vote {
        entity: EntityRef,
        direction: VoteDirection,
    },
    Accept {
        comment_id: CommentId,
        requester: UserId,
    },
}

struct Queued {
    mutation: Mutation,
    resp: Responder,
}

struct Lane {
    post_id: PostId,
    /// Caller of the in-flight mutation, if one is in flight.
    pending: Option<Responder>,
    /// The post was reloaded while the call was in flight, so its snapshot
    /// no longer describes the held state.
    stale: bool,
    queue: VecDeque<Queued>,
}

/// A finished API call, carrying the snapshot taken when it started.
enum Completion {
    Vote {
        key: LaneKey,
        before: VotableEntity,
        result: std::result::Result<VoteResult, ApiError>,
    },
    Accept {
        key: LaneKey,
        target: CommentId,
        requester: UserId,
        before: Vec<CommentId>,
        result: std::result::Result<AcceptResult, ApiError>,
    },
    Reply {
        post_id: PostId,
        resp: Responder,
        result: std::result::Result<CommentRecord, ApiError>,
    },
}

pub(crate) struct Worker {
    set: WorkingSet,
    api: Arc<dyn ApiService>,
    events: broadcast::Sender<CoreEvent>,
    lanes: HashMap<LaneKey, Lane>,
    in_flight: FuturesUnordered<BoxFuture<'static, Completion>>,
}

impl Worker {
    pub(crate) fn new(
        set: WorkingSet,
        api: Arc<dyn ApiService>,
        events: broadcast::Sender<CoreEvent>,
    ) -> Self {
        Self {
            set,
            api,
            events,
            lanes: HashMap::new(),
            in_flight: FuturesUnordered::new(),
        }
    }

    pub(crate) async fn run(
        mut self,
        mut rx_cmd: mpsc::Receiver<CommandEnvelope>,
        cancel_token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                envelope = rx_cmd.recv() => match envelope {
                    Some(CommandEnvelope { cmd, resp }) => self.handle(cmd, resp),
                    None => break,
                },
                Some(done) = self.in_flight.next(), if !self.in_flight.is_empty() => self.settle(done),
                _ = cancel_token.cancelled() => {
                    info!("Coordinator cancelled with {} call(s) in flight", self.in_flight.len());
                    return;
                }
            }
        }

        debug!("All handles dropped, draining {} call(s)", self.in_flight.len());
        loop {
            tokio::select! {
                done = self.in_flight.next() => match done {
                    Some(done) => self.settle(done),
                    None => break,
                },
                _ = cancel_token.cancelled() => break,
            }
        }
        info!("Coordinator stopped");
    }

    fn handle(&mut self, cmd: Command, resp: Responder) {
        debug!("Handling {}", cmd.name());
        match cmd {
            Command::LoadPost { post, comments } => {
                let post_id = post.id.clone();
                self.mark_stale(&post_id);
                let comment_count = self.set.load(post, &comments).comment_count();
                self.emit(CoreEvent::TreeRebuilt {
                    post_id,
                    comment_count,
                });
                respond(resp, Ok(Outcome::Done));
            }
            Command::UnloadPost { post_id } => {
                let result = self.unload(&post_id).map(|_| Outcome::Done);
                respond(resp, result);
            }
            Command::IngestComment { post_id, comment } => {
                let result = self.ingest(&post_id, comment).map(|_| Outcome::Done);
                respond(resp, result);
            }
            Command::RemoveComment {
                post_id,
                comment_id,
            } => {
                let result = self.remove(&post_id, &comment_id).map(|_| Outcome::Done);
                respond(resp, result);
            }
            Command::Vote { entity, direction } => {
                self.submit(Mutation::Vote { entity, direction }, resp)
            }
            Command::Accept {
                comment_id,
                requester,
            } => self.submit(
                Mutation::Accept {
                    comment_id,
                    requester,
                },
                resp,
            ),
            Command::Reply {
                post_id,
                parent_id,
                content,
            } => self.reply(post_id, parent_id, content, resp),
            Command::Snapshot { post_id } => {
                let result = self.view(&post_id).map(Outcome::View);
                respond(resp, result);
            }
        }
    }

    // --- lifecycle ---

    fn unload(&mut self, post_id: &PostId) -> Result<()> {
        if self.set.post(post_id).is_none() || self.set.is_detached(post_id) {
            return Err(CoreError::UnknownPost(post_id.clone()));
        }
        self.emit(CoreEvent::PostUnloaded {
            post_id: post_id.clone(),
        });

        let mut in_flight = 0;
        for lane in self.lanes.values_mut().filter(|l| &l.post_id == post_id) {
            for queued in lane.queue.drain(..) {
                respond(queued.resp, Err(CoreError::PostUnloaded(post_id.clone())));
            }
            if lane.pending.is_some() {
                in_flight += 1;
            }
        }
        self.lanes
            .retain(|_, lane| &lane.post_id != post_id || lane.pending.is_some());

        if in_flight > 0 {
            info!(
                "Post {} unloaded with {} mutation(s) in flight, keeping records until they settle",
                post_id, in_flight
            );
            self.set.detach(post_id);
        } else {
            self.set.unload(post_id);
        }
        Ok(())
    }

    fn release_if_detached(&mut self, post_id: &PostId) {
        if self.set.is_detached(post_id) && !self.lanes.values().any(|l| &l.post_id == post_id) {
            self.set.unload(post_id);
        }
    }

    fn ingest(&mut self, post_id: &PostId, comment: CommentRecord) -> Result<()> {
        self.ensure_attached(post_id)?;
        self.set.upsert_comment(post_id, comment)?;
        self.emit_tree(post_id);
        Ok(())
    }

    fn remove(&mut self, post_id: &PostId, comment_id: &CommentId) -> Result<()> {
        self.ensure_attached(post_id)?;
        self.set.remove_comment(post_id, comment_id)?;
        self.emit_tree(post_id);
        Ok(())
    }

    fn view(&self, post_id: &PostId) -> Result<domain::PostView> {
        self.ensure_attached(post_id)?;
        let mut pending = Vec::new();
        let mut accept_pending = false;
        for (key, lane) in &self.lanes {
            if &lane.post_id != post_id || lane.pending.is_none() {
                continue;
            }
            match key {
                LaneKey::Vote(entity) => pending.push(entity.clone()),
                LaneKey::Accept(_) => accept_pending = true,
            }
        }
        pending.sort_by_key(|e| e.to_string());
        self.set.view(post_id, pending, accept_pending)
    }

    fn ensure_attached(&self, post_id: &PostId) -> Result<()> {
        if self.set.is_detached(post_id) {
            return Err(CoreError::PostUnloaded(post_id.clone()));
        }
        Ok(())
    }

    // --- mutations ---

    fn lane_for(&self, mutation: &Mutation) -> Result<(LaneKey, PostId)> {
        match mutation {
            Mutation::Vote { entity, .. } => {
                let post_id = self.set.post_of(entity).cloned().ok_or_else(|| match entity {
                    EntityRef::Post(id) => CoreError::UnknownPost(id.clone()),
                    EntityRef::Comment(id) => CoreError::UnknownComment(id.clone()),
                })?;
                Ok((LaneKey::Vote(entity.clone()), post_id))
            }
            Mutation::Accept { comment_id, .. } => {
                let post_id = self
                    .set
                    .post_of(&EntityRef::Comment(comment_id.clone()))
                    .cloned()
                    .ok_or_else(|| CoreError::UnknownComment(comment_id.clone()))?;
                Ok((LaneKey::Accept(post_id.clone()), post_id))
            }
        }
    }

    fn submit(&mut self, mutation: Mutation, resp: Responder) {
        let (key, post_id) = match self.lane_for(&mutation) {
            Ok(found) => found,
            Err(e) => return respond(resp, Err(e)),
        };
        if self.set.is_detached(&post_id) {
            return respond(resp, Err(CoreError::PostUnloaded(post_id)));
        }

        let lane = self.lanes.entry(key.clone()).or_insert_with(|| Lane {
            post_id,
            pending: None,
            stale: false,
            queue: VecDeque::new(),
        });
        lane.queue.push_back(Queued { mutation, resp });
        if lane.pending.is_some() {
            debug!("{} busy, queued ({} waiting)", key, lane.queue.len());
            return;
        }
        self.advance(&key);
    }

    /// Starts the next queued mutation of an idle lane, or retires the lane.
    fn advance(&mut self, key: &LaneKey) {
        loop {
            let Some(lane) = self.lanes.get_mut(key) else {
                return;
            };
            if lane.pending.is_some() {
                return;
            }
            let Some(Queued { mutation, resp }) = lane.queue.pop_front() else {
                let post_id = lane.post_id.clone();
                self.lanes.remove(key);
                self.release_if_detached(&post_id);
                return;
            };

            match self.begin(key, mutation) {
                Ok(call) => {
                    if let Some(lane) = self.lanes.get_mut(key) {
                        lane.pending = Some(resp);
                        lane.stale = false;
                    }
                    self.in_flight.push(call);
                    return;
                }
                Err(e) => {
                    debug!("{} rejected locally: {}", key, e);
                    respond(resp, Err(e));
                }
            }
        }
    }

    /// Idle -> Pending: apply locally, then hand the call to the API.
    fn begin(&mut self, key: &LaneKey, mutation: Mutation) -> Result<BoxFuture<'static, Completion>> {
        match mutation {
            Mutation::Vote { entity, direction } => {
                let before = self.set.entity(&entity)?;
                let after = before.voted(direction);
                let post_id = self.set.set_entity(&after)?;
                debug!(
                    "{} pending: {} ({}) -> {} ({})",
                    key, before.score, before.own_vote, after.score, after.own_vote
                );
                self.emit(CoreEvent::EntityUpdated {
                    post_id,
                    entity: after,
                    pending: true,
                });

                let api = self.api.clone();
                let key = key.clone();
                let request = VoteRequest::new(&entity, direction);
                Ok(async move {
                    let result = api.vote(request).await;
                    Completion::Vote {
                        key,
                        before,
                        result,
                    }
                }
                .boxed())
            }
            Mutation::Accept {
                comment_id,
                requester,
            } => {
                let LaneKey::Accept(post_id) = key else {
                    return Err(CoreError::UnknownComment(comment_id));
                };
                let before = self.set.accepted_ids(post_id)?;
                let (post_id, previous) = self.set.accept(&comment_id, &requester)?;
                debug!(
                    "{} pending: {:?} -> {}",
                    key,
                    previous.as_ref().map(|p| p.as_str()),
                    comment_id
                );
                self.emit(CoreEvent::AcceptanceChanged {
                    post_id,
                    accepted: Some(comment_id.clone()),
                    pending: true,
                });

                let api = self.api.clone();
                let key = key.clone();
                let request = AcceptRequest {
                    comment_id: comment_id.clone(),
                };
                Ok(async move {
                    let result = api.accept(request).await;
                    Completion::Accept {
                        key,
                        target: comment_id,
                        requester,
                        before,
                        result,
                    }
                }
                .boxed())
            }
        }
    }

    /// Pending -> Confirmed | RolledBack.
    fn settle(&mut self, done: Completion) {
        match done {
            Completion::Vote {
                key,
                before,
                result,
            } => {
                let Some((post_id, resp, stale)) = self.take_pending(&key) else {
                    return;
                };
                let outcome = match (result, stale) {
                    (Ok(server), false) => self.confirm_vote(&post_id, &before, server),
                    (Err(e), false) => Err(self.rollback_vote(&post_id, &before, e)),
                    (result, true) => self.settle_stale_vote(&post_id, &before, result),
                };
                respond(resp, outcome);
                self.advance(&key);
            }
            Completion::Accept {
                key,
                target,
                requester,
                before,
                result,
            } => {
                let Some((post_id, resp, stale)) = self.take_pending(&key) else {
                    return;
                };
                let outcome = match (result, stale) {
                    (Ok(server), false) => self.confirm_accept(&post_id, &target, &before, server),
                    (Err(e), false) => {
                        Err(self.rollback_accept(&post_id, &target, &requester, &before, e))
                    }
                    (result, true) => self.settle_stale_accept(&post_id, &target, &requester, result),
                };
                respond(resp, outcome);
                self.advance(&key);
            }
            Completion::Reply {
                post_id,
                resp,
                result,
            } => {
                let outcome = match result {
                    Ok(record) => {
                        if self.set.post(&post_id).is_some() {
                            match self.set.upsert_comment(&post_id, record.clone()) {
                                Ok(_) => self.emit_tree(&post_id),
                                Err(e) => warn!("Reply {} not stored: {}", record.id, e),
                            }
                        } else {
                            debug!("Reply {} arrived after post {} was unloaded", record.id, post_id);
                        }
                        Ok(Outcome::Replied(record))
                    }
                    Err(e) => {
                        error!("Reply on post {} failed: {}", post_id, e);
                        Err(e.into_core())
                    }
                };
                respond(resp, outcome);
            }
        }
    }

    fn take_pending(&mut self, key: &LaneKey) -> Option<(PostId, Responder, bool)> {
        let lane = self.lanes.get_mut(key)?;
        let resp = lane.pending.take()?;
        Some((lane.post_id.clone(), resp, std::mem::take(&mut lane.stale)))
    }

    /// Flags every in-flight mutation of a post that is about to be reloaded.
    fn mark_stale(&mut self, post_id: &PostId) {
        for (key, lane) in self.lanes.iter_mut() {
            if &lane.post_id == post_id && lane.pending.is_some() {
                debug!("{} in flight across a reload of post {}", key, post_id);
                lane.stale = true;
            }
        }
    }

    /// Settles a vote whose post was reloaded mid-flight. The reloaded data
    /// never carried the optimistic change, so a failure restores nothing and
    /// a success only writes the server's answer if the entity is still held.
    fn settle_stale_vote(
        &mut self,
        post_id: &PostId,
        before: &VotableEntity,
        result: std::result::Result<VoteResult, ApiError>,
    ) -> Result<Outcome> {
        match result {
            Ok(server) => {
                let settled = VotableEntity::new(before.id.clone(), server.score, server.own_vote);
                match self.set.set_entity(&settled) {
                    Ok(post_id) => self.emit(CoreEvent::EntityUpdated {
                        post_id,
                        entity: settled.clone(),
                        pending: false,
                    }),
                    Err(e) => debug!("Vote on {} confirmed after reload: {}", before.id, e),
                }
                Ok(Outcome::Settled(Settlement::Vote {
                    entity: settled,
                    conflict: None,
                }))
            }
            Err(e) => {
                warn!("Vote on {} failed ({}) after a reload, keeping reloaded data", before.id, e);
                self.emit(CoreEvent::RolledBack {
                    post_id: post_id.clone(),
                    target: RollbackTarget::Vote(before.id.clone()),
                    reason: e.reason.clone(),
                });
                Err(e.into_core())
            }
        }
    }

    /// Settles an accept whose post was reloaded mid-flight.
    fn settle_stale_accept(
        &mut self,
        post_id: &PostId,
        target: &CommentId,
        requester: &UserId,
        result: std::result::Result<AcceptResult, ApiError>,
    ) -> Result<Outcome> {
        match result {
            Ok(server) => {
                let accepted = server.accepted_comment_id;
                if self.set.find_comment(post_id, &accepted).is_ok() {
                    self.set
                        .replace_accepted(post_id, std::slice::from_ref(&accepted))?;
                    self.emit(CoreEvent::AcceptanceChanged {
                        post_id: post_id.clone(),
                        accepted: Some(accepted.clone()),
                        pending: false,
                    });
                } else {
                    debug!("Accept of {} confirmed after reload of post {}", accepted, post_id);
                }
                Ok(Outcome::Settled(Settlement::Accept {
                    accepted,
                    previous: server.previous_accepted_comment_id,
                }))
            }
            Err(e) => {
                warn!("Accept of {} failed ({}) after a reload, keeping reloaded data", target, e);
                let author = self
                    .set
                    .post(post_id)
                    .map(|p| p.author_id().clone())
                    .unwrap_or_else(|| requester.clone());
                self.emit(CoreEvent::RolledBack {
                    post_id: post_id.clone(),
                    target: RollbackTarget::Accept(target.clone()),
                    reason: e.reason.clone(),
                });
                Err(e.into_accept_error(target, requester, &author))
            }
        }
    }

    fn confirm_vote(
        &mut self,
        post_id: &PostId,
        before: &VotableEntity,
        server: VoteResult,
    ) -> Result<Outcome> {
        let local = self.set.entity(&before.id)?;
        let reconciliation = ledger::reconcile(&local, server.score, server.own_vote);
        if let Some(conflict) = reconciliation.conflict() {
            warn!("{}; keeping server value", conflict);
        }
        let settled = reconciliation.settled().clone();
        self.set.set_entity(&settled)?;
        self.emit(CoreEvent::EntityUpdated {
            post_id: post_id.clone(),
            entity: settled.clone(),
            pending: false,
        });

        Ok(Outcome::Settled(Settlement::Vote {
            entity: settled,
            conflict: reconciliation.conflict().cloned(),
        }))
    }

    fn rollback_vote(&mut self, post_id: &PostId, before: &VotableEntity, e: ApiError) -> CoreError {
        warn!("Vote on {} failed ({}), rolling back", before.id, e);
        if let Err(restore) = self.set.set_entity(before) {
            warn!("Nothing to roll back for {}: {}", before.id, restore);
        }
        self.emit(CoreEvent::EntityUpdated {
            post_id: post_id.clone(),
            entity: before.clone(),
            pending: false,
        });
        self.emit(CoreEvent::RolledBack {
            post_id: post_id.clone(),
            target: RollbackTarget::Vote(before.id.clone()),
            reason: e.reason.clone(),
        });
        e.into_core()
    }

    fn confirm_accept(
        &mut self,
        post_id: &PostId,
        target: &CommentId,
        before: &[CommentId],
        server: AcceptResult,
    ) -> Result<Outcome> {
        if &server.accepted_comment_id != target {
            warn!(
                "Server accepted {} instead of {} on post {}",
                server.accepted_comment_id, target, post_id
            );
        }
        if server.previous_accepted_comment_id.as_ref() != before.first() {
            warn!(
                "Accepted answer on post {} moved concurrently (server previous {:?}, local {:?})",
                post_id,
                server.previous_accepted_comment_id.as_ref().map(|c| c.as_str()),
                before.first().map(|c| c.as_str())
            );
        }

        self.set
            .replace_accepted(post_id, std::slice::from_ref(&server.accepted_comment_id))?;
        self.emit(CoreEvent::AcceptanceChanged {
            post_id: post_id.clone(),
            accepted: Some(server.accepted_comment_id.clone()),
            pending: false,
        });

        Ok(Outcome::Settled(Settlement::Accept {
            accepted: server.accepted_comment_id,
            previous: server.previous_accepted_comment_id,
        }))
    }

    fn rollback_accept(
        &mut self,
        post_id: &PostId,
        target: &CommentId,
        requester: &UserId,
        before: &[CommentId],
        e: ApiError,
    ) -> CoreError {
        warn!("Accept of {} failed ({}), rolling back", target, e);
        let author = self
            .set
            .post(post_id)
            .map(|p| p.author_id().clone())
            .unwrap_or_else(|| requester.clone());
        if let Err(restore) = self.set.replace_accepted(post_id, before) {
            warn!("Nothing to roll back on post {}: {}", post_id, restore);
        }
        self.emit(CoreEvent::AcceptanceChanged {
            post_id: post_id.clone(),
            accepted: before.first().cloned(),
            pending: false,
        });
        self.emit(CoreEvent::RolledBack {
            post_id: post_id.clone(),
            target: RollbackTarget::Accept(target.clone()),
            reason: e.reason.clone(),
        });
        e.into_accept_error(target, requester, &author)
    }

    // --- replies ---

    fn reply(
        &mut self,
        post_id: PostId,
        parent_id: Option<CommentId>,
        content: String,
        resp: Responder,
    ) {
        if let Err(e) = self.check_reply(&post_id, parent_id.as_ref()) {
            return respond(resp, Err(e));
        }

        let api = self.api.clone();
        let request = ReplyRequest {
            post_id: post_id.clone(),
            parent_id,
            content,
        };
        self.in_flight.push(
            async move {
                let result = api.create_reply(request).await;
                Completion::Reply {
                    post_id,
                    resp,
                    result,
                }
            }
            .boxed(),
        );
    }

    /// The nesting limit is enforced here, where new replies are created.
    fn check_reply(&self, post_id: &PostId, parent_id: Option<&CommentId>) -> Result<()> {
        self.ensure_attached(post_id)?;
        let Some(parent_id) = parent_id else {
            return self
                .set
                .post(post_id)
                .map(|_| ())
                .ok_or_else(|| CoreError::UnknownPost(post_id.clone()));
        };

        let parent = self.set.find_comment(post_id, parent_id)?;
        if !parent.can_reply {
            return Err(CoreError::ReplyDepthExceeded {
                parent: parent_id.clone(),
                depth: parent.depth,
                max_depth: self.set.max_depth(),
            });
        }
        Ok(())
    }

    // --- events ---

    fn emit_tree(&self, post_id: &PostId) {
        if let Some(state) = self.set.post(post_id) {
            self.emit(CoreEvent::TreeRebuilt {
                post_id: post_id.clone(),
                comment_count: state.comment_count(),
            });
        }
    }

    /// Events for detached posts are dropped; so are events nobody listens to.
    fn emit(&self, event: CoreEvent) {
        if self.set.is_detached(event.post_id()) {
            return;
        }
        let _ = self.events.send(event);
    }
}

fn respond(resp: Responder, outcome: Result<Outcome>) {
    if resp.send(outcome).is_err() {
        debug!("Caller went away before the outcome was ready");
    }
}

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use domain::{
    Command, CommentId, CommentRecord, CoreError, CoreEvent, EntityRef, Outcome, PostId,
    PostRecord, PostView, Result, Settlement, UserId, VoteDirection,
};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::CommandEnvelope;

/// Cheap, cloneable entry point for the render layer. All mutations go
/// through [`CoordinatorHandle::dispatch`].
#[derive(Clone)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<CommandEnvelope>,
    events: broadcast::Sender<CoreEvent>,
}

/// Outcome of a submitted command. Dropping it is fine: the mutation still
/// settles, only the answer is lost.
pub struct Ticket {
    rx: oneshot::Receiver<Result<Outcome>>,
}

impl Future for Ticket {
    type Output = Result<Outcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(CoreError::CoordinatorClosed)))
    }
}

impl CoordinatorHandle {
    pub(crate) fn new(
        sender: mpsc::Sender<CommandEnvelope>,
        events: broadcast::Sender<CoreEvent>,
    ) -> Self {
        Self { sender, events }
    }

    /// Queues a command and returns once the coordinator has it, without
    /// waiting for the server.
    pub async fn submit(&self, cmd: Command) -> Result<Ticket> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CommandEnvelope { cmd, resp: tx })
            .await
            .map_err(|_| CoreError::CoordinatorClosed)?;
        Ok(Ticket { rx })
    }

    pub async fn dispatch(&self, cmd: Command) -> Result<Outcome> {
        self.submit(cmd).await?.await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    pub async fn load_post(&self, post: PostRecord, comments: Vec<CommentRecord>) -> Result<()> {
        self.dispatch(Command::LoadPost { post, comments }).await?;
        Ok(())
    }

    pub async fn unload_post(&self, post_id: PostId) -> Result<()> {
        self.dispatch(Command::UnloadPost { post_id }).await?;
        Ok(())
    }

    pub async fn ingest_comment(&self, post_id: PostId, comment: CommentRecord) -> Result<()> {
        self.dispatch(Command::IngestComment { post_id, comment })
            .await?;
        Ok(())
    }

    pub async fn remove_comment(&self, post_id: PostId, comment_id: CommentId) -> Result<()> {
        self.dispatch(Command::RemoveComment {
            post_id,
            comment_id,
        })
        .await?;
        Ok(())
    }

    pub async fn vote(&self, entity: EntityRef, direction: VoteDirection) -> Result<Settlement> {
        match self.dispatch(Command::Vote { entity, direction }).await? {
            Outcome::Settled(settlement) => Ok(settlement),
            _ => Err(CoreError::UnexpectedOutcome("vote")),
        }
    }

    pub async fn accept(&self, comment_id: CommentId, requester: UserId) -> Result<Settlement> {
        match self
            .dispatch(Command::Accept {
                comment_id,
                requester,
            })
            .await?
        {
            Outcome::Settled(settlement) => Ok(settlement),
            _ => Err(CoreError::UnexpectedOutcome("accept")),
        }
    }

    pub async fn reply(
        &self,
        post_id: PostId,
        parent_id: Option<CommentId>,
        content: String,
    ) -> Result<CommentRecord> {
        match self
            .dispatch(Command::Reply {
                post_id,
                parent_id,
                content,
            })
            .await?
        {
            Outcome::Replied(record) => Ok(record),
            _ => Err(CoreError::UnexpectedOutcome("reply")),
        }
    }

    pub async fn snapshot(&self, post_id: PostId) -> Result<PostView> {
        match self.dispatch(Command::Snapshot { post_id }).await? {
            Outcome::View(view) => Ok(view),
            _ => Err(CoreError::UnexpectedOutcome("snapshot")),
        }
    }
}

use async_trait::async_trait;
use domain::protocol::{
    AcceptRequest, AcceptResult, ApiError, ReplyRequest, VoteRequest, VoteResult,
};
use domain::CommentRecord;

/// The remote API the engine confirms its mutations with. Transport, retries
/// and timeouts are the implementor's business.
#[async_trait]
pub trait ApiService: Send + Sync {
    async fn vote(&self, request: VoteRequest) -> Result<VoteResult, ApiError>;

    async fn accept(&self, request: AcceptRequest) -> Result<AcceptResult, ApiError>;

    async fn create_reply(&self, request: ReplyRequest) -> Result<CommentRecord, ApiError>;
}

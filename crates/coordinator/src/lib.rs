mod drivers;
mod handle;
mod traits;
mod worker;


pub use drivers::memory::{ApiCall, InMemoryApi};
pub use handle::{CoordinatorHandle, Ticket};
pub use traits::ApiService;

use std::sync::Arc;

use domain::tree::DEFAULT_MAX_DEPTH;
use domain::{Command, Outcome};
use storage::WorkingSet;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use worker::Worker;

/// A command plus the channel its outcome is sent back on.
pub struct CommandEnvelope {
    pub cmd: Command,
    pub resp: oneshot::Sender<domain::Result<Outcome>>,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub max_depth: usize,
    pub command_buffer: usize,
    pub event_buffer: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            command_buffer: 100,
            event_buffer: 100,
        }
    }
}

pub fn start(config: CoordinatorConfig, api: Arc<dyn ApiService>) -> (CoordinatorHandle, JoinHandle<()>) {
    start_with_cancel_token(config, api, CancellationToken::new())
}

/// Spawns the coordinator task. It owns the working set until every handle is
/// dropped (in-flight calls are drained first) or the token is cancelled.
pub fn start_with_cancel_token(
    config: CoordinatorConfig,
    api: Arc<dyn ApiService>,
    cancel_token: CancellationToken,
) -> (CoordinatorHandle, JoinHandle<()>) {
    let (tx_cmd, rx_cmd) = mpsc::channel(config.command_buffer.max(1));
    let (tx_events, _) = broadcast::channel(config.event_buffer.max(1));

    info!(
        "Starting coordinator (max depth {}, command buffer {})",
        config.max_depth, config.command_buffer
    );
    let worker = Worker::new(WorkingSet::new(config.max_depth), api, tx_events.clone());
    let join = tokio::spawn(worker.run(rx_cmd, cancel_token));

    (CoordinatorHandle::new(tx_cmd, tx_events), join)
}

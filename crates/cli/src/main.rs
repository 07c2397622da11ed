mod config;
mod fixture;
mod render;

use std::sync::Arc;

use anyhow::Context;
use coordinator::{CoordinatorHandle, InMemoryApi};
use domain::{CoreEvent, Outcome, Settlement};
use dotenvy::dotenv;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::Settings;
use fixture::Fixture;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let settings = Settings::new().context("Failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let fixture_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| settings.replay.fixture.clone());
    let fixture = Fixture::load(&fixture_path)
        .with_context(|| format!("Failed to load fixture: {}", fixture_path))?;

    let api = InMemoryApi::new(fixture.viewer.clone()).with_latency(settings.replay.latency_ms);
    for entry in &fixture.posts {
        api.seed(&entry.post, &entry.comments).await;
    }

    let cancel_token = CancellationToken::new();
    let (handle, worker) = coordinator::start_with_cancel_token(
        settings.engine.clone().into(),
        Arc::new(api),
        cancel_token.clone(),
    );
    let printer = tokio::spawn(log_events(BroadcastStream::new(handle.subscribe())));

    tokio::select! {
        res = replay(&handle, &fixture) => res?,
        _ = shutdown_signal() => cancel_token.cancel(),
    }

    drop(handle);
    if let Err(e) = worker.await {
        error!("Coordinator task crashed: {:?}", e);
    }
    if let Err(e) = printer.await {
        error!("Event printer crashed: {:?}", e);
    }

    Ok(())
}

/// Loads every post, submits the whole script at once, then prints the
/// settled threads.
async fn replay(handle: &CoordinatorHandle, fixture: &Fixture) -> anyhow::Result<()> {
    for entry in &fixture.posts {
        handle
            .load_post(entry.post.clone(), entry.comments.clone())
            .await
            .with_context(|| format!("Failed to load post {}", entry.post.id))?;
    }

    let mut tickets = Vec::with_capacity(fixture.script.len());
    for (step, cmd) in fixture.script.iter().enumerate() {
        let name = cmd.name();
        tickets.push((step + 1, name, handle.submit(cmd.clone()).await?));
    }
    info!("Submitted {} command(s)", tickets.len());

    for (step, name, ticket) in tickets {
        match ticket.await {
            Ok(outcome) => report(step, name, outcome),
            Err(e) if e.is_advisory() => warn!("#{} {}: {}", step, name, e),
            Err(e) => error!("#{} {} failed: {}", step, name, e),
        }
    }

    for entry in &fixture.posts {
        match handle.snapshot(entry.post.id.clone()).await {
            Ok(view) => println!("{}\n", render::render_post(&view)),
            Err(e) => info!("Post {} not shown: {}", entry.post.id, e),
        }
    }
    Ok(())
}

fn report(step: usize, name: &str, outcome: Outcome) {
    match outcome {
        Outcome::Settled(Settlement::Vote { entity, conflict }) => {
            info!("#{} {}: {} now {} ({})", step, name, entity.id, entity.score, entity.own_vote);
            if let Some(conflict) = conflict {
                warn!("#{} {}: {}", step, name, conflict);
            }
        }
        Outcome::Settled(Settlement::Accept { accepted, previous }) => match previous {
            Some(previous) => info!("#{} {}: {} replaces {}", step, name, accepted, previous),
            None => info!("#{} {}: {} accepted", step, name, accepted),
        },
        Outcome::Replied(record) => info!("#{} {}: created {}", step, name, record.id),
        Outcome::View(view) => info!("#{} {}:\n{}", step, name, render::render_post(&view)),
        Outcome::Done => info!("#{} {}: ok", step, name),
    }
}

async fn log_events(mut events: BroadcastStream<CoreEvent>) {
    while let Some(event) = events.next().await {
        match event {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => info!(target: "threadvote::events", "{}", json),
                Err(e) => error!("Event serialization error: {}", e),
            },
            Err(e) => warn!("Event feed: {}", e),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping replay...");
        },
        _ = terminate => {
            info!("Received SIGTERM, stopping replay...");
        },
    }
}

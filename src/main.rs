//! Study Sync binary: keeps one signed-in session connected and flushes it on shutdown.

use std::sync::Arc;

use anyhow::Context;
use study_sync::{
    SyncConfig, SyncSession, state::events::ChannelEvent, transport::StaticCredentials,
};
use tokio_stream::{StreamExt, wrappers::BroadcastStream};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = SyncConfig::load();
    let grace = config.beacon_grace;
    let credentials = Arc::new(StaticCredentials::new(config.token.clone()));
    let (session, beacon) =
        SyncSession::over_http(config, credentials).context("building sync session")?;

    session
        .start()
        .context("starting sync session (is STUDY_SYNC_TOKEN set?)")?;
    info!(session = %session.id(), api = %session.config().api_base_url, "sync session running");

    let mut events = BroadcastStream::new(session.realtime().subscribe());
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.next() => match event {
                Some(Ok(event)) => log_event(&event),
                Some(Err(lagged)) => warn!(error = %lagged, "event log fell behind"),
                None => break,
            },
        }
    }

    match session.unload() {
        Ok(outcome) => info!(?outcome, "flushed pending progress"),
        Err(err) => warn!(error = %err, "unload flush skipped"),
    }
    session.dispose();
    let delivered = beacon.drain(grace).await;
    debug!(delivered, "beacons settled");
    Ok(())
}

fn log_event(event: &ChannelEvent) {
    match event {
        ChannelEvent::Opened => info!("realtime channel open"),
        ChannelEvent::Closed(close) => info!(code = close.code, reason = %close.reason, "realtime channel closed"),
        ChannelEvent::Error(message) => warn!(%message, "realtime channel error"),
        ChannelEvent::ProgressUpdated(update) => info!(
            topic = %update.topic_id,
            chapter = %update.chapter_id,
            completed = update.completed,
            "progress updated"
        ),
        ChannelEvent::QuizCompleted(quiz) => info!(
            quiz = quiz.quiz_id,
            score = quiz.score,
            passed = quiz.passed,
            "quiz completed"
        ),
        ChannelEvent::ReconnectExhausted { attempts } => {
            warn!(attempts, "realtime channel gave up reconnecting")
        }
    }
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,study_sync=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "cannot install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

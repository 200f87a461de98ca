use std::{sync::Arc, time::Duration};

use serde_json::json;
use tokio::{
    sync::{oneshot, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, warn};

use crate::{
    config::ReadingSettings,
    dto::progress::{ProgressUpdate, WriteReceipt},
    error::SyncError,
    services::progress_service::ProgressService,
};

/// Where the reader currently is in the chapter.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReadingPosition {
    /// Absolute scroll offset, restored on the next visit.
    pub scroll_offset: f64,
    /// Percentage of the chapter scrolled through, 0 to 100.
    pub scroll_progress: f64,
}

#[derive(Clone)]
struct Visit {
    topic: String,
    chapter: String,
    estimated_seconds: u64,
}

impl Visit {
    fn observation(&self, read_seconds: u64, position: ReadingPosition) -> ProgressUpdate {
        ProgressUpdate::new(&self.topic, &self.chapter)
            .with_read_duration(read_seconds)
            .with_scroll_progress(position.scroll_progress.clamp(0.0, 100.0))
            .with_last_position(json!({ "scroll": position.scroll_offset }).to_string())
            .with_estimated_seconds(self.estimated_seconds)
    }
}

/// Periodic progress reporting for one chapter visit.
///
/// Writes an opening observation, then one every flush interval carrying the seconds read since
/// the previous one, and a final forced observation from [`ReadingTracker::finish`].
pub struct ReadingTracker {
    visit: Visit,
    service: Arc<ProgressService>,
    position: watch::Sender<ReadingPosition>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Instant>>,
}

impl ReadingTracker {
    /// Start tracking a visit. Must be called from within a Tokio runtime.
    pub fn start(
        service: Arc<ProgressService>,
        topic: impl Into<String>,
        chapter: impl Into<String>,
        settings: &ReadingSettings,
    ) -> Self {
        let visit = Visit {
            topic: topic.into(),
            chapter: chapter.into(),
            estimated_seconds: settings.estimated_seconds,
        };
        let (position, position_rx) = watch::channel(ReadingPosition::default());
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(track(
            service.clone(),
            visit.clone(),
            settings.flush_interval,
            position_rx,
            stop_rx,
        ));

        Self {
            visit,
            service,
            position,
            stop: Some(stop),
            task: Some(task),
        }
    }

    /// Report a new reading position; picked up by the next observation.
    pub fn update_position(&self, position: ReadingPosition) {
        self.position.send_replace(position);
    }

    /// Stop the periodic writes and send the final observation with `force_sync` set.
    pub async fn finish(mut self) -> Result<WriteReceipt, SyncError> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let last_tick = match self.task.take() {
            Some(task) => task.await.unwrap_or_else(|_| Instant::now()),
            None => Instant::now(),
        };

        let update = self
            .visit
            .observation(rounded_secs(last_tick.elapsed()), *self.position.borrow())
            .with_force_sync(true);
        self.service.write(update).await
    }
}

impl Drop for ReadingTracker {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn track(
    service: Arc<ProgressService>,
    visit: Visit,
    every: Duration,
    position: watch::Receiver<ReadingPosition>,
    mut stop: oneshot::Receiver<()>,
) -> Instant {
    let mut last_tick = Instant::now();
    let opening = visit.observation(0, *position.borrow());
    if let Err(err) = service.write(opening).await {
        warn!(topic = %visit.topic, chapter = %visit.chapter, error = %err, "opening progress write failed");
    }

    let mut ticker = interval_at(last_tick + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {
                let now = Instant::now();
                let read_seconds = rounded_secs(now - last_tick);
                last_tick = now;
                let update = visit.observation(read_seconds, *position.borrow());
                if let Err(err) = service.write(update).await {
                    warn!(
                        topic = %visit.topic,
                        chapter = %visit.chapter,
                        error = %err,
                        "periodic progress write failed"
                    );
                }
            }
        }
    }
    debug!(topic = %visit.topic, chapter = %visit.chapter, "reading tracker stopped");
    last_tick
}

fn rounded_secs(elapsed: Duration) -> u64 {
    elapsed.saturating_add(Duration::from_millis(500)).as_secs()
}

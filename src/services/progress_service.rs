use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    dto::progress::{
        NextChapterHint, ProgressSnapshot, ProgressUpdate, TopicProgressDetail, WriteKey,
        WriteReceipt,
    },
    error::SyncError,
    services::{
        cache::{CacheKey, ReadCache},
        retry::Retrier,
        unload::UnloadFlusher,
    },
    transport::ProgressApi,
};

/// What to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadScope {
    /// Progress across every topic.
    Overview,
    /// One topic with its chapters.
    Topic(String),
    /// The chapter to study next, taken from the overview.
    Next,
}

/// Normalized result of a [`ReadScope`] read.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressView {
    /// Overview snapshot.
    Overview(ProgressSnapshot),
    /// Topic detail.
    Topic(TopicProgressDetail),
    /// Suggested next chapter.
    Next(Option<NextChapterHint>),
}

/// Read/write surface for learning progress.
///
/// Reads are served from [`ReadCache`] while fresh. Writes go through the [`Retrier`], are
/// remembered for the unload flush, and invalidate the overview and the written topic on
/// success. Writes for the same topic and chapter are serialized; different chapters proceed
/// concurrently. A chapter's lock lives only while writes for it are in flight or queued.
pub struct ProgressService {
    api: Arc<dyn ProgressApi>,
    cache: Arc<ReadCache>,
    flusher: Arc<UnloadFlusher>,
    retrier: Retrier,
    write_locks: DashMap<WriteKey, Arc<Mutex<()>>>,
    disposed: AtomicBool,
}

impl ProgressService {
    /// Service over `api`, caching in `cache` and tracking writes in `flusher`.
    pub fn new(
        api: Arc<dyn ProgressApi>,
        cache: Arc<ReadCache>,
        flusher: Arc<UnloadFlusher>,
        retrier: Retrier,
    ) -> Self {
        Self {
            api,
            cache,
            flusher,
            retrier,
            write_locks: DashMap::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Cache shared with quiz submission and push invalidation.
    pub fn cache(&self) -> &Arc<ReadCache> {
        &self.cache
    }

    /// Read `scope`, from cache when fresh.
    pub async fn read(&self, scope: ReadScope) -> Result<ProgressView, SyncError> {
        match scope {
            ReadScope::Overview => self.overview().await.map(ProgressView::Overview),
            ReadScope::Topic(topic) => self.topic(&topic).await.map(ProgressView::Topic),
            ReadScope::Next => self.next_chapter().await.map(ProgressView::Next),
        }
    }

    /// Overview snapshot, normalized.
    pub async fn overview(&self) -> Result<ProgressSnapshot, SyncError> {
        self.ensure_live()?;
        if let Some(snapshot) = self.cache.overview() {
            return Ok(snapshot);
        }

        let epoch = self.cache.epoch(&CacheKey::Overview);
        let snapshot = ProgressSnapshot::from(self.api.fetch_overview().await?);
        self.cache.store_overview(epoch, snapshot.clone());
        Ok(snapshot)
    }

    /// Detail for one topic, normalized.
    pub async fn topic(&self, topic: &str) -> Result<TopicProgressDetail, SyncError> {
        self.ensure_live()?;
        if topic.trim().is_empty() {
            return Err(SyncError::InvalidInput("topic must not be empty".into()));
        }
        if let Some(detail) = self.cache.topic(topic) {
            return Ok(detail);
        }

        let epoch = self.cache.epoch(&CacheKey::Topic(topic.to_string()));
        let detail = self.api.fetch_topic(topic).await?.normalize(topic);
        self.cache.store_topic(topic, epoch, detail.clone());
        Ok(detail)
    }

    /// Chapter the server suggests studying next.
    pub async fn next_chapter(&self) -> Result<Option<NextChapterHint>, SyncError> {
        self.overview().await.map(|snapshot| snapshot.next)
    }

    /// Send one progress observation, retrying per the configured budget.
    pub async fn write(&self, update: ProgressUpdate) -> Result<WriteReceipt, SyncError> {
        self.ensure_live()?;
        if update.topic.trim().is_empty() || update.chapter.trim().is_empty() {
            return Err(SyncError::InvalidInput(
                "topic and chapter must not be empty".into(),
            ));
        }

        self.flusher.track(&update);

        let key = update.key();
        let gate = self.write_locks.entry(key.clone()).or_default().value().clone();
        let outcome = {
            let _serialized = gate.lock().await;
            let payload = update.to_payload();
            self.retrier
                .run(|| self.api.post_progress(payload.clone()))
                .await
        };
        // Two references left (map and `gate`) means nobody else is queued on this key.
        self.write_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 2);
        drop(gate);

        match outcome {
            Ok(receipt) => {
                self.cache.invalidate(&CacheKey::Overview);
                self.cache
                    .invalidate(&CacheKey::Topic(update.topic.clone()));
                debug!(topic = %update.topic, chapter = %update.chapter, "progress saved");
                Ok(receipt)
            }
            Err(err) => {
                warn!(
                    topic = %update.topic,
                    chapter = %update.chapter,
                    attempts = err.attempts,
                    error = %err.last,
                    "progress write failed"
                );
                Err(SyncError::RetriesExhausted {
                    attempts: err.attempts,
                    source: err.last,
                })
            }
        }
    }

    pub(crate) fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    /// Whether the owning session was disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<(), SyncError> {
        if self.is_disposed() {
            Err(SyncError::Disposed)
        } else {
            Ok(())
        }
    }
}

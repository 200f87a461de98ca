/// Connection lifecycle states and transitions.
pub mod connection;
/// Realtime events and their fan-out.
pub mod events;

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    config::SyncConfig,
    dto::progress::ProgressUpdate,
    error::SyncError,
    services::{
        cache::{CacheKey, ReadCache},
        progress_service::ProgressService,
        reading_tracker::ReadingTracker,
        realtime::RealtimeClient,
        retry::Retrier,
        submission::{QuizSession, QuizSubmitter},
        unload::{FlushOutcome, PendingSlot, UnloadFlusher},
    },
    transport::{Beacon, CredentialStore, ProgressApi, channel::Connector},
};
#[cfg(feature = "ws-transport")]
use crate::transport::{beacon::HttpBeacon, http::HttpProgressApi, websocket::WsConnector};

use self::events::{ChannelEvent, EventKind, ListenerId};

/// Session handle shared across tasks.
pub type SharedSession = Arc<SyncSession>;

/// Remote collaborators a session is built from.
pub struct Collaborators {
    /// Request/response endpoints.
    pub api: Arc<dyn ProgressApi>,
    /// Unload-time delivery.
    pub beacon: Arc<dyn Beacon>,
    /// Realtime channel dialer.
    pub connector: Arc<dyn Connector>,
    /// Bearer credential source.
    pub credentials: Arc<dyn CredentialStore>,
}

/// Everything one signed-in client needs to keep progress in sync.
///
/// Owns the pending slot, the unload registration, the read cache, the progress service and the
/// realtime channel. Independent sessions share nothing.
pub struct SyncSession {
    id: Uuid,
    config: SyncConfig,
    api: Arc<dyn ProgressApi>,
    credentials: Arc<dyn CredentialStore>,
    pending: Arc<PendingSlot>,
    flusher: Arc<UnloadFlusher>,
    cache: Arc<ReadCache>,
    progress: Arc<ProgressService>,
    realtime: RealtimeClient,
    listeners: Mutex<Vec<ListenerId>>,
    disposed: AtomicBool,
}

impl SyncSession {
    /// Wire a session from its collaborators. Nothing touches the network yet.
    pub fn new(config: SyncConfig, parts: Collaborators) -> Result<SharedSession, SyncError> {
        let endpoint = config.realtime_url().map_err(|err| {
            SyncError::InvalidInput(format!(
                "cannot derive realtime endpoint from `{}`: {err}",
                config.api_base_url
            ))
        })?;

        let pending = Arc::new(PendingSlot::new());
        let flusher = Arc::new(UnloadFlusher::new(
            pending.clone(),
            parts.beacon,
            parts.api.clone(),
        ));
        let cache = Arc::new(ReadCache::new());
        let progress = Arc::new(ProgressService::new(
            parts.api.clone(),
            cache.clone(),
            flusher.clone(),
            Retrier::from(&config.write_retry),
        ));
        let realtime = RealtimeClient::new(
            endpoint,
            parts.connector,
            parts.credentials.clone(),
            config.realtime.clone(),
        );

        let id = Uuid::new_v4();
        debug!(session = %id, endpoint = %config.api_base_url, "sync session created");
        Ok(Arc::new(Self {
            id,
            config,
            api: parts.api,
            credentials: parts.credentials,
            pending,
            flusher,
            cache,
            progress,
            realtime,
            listeners: Mutex::default(),
            disposed: AtomicBool::new(false),
        }))
    }

    /// Session backed by the HTTP API, the HTTP beacon and the websocket channel.
    ///
    /// The beacon is returned too so the caller can drain it before exiting.
    #[cfg(feature = "ws-transport")]
    pub fn over_http(
        config: SyncConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<(SharedSession, HttpBeacon), SyncError> {
        let api = HttpProgressApi::new(&config, credentials.clone())?;
        let beacon = HttpBeacon::new(&config, credentials.clone())?;
        let session = Self::new(
            config,
            Collaborators {
                api: Arc::new(api),
                beacon: Arc::new(beacon.clone()),
                connector: Arc::new(WsConnector::new()),
                credentials,
            },
        )?;
        Ok((session, beacon))
    }

    /// Connect the realtime channel and let its pushes invalidate cached reads.
    pub fn start(&self) -> Result<(), SyncError> {
        self.ensure_live()?;
        if self.credentials.access_token().is_none() {
            return Err(SyncError::MissingCredential);
        }

        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        if listeners.is_empty() {
            let cache = self.cache.clone();
            listeners.push(self.realtime.on(EventKind::ProgressUpdated, move |event| {
                if let ChannelEvent::ProgressUpdated(update) = event {
                    cache.invalidate(&CacheKey::Overview);
                    cache.invalidate(&CacheKey::Topic(update.topic_id.clone()));
                }
            }));
            let cache = self.cache.clone();
            listeners.push(self.realtime.on(EventKind::QuizCompleted, move |_| {
                cache.invalidate_all();
            }));
        }
        drop(listeners);

        info!(session = %self.id, "starting sync session");
        self.realtime.connect();
        Ok(())
    }

    /// Random identifier used to tell sessions apart in logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Configuration the session was built with.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Read/write progress facade.
    pub fn progress(&self) -> &Arc<ProgressService> {
        &self.progress
    }

    /// Realtime channel client.
    pub fn realtime(&self) -> &RealtimeClient {
        &self.realtime
    }

    /// The update the unload flush would send right now.
    pub fn pending(&self) -> Option<ProgressUpdate> {
        self.pending.latest()
    }

    /// Submitter for one quiz attempt; a successful submission invalidates progress reads.
    pub fn quiz(&self, session: QuizSession) -> QuizSubmitter {
        QuizSubmitter::new(session, self.api.clone(), self.cache.clone())
    }

    /// Start periodic progress reporting for a chapter visit.
    pub fn track_reading(
        &self,
        topic: impl Into<String>,
        chapter: impl Into<String>,
    ) -> Result<ReadingTracker, SyncError> {
        self.ensure_live()?;
        Ok(ReadingTracker::start(
            self.progress.clone(),
            topic,
            chapter,
            &self.config.reading,
        ))
    }

    /// Last-chance flush of the pending update. Never waits for delivery.
    pub fn unload(&self) -> Result<FlushOutcome, SyncError> {
        self.ensure_live()?;
        let outcome = self.flusher.flush();
        debug!(outcome = ?outcome, "unload flush");
        Ok(outcome)
    }

    /// Detach listeners, stop the realtime channel and refuse further work. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for id in listeners {
            self.realtime.off(id);
        }
        self.realtime.disconnect();
        self.progress.dispose();
        info!(session = %self.id, "sync session disposed");
    }

    /// Whether [`SyncSession::dispose`] ran.
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

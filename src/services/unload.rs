use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use tokio::runtime::Handle;
use tracing::debug;

use crate::{
    dto::progress::ProgressUpdate,
    transport::{Beacon, ProgressApi},
};

/// Single slot holding the most recently attempted progress update.
///
/// Overwritten by every write attempt and never cleared.
#[derive(Debug, Default)]
pub struct PendingSlot {
    latest: Mutex<Option<ProgressUpdate>>,
}

impl PendingSlot {
    /// Empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, update: &ProgressUpdate) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(update.clone());
    }

    /// Copy of the pending update, if any write was ever attempted.
    pub fn latest(&self) -> Option<ProgressUpdate> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// What an unload flush ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing pending, or the flusher was never registered.
    Idle,
    /// Handed to the beacon.
    Beacon,
    /// The beacon refused; an ordinary request was started instead.
    Fallback,
    /// Nothing could carry the update.
    Dropped,
}

/// Last-chance delivery of the pending update when the client is torn down.
pub struct UnloadFlusher {
    pending: Arc<PendingSlot>,
    registered: AtomicBool,
    beacon: Arc<dyn Beacon>,
    api: Arc<dyn ProgressApi>,
}

impl UnloadFlusher {
    /// Flusher sending `pending` through `beacon`, or through `api` when the beacon refuses.
    pub fn new(pending: Arc<PendingSlot>, beacon: Arc<dyn Beacon>, api: Arc<dyn ProgressApi>) -> Self {
        Self {
            pending,
            registered: AtomicBool::new(false),
            beacon,
            api,
        }
    }

    /// Arm the unload hook. Only the first call has an effect; returns whether it was that call.
    pub fn register(&self) -> bool {
        let first = !self.registered.swap(true, Ordering::SeqCst);
        if first {
            debug!("unload flush armed");
        }
        first
    }

    /// Whether any write armed the flush.
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Arm the hook and remember `update` as the one to resend on unload.
    pub fn track(&self, update: &ProgressUpdate) {
        self.register();
        self.pending.record(update);
    }

    /// Send the pending update with `force_sync` set, without waiting for the outcome.
    ///
    /// Never fails: delivery problems are logged at debug level and dropped.
    pub fn flush(&self) -> FlushOutcome {
        if !self.is_registered() {
            return FlushOutcome::Idle;
        }
        let Some(update) = self.pending.latest() else {
            return FlushOutcome::Idle;
        };

        let payload = update.with_force_sync(true).to_payload();
        let body = match serde_json::to_string(&payload) {
            Ok(body) => body,
            Err(err) => {
                debug!(error = %err, "failed to serialize pending update");
                return FlushOutcome::Dropped;
            }
        };

        let endpoint = self.api.progress_endpoint();
        if self.beacon.send(&endpoint, body) {
            debug!(
                topic = %payload.topic,
                chapter = %payload.chapter,
                "pending update handed to beacon"
            );
            return FlushOutcome::Beacon;
        }

        let Ok(runtime) = Handle::try_current() else {
            debug!("beacon refused and no runtime available; pending update dropped");
            return FlushOutcome::Dropped;
        };
        let request = self.api.post_progress(payload);
        runtime.spawn(async move {
            if let Err(err) = request.await {
                debug!(error = %err, "fallback unload request failed");
            }
        });
        FlushOutcome::Fallback
    }
}

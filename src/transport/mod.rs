//! Remote collaborators of the sync subsystem: HTTP endpoints, the unload beacon, credentials,
//! and the realtime channel.

pub mod beacon;
pub mod channel;
mod error;
/// Progress and quiz endpoints over HTTP.
pub mod http;
#[cfg(feature = "ws-transport")]
pub mod websocket;

use futures::future::BoxFuture;

use crate::dto::{
    progress::{ProgressPayload, RawProgressSnapshot, RawTopicProgress, WriteReceipt},
    quiz::{QuizSubmitPayload, QuizSubmitResult},
};

pub use error::{TransportError, TransportResult};

/// Request/response endpoints of the learning service used by the sync subsystem.
///
/// Implementations apply their own per-request timeout; callers decide whether to retry.
pub trait ProgressApi: Send + Sync {
    /// Overall progress snapshot.
    fn fetch_overview(&self) -> BoxFuture<'static, TransportResult<RawProgressSnapshot>>;
    /// Detail of one topic.
    fn fetch_topic(&self, topic: &str) -> BoxFuture<'static, TransportResult<RawTopicProgress>>;
    /// Post one progress observation. Repeating an identical observation must be harmless.
    fn post_progress(
        &self,
        payload: ProgressPayload,
    ) -> BoxFuture<'static, TransportResult<WriteReceipt>>;
    /// Submit graded quiz answers.
    fn submit_quiz(
        &self,
        payload: QuizSubmitPayload,
    ) -> BoxFuture<'static, TransportResult<QuizSubmitResult>>;
    /// Absolute URL of the progress write endpoint, used for beacon delivery.
    fn progress_endpoint(&self) -> String;
}

/// Fire-and-forget delivery primitive that keeps going while the client tears down.
pub trait Beacon: Send + Sync {
    /// Queue `body` (JSON) for delivery to `url`. Returns `false` when the beacon refused it.
    fn send(&self, url: &str, body: String) -> bool;
}

/// Source of the bearer credential. The sync subsystem only reads it.
pub trait CredentialStore: Send + Sync {
    /// Current bearer token, if signed in.
    fn access_token(&self) -> Option<String>;
}

/// Credential store holding a fixed token.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    token: Option<String>,
}

impl StaticCredentials {
    /// Store that always returns `token`.
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }
}

impl CredentialStore for StaticCredentials {
    fn access_token(&self) -> Option<String> {
        self.token.clone()
    }
}

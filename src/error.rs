use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced by the synchronization subsystem to its callers.
///
/// Nothing in this crate treats these as fatal: every variant is meant to be reported at the
/// UI boundary and recovered from there.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A single remote call failed.
    #[error("remote call failed")]
    Transport(#[from] TransportError),
    /// A retried write exhausted its attempt budget; `source` is the last failure observed.
    #[error("write failed after {attempts} attempts")]
    RetriesExhausted {
        /// Invocations made before giving up.
        attempts: u32,
        /// Failure of the last attempt.
        #[source]
        source: TransportError,
    },
    /// The server reported that this quiz session was already submitted.
    #[error("quiz session `{session_id}` was already submitted")]
    DuplicateSubmission {
        /// Session the server already graded.
        session_id: String,
    },
    /// No bearer credential is available for an operation that requires one.
    #[error("no credential available")]
    MissingCredential,
    /// Caller supplied an input that cannot be sent.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The session was disposed and no longer accepts work.
    #[error("sync session has been disposed")]
    Disposed,
}

impl SyncError {
    /// Whether the failure came from the network (as opposed to local validation or lifecycle).
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_) | SyncError::RetriesExhausted { .. }
        )
    }
}

//! Resilient progress synchronization for the learning platform client: retried writes, unload
//! flushing, a self-healing realtime channel, and guarded quiz submission.

pub mod config;
pub mod dto;
/// Error type returned by the public API.
pub mod error;
/// Retry, unload, realtime, submission and progress services.
pub mod services;
/// Session context and realtime state.
pub mod state;
#[cfg(test)]
mod testing;
pub mod transport;

pub use config::SyncConfig;
pub use error::SyncError;
pub use state::{Collaborators, SharedSession, SyncSession};

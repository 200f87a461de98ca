//! Wire and view models exchanged with the remote learning service.

/// Progress writes, snapshots and their raw server shapes.
pub mod progress;
/// Quiz submission payloads and results.
pub mod quiz;
/// Realtime push envelopes.
pub mod ws;

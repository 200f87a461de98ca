/// Exponential backoff with optional jitter.
pub mod backoff;
/// Read cache with explicit invalidation.
pub mod cache;
/// Progress read/write facade.
pub mod progress_service;
/// Periodic progress reporting for a chapter visit.
pub mod reading_tracker;
/// Realtime channel client with automatic reconnection.
pub mod realtime;
/// Bounded retries for idempotent writes.
pub mod retry;
/// At-most-one-in-flight guard for quiz submissions.
pub mod submission;
/// Last-chance delivery of the pending update on teardown.
pub mod unload;

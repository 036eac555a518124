//! Error types for `cadence-engine`.
//!
//! Store errors are boxed: the engine is generic over the backend and only
//! needs to report them, never to match on them.

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The only failure [`Dispatcher::fire_event`](crate::Dispatcher::fire_event)
/// propagates. Everything after the event is appended is best-effort.
#[derive(Debug, Error)]
pub enum DispatchError {
  #[error("failed to append event: {0}")]
  EventLog(#[source] BoxError),
}

#[derive(Debug, Error)]
pub enum SweepError {
  #[error("failed to load due sends: {0}")]
  Store(#[source] BoxError),
}

//! Fire-and-forget analytics sink (tracking pixel, conversion API, ...).

use std::future::Future;

use thiserror::Error;

use crate::event::EventType;

#[derive(Debug, Error)]
#[error("analytics sink error: {0}")]
pub struct AnalyticsError(pub String);

/// Receives a copy of every logged event. Failures are logged by the caller
/// and otherwise ignored.
pub trait AnalyticsSink: Send + Sync {
  fn notify<'a>(
    &'a self,
    event_type: EventType,
    payload: &'a serde_json::Value,
  ) -> impl Future<Output = Result<(), AnalyticsError>> + Send + 'a;
}

/// A sink that accepts and discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAnalytics;

impl AnalyticsSink for NoopAnalytics {
  async fn notify(
    &self,
    _event_type: EventType,
    _payload: &serde_json::Value,
  ) -> Result<(), AnalyticsError> {
    Ok(())
  }
}

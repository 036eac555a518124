//! HTTP analytics forwarder.

use std::time::Duration;

use cadence_core::{
  analytics::{AnalyticsError, AnalyticsSink, NoopAnalytics},
  event::EventType,
};
use serde_json::json;

use crate::{AnalyticsConfig, error::Error};

/// POSTs `{"event": ..., "payload": ...}` to a collector endpoint.
#[derive(Clone)]
pub struct HttpAnalytics {
  client:   reqwest::Client,
  endpoint: String,
}

impl HttpAnalytics {
  pub fn new(config: &AnalyticsConfig) -> Result<Self, Error> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_millis(config.timeout_ms))
      .build()?;
    Ok(Self { client, endpoint: config.endpoint.clone() })
  }
}

impl AnalyticsSink for HttpAnalytics {
  async fn notify(
    &self,
    event_type: EventType,
    payload: &serde_json::Value,
  ) -> Result<(), AnalyticsError> {
    self
      .client
      .post(&self.endpoint)
      .json(&json!({ "event": event_type.as_str(), "payload": payload }))
      .send()
      .await
      .and_then(|r| r.error_for_status())
      .map_err(|e| AnalyticsError(e.to_string()))?;
    Ok(())
  }
}

#[derive(Clone)]
pub enum Analytics {
  Http(HttpAnalytics),
  Noop(NoopAnalytics),
}

impl Analytics {
  pub fn from_config(config: Option<&AnalyticsConfig>) -> Result<Self, Error> {
    match config {
      Some(c) => Ok(Self::Http(HttpAnalytics::new(c)?)),
      None => Ok(Self::Noop(NoopAnalytics)),
    }
  }
}

impl AnalyticsSink for Analytics {
  async fn notify(
    &self,
    event_type: EventType,
    payload: &serde_json::Value,
  ) -> Result<(), AnalyticsError> {
    match self {
      Self::Http(a) => a.notify(event_type, payload).await,
      Self::Noop(a) => a.notify(event_type, payload).await,
    }
  }
}

//! The scheduled-send sweeper.
//!
//! [`Sweeper::process_due`] is the one entry point for draining the queue. It
//! is safe to run from any number of places at once: every send is claimed
//! with a single conditional write before the mail goes out, and only the
//! claimant may stamp it sent.

use std::sync::Arc;

use cadence_core::{
  mail::{MailTransport, OutgoingMail},
  rule::EmailContent,
  schedule::{ClaimRequest, FailureOutcome, ScheduledSend},
  store::CrmStore,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  clock::{Clock, SystemClock},
  error::SweepError,
};

/// One year; longer leases are clamped.
const MAX_LEASE_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
  /// Sends drained per pass.
  pub batch_size:    usize,
  /// Seconds after which an unfinished claim is considered abandoned.
  pub lease_secs:    u64,
  /// Failed attempts after which a send is given up on.
  pub max_attempts:  u32,
  /// Seconds between background passes in the server.
  pub interval_secs: u64,
}

impl Default for SweepConfig {
  fn default() -> Self {
    Self { batch_size: 20, lease_secs: 300, max_attempts: 5, interval_secs: 60 }
  }
}

impl SweepConfig {
  fn lease(&self) -> Duration {
    Duration::seconds(self.lease_secs.min(MAX_LEASE_SECS) as i64)
  }
}

/// Per-pass tallies. `claimed == sent + failed`; `skipped` counts rows that
/// were due but lost to another sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
  pub claimed: usize,
  pub sent:    usize,
  pub failed:  usize,
  pub skipped: usize,
}

enum Delivery {
  Sent,
  Failed,
  Skipped,
}

pub struct Sweeper<S, M> {
  store:  Arc<S>,
  mail:   Arc<M>,
  clock:  Arc<dyn Clock>,
  config: SweepConfig,
}

impl<S, M> Clone for Sweeper<S, M> {
  fn clone(&self) -> Self {
    Self {
      store:  self.store.clone(),
      mail:   self.mail.clone(),
      clock:  self.clock.clone(),
      config: self.config,
    }
  }
}

impl<S, M> Sweeper<S, M>
where
  S: CrmStore,
  M: MailTransport,
{
  pub fn new(store: Arc<S>, mail: Arc<M>, config: SweepConfig) -> Self {
    Self { store, mail, clock: Arc::new(SystemClock), config }
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn config(&self) -> SweepConfig { self.config }

  /// One pass with the configured batch size.
  pub async fn run(&self) -> Result<SweepReport, SweepError> {
    self.process_due(self.config.batch_size).await
  }

  /// Claim and send up to `limit` due sends.
  ///
  /// Only the initial selection can fail; per-send problems are recorded on
  /// the row and reflected in the report.
  pub async fn process_due(&self, limit: usize) -> Result<SweepReport, SweepError> {
    let now = self.clock.now();
    let stale_before = now - self.config.lease();

    let due = self
      .store
      .due_sends(now, stale_before, limit)
      .await
      .map_err(|e| SweepError::Store(Box::new(e)))?;

    if due.is_empty() {
      return Ok(SweepReport::default());
    }

    let deliveries = due.into_iter().map(|send| self.deliver(send, now, stale_before));
    let mut report = SweepReport::default();
    for delivery in futures::future::join_all(deliveries).await {
      match delivery {
        Delivery::Sent => report.sent += 1,
        Delivery::Failed => report.failed += 1,
        Delivery::Skipped => report.skipped += 1,
      }
    }
    report.claimed = report.sent + report.failed;

    info!(
      claimed = report.claimed,
      sent = report.sent,
      failed = report.failed,
      skipped = report.skipped,
      "sweep finished"
    );
    Ok(report)
  }

  async fn deliver(
    &self,
    send: ScheduledSend,
    now: DateTime<Utc>,
    stale_before: DateTime<Utc>,
  ) -> Delivery {
    let claim = ClaimRequest { send_id: send.send_id, token: Uuid::new_v4(), now, stale_before };

    match self.store.claim_send(claim).await {
      Ok(true) => {}
      Ok(false) => {
        debug!(send_id = %send.send_id, "send claimed elsewhere");
        return Delivery::Skipped;
      }
      Err(e) => {
        warn!(send_id = %send.send_id, error = %e, "claim failed");
        return Delivery::Skipped;
      }
    }

    let mail = OutgoingMail::new(send.to_email, EmailContent {
      subject: send.subject,
      body:    send.body,
    });

    match self.mail.send(&mail).await {
      Ok(()) => {
        match self.store.complete_send(send.send_id, claim.token, self.clock.now()).await {
          Ok(true) => debug!(send_id = %send.send_id, to = %mail.to, "scheduled send delivered"),
          Ok(false) => warn!(send_id = %send.send_id, "claim lapsed before the send was stamped"),
          Err(e) => warn!(send_id = %send.send_id, error = %e, "failed to stamp send"),
        }
        Delivery::Sent
      }
      Err(err) => {
        let outcome = self
          .store
          .fail_send(
            send.send_id,
            claim.token,
            err.to_string(),
            self.config.max_attempts,
            self.clock.now(),
          )
          .await;
        match outcome {
          Ok(FailureOutcome::Requeued { attempts }) => {
            warn!(send_id = %send.send_id, attempts, error = %err, "send failed, will retry");
          }
          Ok(FailureOutcome::GaveUp { attempts }) => {
            warn!(send_id = %send.send_id, attempts, error = %err, "send failed, giving up");
          }
          Ok(FailureOutcome::NotOwned) => {
            warn!(send_id = %send.send_id, error = %err, "send failed after its claim lapsed");
          }
          Err(e) => warn!(send_id = %send.send_id, error = %e, "failed to record send failure"),
        }
        Delivery::Failed
      }
    }
  }
}

//! Scheduled sends (durable, due-time-stamped pending emails) and sequence
//! enrollments.
//!
//! A scheduled send moves through three observable states:
//!
//! | `sent_at` | `claimed_at` | Meaning |
//! |-----------|--------------|---------|
//! | `None`    | `None` or stale | pending, eligible once due |
//! | `None`    | recent       | claimed by a sweep that is sending it |
//! | `Some`    | n/a          | terminal; never touched again |
//!
//! A claim that outlives its lease is treated as abandoned so the row is sent
//! again: delivery is at-least-once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rule::EmailContent;

/// The rule a scheduled send was materialised from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SendOrigin {
  Automation {
    automation_id: Uuid,
  },
  Sequence {
    enrollment_id: Uuid,
    sequence_id:   Uuid,
    step_order:    u32,
  },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledSend {
  pub send_id:    Uuid,
  pub origin:     SendOrigin,
  pub contact_id: Uuid,
  pub to_email:   String,
  pub subject:    String,
  pub body:       String,
  pub due_at:     DateTime<Utc>,
  pub sent_at:    Option<DateTime<Utc>>,
  pub claimed_at: Option<DateTime<Utc>>,
  /// Failed delivery attempts so far.
  pub attempts:   u32,
  pub last_error: Option<String>,
  pub created_at: DateTime<Utc>,
}

impl ScheduledSend {
  pub fn is_pending(&self) -> bool { self.sent_at.is_none() }

  pub fn is_due(&self, now: DateTime<Utc>) -> bool {
    self.is_pending() && self.due_at <= now
  }
}

/// Input to [`crate::store::CrmStore::schedule_send`].
#[derive(Debug, Clone)]
pub struct NewScheduledSend {
  pub automation_id: Uuid,
  pub contact_id:    Uuid,
  pub to_email:      String,
  pub content:       EmailContent,
  pub due_at:        DateTime<Utc>,
  pub created_at:    DateTime<Utc>,
}

/// Filter for listing scheduled sends on the administrative surface.
#[derive(Debug, Clone, Default)]
pub struct SendQuery {
  pub pending_only: bool,
  pub contact_id:   Option<Uuid>,
  pub limit:        Option<usize>,
  pub offset:       Option<usize>,
}

/// Bookkeeping for one claim attempt. The token identifies the claimant in the
/// follow-up `complete` / `fail` writes.
#[derive(Debug, Clone, Copy)]
pub struct ClaimRequest {
  pub send_id:      Uuid,
  pub token:        Uuid,
  pub now:          DateTime<Utc>,
  /// Claims taken at or before this instant are considered abandoned.
  pub stale_before: DateTime<Utc>,
}

/// What happened to a scheduled send after a failed delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailureOutcome {
  /// Claim released; a later sweep will try again.
  Requeued { attempts: u32 },
  /// Out of attempts; the row was stamped terminal.
  GaveUp { attempts: u32 },
  /// The claim had already been lost to another sweeper.
  NotOwned,
}

// ─── Enrollment ──────────────────────────────────────────────────────────────

/// A contact's membership in a sequence. At most one per (sequence, contact).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
  pub enrollment_id: Uuid,
  pub sequence_id:   Uuid,
  pub contact_id:    Uuid,
  pub enrolled_at:   DateTime<Utc>,
}

/// One step of an enrollment, with its due time already computed.
#[derive(Debug, Clone)]
pub struct PlannedStep {
  pub step_order: u32,
  pub content:    EmailContent,
  pub due_at:     DateTime<Utc>,
}

/// Input to [`crate::store::CrmStore::enroll`]. The enrollment and all of its
/// sends are written in one transaction.
#[derive(Debug, Clone)]
pub struct NewEnrollment {
  pub sequence_id: Uuid,
  pub contact_id:  Uuid,
  pub to_email:    String,
  pub enrolled_at: DateTime<Utc>,
  pub steps:       Vec<PlannedStep>,
}

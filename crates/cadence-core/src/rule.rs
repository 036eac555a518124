//! Configured rules: automations, sequences, and the templates automations
//! may borrow their content from.
//!
//! Rules are written by administrators through the `*Draft` types, which carry
//! all write-path validation. Once persisted, a rule is trusted as-is by the
//! dispatcher.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, event::EventType};

/// Upper bounds on step delays; anything larger is almost certainly a typo.
pub const MAX_STEP_DELAY_DAYS: u32 = 3650;
pub const MAX_STEP_DELAY_HOURS: u32 = 8760;
/// One year, in minutes.
pub const MAX_AUTOMATION_DELAY_MINUTES: u32 = 525_600;

fn require(field: &'static str, value: &str) -> Result<()> {
  if value.trim().is_empty() {
    return Err(Error::invalid(field, "must not be empty"));
  }
  Ok(())
}

// ─── Content ─────────────────────────────────────────────────────────────────

/// The subject and HTML body of one email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailContent {
  pub subject: String,
  pub body:    String,
}

impl EmailContent {
  /// True when either part is empty or whitespace.
  pub fn is_blank(&self) -> bool {
    self.subject.trim().is_empty() || self.body.trim().is_empty()
  }
}

// ─── Templates ───────────────────────────────────────────────────────────────

/// Reusable email content referenced by automations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailTemplate {
  pub template_id: Uuid,
  pub name:        String,
  pub subject:     String,
  pub body:        String,
  pub created_at:  DateTime<Utc>,
  pub updated_at:  DateTime<Utc>,
}

impl EmailTemplate {
  pub fn content(&self) -> EmailContent {
    EmailContent { subject: self.subject.clone(), body: self.body.clone() }
  }
}

#[derive(Debug, Clone)]
pub struct TemplateDraft {
  pub name:    String,
  pub subject: String,
  pub body:    String,
}

impl TemplateDraft {
  pub fn validate(&self) -> Result<()> {
    require("name", &self.name)?;
    require("subject", &self.subject)?;
    require("body", &self.body)
  }
}

// ─── Automations ─────────────────────────────────────────────────────────────

/// A single-step rule: trigger → one email, optionally delayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Automation {
  pub automation_id: Uuid,
  pub name:          String,
  pub trigger:       EventType,
  /// Zero sends inline with the event; anything else goes through the queue.
  pub delay_minutes: u32,
  pub subject:       String,
  pub body:          String,
  /// When set, the template's subject and body replace the ones above.
  pub template_id:   Option<Uuid>,
  pub active:        bool,
  pub created_at:    DateTime<Utc>,
  pub updated_at:    DateTime<Utc>,
}

impl Automation {
  pub fn is_immediate(&self) -> bool { self.delay_minutes == 0 }

  pub fn delay(&self) -> Duration { Duration::minutes(i64::from(self.delay_minutes)) }

  /// The content this automation sends, given its template (if one was
  /// configured and could be loaded).
  pub fn content_with(&self, template: Option<&EmailTemplate>) -> EmailContent {
    match template {
      Some(t) => t.content(),
      None => EmailContent { subject: self.subject.clone(), body: self.body.clone() },
    }
  }
}

/// Input to automation create and update.
#[derive(Debug, Clone)]
pub struct AutomationDraft {
  pub name:          String,
  pub trigger:       EventType,
  pub delay_minutes: u32,
  pub subject:       String,
  pub body:          String,
  pub template_id:   Option<Uuid>,
  pub active:        bool,
}

impl AutomationDraft {
  /// Field-level checks. Whether `template_id` points at an existing template
  /// is checked by the store, which owns that knowledge.
  pub fn validate(&self) -> Result<()> {
    require("name", &self.name)?;
    if self.delay_minutes > MAX_AUTOMATION_DELAY_MINUTES {
      return Err(Error::invalid(
        "delay_minutes",
        format!("must be at most {MAX_AUTOMATION_DELAY_MINUTES}"),
      ));
    }
    if self.template_id.is_none() {
      require("subject", &self.subject)?;
      require("body", &self.body)?;
    }
    Ok(())
  }
}

// ─── Sequences ───────────────────────────────────────────────────────────────

/// One timed email within a [`Sequence`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceStep {
  /// 0-based and dense within its sequence.
  pub order:       u32,
  pub delay_days:  u32,
  pub delay_hours: u32,
  pub subject:     String,
  pub body:        String,
}

impl SequenceStep {
  /// Offset from the enrollment instant at which this step is due.
  pub fn offset(&self) -> Duration {
    Duration::days(i64::from(self.delay_days)) + Duration::hours(i64::from(self.delay_hours))
  }

  pub fn content(&self) -> EmailContent {
    EmailContent { subject: self.subject.clone(), body: self.body.clone() }
  }
}

/// A multi-step drip rule: trigger → ordered list of timed emails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequence {
  pub sequence_id: Uuid,
  pub name:        String,
  pub trigger:     EventType,
  pub active:      bool,
  /// Sorted by `order`.
  pub steps:       Vec<SequenceStep>,
  pub created_at:  DateTime<Utc>,
  pub updated_at:  DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StepDraft {
  pub delay_days:  u32,
  pub delay_hours: u32,
  pub subject:     String,
  pub body:        String,
}

/// Input to sequence create and replace. Steps are ordered by position; the
/// full list always replaces whatever was stored before.
#[derive(Debug, Clone)]
pub struct SequenceDraft {
  pub name:    String,
  pub trigger: EventType,
  pub active:  bool,
  pub steps:   Vec<StepDraft>,
}

impl SequenceDraft {
  pub fn validate(&self) -> Result<()> {
    require("name", &self.name)?;
    if self.steps.is_empty() {
      return Err(Error::invalid("steps", "a sequence needs at least one step"));
    }
    for step in &self.steps {
      require("steps.subject", &step.subject)?;
      require("steps.body", &step.body)?;
      if step.delay_days > MAX_STEP_DELAY_DAYS {
        return Err(Error::invalid(
          "steps.delay_days",
          format!("must be at most {MAX_STEP_DELAY_DAYS}"),
        ));
      }
      if step.delay_hours > MAX_STEP_DELAY_HOURS {
        return Err(Error::invalid(
          "steps.delay_hours",
          format!("must be at most {MAX_STEP_DELAY_HOURS}"),
        ));
      }
    }
    Ok(())
  }

  /// Number the steps densely from zero, in the order given.
  pub fn numbered_steps(&self) -> Vec<SequenceStep> {
    self
      .steps
      .iter()
      .zip(0u32..)
      .map(|(s, order)| SequenceStep {
        order,
        delay_days: s.delay_days,
        delay_hours: s.delay_hours,
        subject: s.subject.clone(),
        body: s.body.clone(),
      })
      .collect()
  }
}

//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as fixed-width RFC 3339 strings (microsecond
//! precision, `Z` suffix) so that lexicographic comparison in SQL matches
//! chronological order. UUIDs are stored as hyphenated lowercase strings.

use cadence_core::{
  contact::Contact,
  event::{Event, EventType, Metadata},
  rule::{Automation, EmailTemplate, SequenceStep},
  schedule::{ScheduledSend, SendOrigin},
};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

fn decode_opt_uuid(s: Option<String>) -> Result<Option<Uuid>> {
  s.as_deref().map(decode_uuid).transpose()
}

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

// ─── EventType ───────────────────────────────────────────────────────────────

pub fn encode_event_type(t: EventType) -> &'static str { t.as_str() }

pub fn decode_event_type(column: &'static str, s: &str) -> Result<EventType> {
  s.parse().map_err(|_| Error::Decode { column, value: s.to_owned() })
}

// ─── Metadata ────────────────────────────────────────────────────────────────

pub fn encode_metadata(m: &Metadata) -> Result<String> { Ok(serde_json::to_string(m)?) }

pub fn decode_metadata(s: &str) -> Result<Metadata> { Ok(serde_json::from_str(s)?) }

// ─── Integers ────────────────────────────────────────────────────────────────

fn decode_u32(column: &'static str, v: i64) -> Result<u32> {
  u32::try_from(v).map_err(|_| Error::Decode { column, value: v.to_string() })
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const CONTACT_COLUMNS: &str =
  "contact_id, email, user_id, name, role, created_at, updated_at";

/// Raw strings read directly from a `contacts` row.
pub struct RawContact {
  pub contact_id: String,
  pub email:      String,
  pub user_id:    Option<String>,
  pub name:       Option<String>,
  pub role:       Option<String>,
  pub created_at: String,
  pub updated_at: String,
}

impl RawContact {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      contact_id: row.get(0)?,
      email:      row.get(1)?,
      user_id:    row.get(2)?,
      name:       row.get(3)?,
      role:       row.get(4)?,
      created_at: row.get(5)?,
      updated_at: row.get(6)?,
    })
  }

  pub fn into_contact(self) -> Result<Contact> {
    Ok(Contact {
      contact_id: decode_uuid(&self.contact_id)?,
      email:      self.email,
      user_id:    self.user_id,
      name:       self.name,
      role:       self.role,
      created_at: decode_dt(&self.created_at)?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

pub const EVENT_COLUMNS: &str =
  "event_id, event_type, actor_user_id, subject_audio_id, contact_id, metadata, created_at";

/// Raw strings read directly from an `events` row.
pub struct RawEvent {
  pub event_id:         String,
  pub event_type:       String,
  pub actor_user_id:    Option<String>,
  pub subject_audio_id: Option<String>,
  pub contact_id:       Option<String>,
  pub metadata:         String,
  pub created_at:       String,
}

impl RawEvent {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      event_id:         row.get(0)?,
      event_type:       row.get(1)?,
      actor_user_id:    row.get(2)?,
      subject_audio_id: row.get(3)?,
      contact_id:       row.get(4)?,
      metadata:         row.get(5)?,
      created_at:       row.get(6)?,
    })
  }

  pub fn into_event(self) -> Result<Event> {
    Ok(Event {
      event_id:         decode_uuid(&self.event_id)?,
      event_type:       decode_event_type("events.event_type", &self.event_type)?,
      actor_user_id:    self.actor_user_id,
      subject_audio_id: self.subject_audio_id,
      contact_id:       decode_opt_uuid(self.contact_id)?,
      metadata:         decode_metadata(&self.metadata)?,
      created_at:       decode_dt(&self.created_at)?,
    })
  }
}

pub const TEMPLATE_COLUMNS: &str = "template_id, name, subject, body, created_at, updated_at";

pub struct RawTemplate {
  pub template_id: String,
  pub name:        String,
  pub subject:     String,
  pub body:        String,
  pub created_at:  String,
  pub updated_at:  String,
}

impl RawTemplate {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      template_id: row.get(0)?,
      name:        row.get(1)?,
      subject:     row.get(2)?,
      body:        row.get(3)?,
      created_at:  row.get(4)?,
      updated_at:  row.get(5)?,
    })
  }

  pub fn into_template(self) -> Result<EmailTemplate> {
    Ok(EmailTemplate {
      template_id: decode_uuid(&self.template_id)?,
      name:        self.name,
      subject:     self.subject,
      body:        self.body,
      created_at:  decode_dt(&self.created_at)?,
      updated_at:  decode_dt(&self.updated_at)?,
    })
  }
}

pub const AUTOMATION_COLUMNS: &str = "automation_id, name, trigger_type, delay_minutes, subject, \
                                      body, template_id, active, created_at, updated_at";

pub struct RawAutomation {
  pub automation_id: String,
  pub name:          String,
  pub trigger:       String,
  pub delay_minutes: i64,
  pub subject:       String,
  pub body:          String,
  pub template_id:   Option<String>,
  pub active:        bool,
  pub created_at:    String,
  pub updated_at:    String,
}

impl RawAutomation {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      automation_id: row.get(0)?,
      name:          row.get(1)?,
      trigger:       row.get(2)?,
      delay_minutes: row.get(3)?,
      subject:       row.get(4)?,
      body:          row.get(5)?,
      template_id:   row.get(6)?,
      active:        row.get(7)?,
      created_at:    row.get(8)?,
      updated_at:    row.get(9)?,
    })
  }

  pub fn into_automation(self) -> Result<Automation> {
    Ok(Automation {
      automation_id: decode_uuid(&self.automation_id)?,
      name:          self.name,
      trigger:       decode_event_type("automations.trigger", &self.trigger)?,
      delay_minutes: decode_u32("automations.delay_minutes", self.delay_minutes)?,
      subject:       self.subject,
      body:          self.body,
      template_id:   decode_opt_uuid(self.template_id)?,
      active:        self.active,
      created_at:    decode_dt(&self.created_at)?,
      updated_at:    decode_dt(&self.updated_at)?,
    })
  }
}

pub const SEQUENCE_COLUMNS: &str = "sequence_id, name, trigger_type, active, created_at, updated_at";

/// A `sequences` row; steps are loaded separately and attached.
pub struct RawSequence {
  pub sequence_id: String,
  pub name:        String,
  pub trigger:     String,
  pub active:      bool,
  pub created_at:  String,
  pub updated_at:  String,
  pub steps:       Vec<RawStep>,
}

impl RawSequence {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      sequence_id: row.get(0)?,
      name:        row.get(1)?,
      trigger:     row.get(2)?,
      active:      row.get(3)?,
      created_at:  row.get(4)?,
      updated_at:  row.get(5)?,
      steps:       Vec::new(),
    })
  }

  pub fn into_sequence(self) -> Result<cadence_core::rule::Sequence> {
    Ok(cadence_core::rule::Sequence {
      sequence_id: decode_uuid(&self.sequence_id)?,
      name:        self.name,
      trigger:     decode_event_type("sequences.trigger", &self.trigger)?,
      active:      self.active,
      steps:       self
        .steps
        .into_iter()
        .map(RawStep::into_step)
        .collect::<Result<_>>()?,
      created_at:  decode_dt(&self.created_at)?,
      updated_at:  decode_dt(&self.updated_at)?,
    })
  }
}

pub const STEP_COLUMNS: &str = "step_order, delay_days, delay_hours, subject, body";

pub struct RawStep {
  pub step_order:  i64,
  pub delay_days:  i64,
  pub delay_hours: i64,
  pub subject:     String,
  pub body:        String,
}

impl RawStep {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      step_order:  row.get(0)?,
      delay_days:  row.get(1)?,
      delay_hours: row.get(2)?,
      subject:     row.get(3)?,
      body:        row.get(4)?,
    })
  }

  pub fn into_step(self) -> Result<SequenceStep> {
    Ok(SequenceStep {
      order:       decode_u32("sequence_steps.step_order", self.step_order)?,
      delay_days:  decode_u32("sequence_steps.delay_days", self.delay_days)?,
      delay_hours: decode_u32("sequence_steps.delay_hours", self.delay_hours)?,
      subject:     self.subject,
      body:        self.body,
    })
  }
}

pub const SEND_COLUMNS: &str = "send_id, automation_id, enrollment_id, sequence_id, step_order, \
                                contact_id, to_email, subject, body, due_at, sent_at, \
                                claimed_at, attempts, last_error, created_at";

/// Raw strings read directly from a `scheduled_sends` row.
pub struct RawSend {
  pub send_id:       String,
  pub automation_id: Option<String>,
  pub enrollment_id: Option<String>,
  pub sequence_id:   Option<String>,
  pub step_order:    Option<i64>,
  pub contact_id:    String,
  pub to_email:      String,
  pub subject:       String,
  pub body:          String,
  pub due_at:        String,
  pub sent_at:       Option<String>,
  pub claimed_at:    Option<String>,
  pub attempts:      i64,
  pub last_error:    Option<String>,
  pub created_at:    String,
}

impl RawSend {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      send_id:       row.get(0)?,
      automation_id: row.get(1)?,
      enrollment_id: row.get(2)?,
      sequence_id:   row.get(3)?,
      step_order:    row.get(4)?,
      contact_id:    row.get(5)?,
      to_email:      row.get(6)?,
      subject:       row.get(7)?,
      body:          row.get(8)?,
      due_at:        row.get(9)?,
      sent_at:       row.get(10)?,
      claimed_at:    row.get(11)?,
      attempts:      row.get(12)?,
      last_error:    row.get(13)?,
      created_at:    row.get(14)?,
    })
  }

  fn origin(&self) -> Result<SendOrigin> {
    match (&self.automation_id, &self.enrollment_id, &self.sequence_id, self.step_order) {
      (Some(a), None, _, _) => Ok(SendOrigin::Automation { automation_id: decode_uuid(a)? }),
      (None, Some(e), Some(s), Some(order)) => Ok(SendOrigin::Sequence {
        enrollment_id: decode_uuid(e)?,
        sequence_id:   decode_uuid(s)?,
        step_order:    decode_u32("scheduled_sends.step_order", order)?,
      }),
      _ => Err(Error::Decode {
        column: "scheduled_sends.origin",
        value:  self.send_id.clone(),
      }),
    }
  }

  pub fn into_send(self) -> Result<ScheduledSend> {
    let origin = self.origin()?;
    Ok(ScheduledSend {
      send_id: decode_uuid(&self.send_id)?,
      origin,
      contact_id: decode_uuid(&self.contact_id)?,
      to_email: self.to_email,
      subject: self.subject,
      body: self.body,
      due_at: decode_dt(&self.due_at)?,
      sent_at: decode_opt_dt(self.sent_at)?,
      claimed_at: decode_opt_dt(self.claimed_at)?,
      attempts: decode_u32("scheduled_sends.attempts", self.attempts)?,
      last_error: self.last_error,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

/// Column values for inserting a [`ScheduledSend`]: origin split into its
/// nullable columns.
pub fn origin_columns(
  origin: &SendOrigin,
) -> (Option<String>, Option<String>, Option<String>, Option<i64>) {
  match origin {
    SendOrigin::Automation { automation_id } => (Some(encode_uuid(*automation_id)), None, None, None),
    SendOrigin::Sequence { enrollment_id, sequence_id, step_order } => (
      None,
      Some(encode_uuid(*enrollment_id)),
      Some(encode_uuid(*sequence_id)),
      Some(i64::from(*step_order)),
    ),
  }
}

//! The `CrmStore` trait.
//!
//! The trait is implemented by storage backends (e.g. `cadence-store-sqlite`).
//! The engine and the HTTP layer depend on this abstraction, not on any
//! concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  contact::{Contact, ContactWrite},
  event::{Event, EventQuery, EventType, NewEvent},
  rule::{Automation, AutomationDraft, EmailTemplate, Sequence, SequenceDraft, TemplateDraft},
  schedule::{
    ClaimRequest, Enrollment, FailureOutcome, NewEnrollment, NewScheduledSend, ScheduledSend,
    SendQuery,
  },
};

/// Abstraction over the CRM persistence backend.
///
/// Events are append-only. Scheduled sends are only ever moved forward
/// (pending → claimed → sent); the claim is the single conditional write that
/// guards against duplicate delivery.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait CrmStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Event log ─────────────────────────────────────────────────────────

  /// Append an event. Never updates or deletes.
  fn append_event(
    &self,
    input: NewEvent,
  ) -> impl Future<Output = Result<Event, Self::Error>> + Send + '_;

  /// Newest first.
  fn list_events<'a>(
    &'a self,
    query: &'a EventQuery,
  ) -> impl Future<Output = Result<Vec<Event>, Self::Error>> + Send + 'a;

  // ── Contacts ──────────────────────────────────────────────────────────

  fn get_contact(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Contact>, Self::Error>> + Send + '_;

  fn find_contact_by_user<'a>(
    &'a self,
    user_id: &'a str,
  ) -> impl Future<Output = Result<Option<Contact>, Self::Error>> + Send + 'a;

  /// `email` must already be normalised.
  fn find_contact_by_email<'a>(
    &'a self,
    email: &'a str,
  ) -> impl Future<Output = Result<Option<Contact>, Self::Error>> + Send + 'a;

  fn list_contacts(
    &self,
    limit: usize,
    offset: usize,
  ) -> impl Future<Output = Result<Vec<Contact>, Self::Error>> + Send + '_;

  /// Apply a resolver decision as one atomic write and return the stored
  /// contact.
  fn write_contact(
    &self,
    write: ContactWrite,
  ) -> impl Future<Output = Result<Contact, Self::Error>> + Send + '_;

  // ── Templates ─────────────────────────────────────────────────────────

  fn create_template(
    &self,
    draft: TemplateDraft,
  ) -> impl Future<Output = Result<EmailTemplate, Self::Error>> + Send + '_;

  fn get_template(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<EmailTemplate>, Self::Error>> + Send + '_;

  fn list_templates(
    &self,
  ) -> impl Future<Output = Result<Vec<EmailTemplate>, Self::Error>> + Send + '_;

  /// Returns `None` if the template does not exist.
  fn update_template(
    &self,
    id: Uuid,
    draft: TemplateDraft,
  ) -> impl Future<Output = Result<Option<EmailTemplate>, Self::Error>> + Send + '_;

  /// Refused while any automation still references the template.
  fn delete_template(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Automations ───────────────────────────────────────────────────────

  /// Validates the draft, including that a referenced template exists.
  fn create_automation(
    &self,
    draft: AutomationDraft,
  ) -> impl Future<Output = Result<Automation, Self::Error>> + Send + '_;

  fn get_automation(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Automation>, Self::Error>> + Send + '_;

  fn list_automations(
    &self,
  ) -> impl Future<Output = Result<Vec<Automation>, Self::Error>> + Send + '_;

  /// Replace the definition. Already-materialised scheduled sends are left
  /// untouched, including when the automation is deactivated.
  fn update_automation(
    &self,
    id: Uuid,
    draft: AutomationDraft,
  ) -> impl Future<Output = Result<Option<Automation>, Self::Error>> + Send + '_;

  fn delete_automation(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Active automations for `trigger`; the only read the dispatcher makes.
  fn active_automations(
    &self,
    trigger: EventType,
  ) -> impl Future<Output = Result<Vec<Automation>, Self::Error>> + Send + '_;

  // ── Sequences ─────────────────────────────────────────────────────────

  fn create_sequence(
    &self,
    draft: SequenceDraft,
  ) -> impl Future<Output = Result<Sequence, Self::Error>> + Send + '_;

  fn get_sequence(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Sequence>, Self::Error>> + Send + '_;

  fn list_sequences(
    &self,
  ) -> impl Future<Output = Result<Vec<Sequence>, Self::Error>> + Send + '_;

  /// Replace the sequence definition and its entire step list in one
  /// transaction. Partial step updates are not supported.
  fn replace_sequence(
    &self,
    id: Uuid,
    draft: SequenceDraft,
  ) -> impl Future<Output = Result<Option<Sequence>, Self::Error>> + Send + '_;

  fn delete_sequence(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn active_sequences(
    &self,
    trigger: EventType,
  ) -> impl Future<Output = Result<Vec<Sequence>, Self::Error>> + Send + '_;

  // ── Enrollment ────────────────────────────────────────────────────────

  /// Insert the enrollment and one scheduled send per planned step in a
  /// single transaction. Returns `None`, writing nothing, if the contact is
  /// already enrolled in the sequence.
  fn enroll(
    &self,
    input: NewEnrollment,
  ) -> impl Future<Output = Result<Option<(Enrollment, Vec<ScheduledSend>)>, Self::Error>>
  + Send
  + '_;

  // ── Scheduled send queue ──────────────────────────────────────────────

  fn schedule_send(
    &self,
    input: NewScheduledSend,
  ) -> impl Future<Output = Result<ScheduledSend, Self::Error>> + Send + '_;

  fn get_send(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<ScheduledSend>, Self::Error>> + Send + '_;

  fn list_sends<'a>(
    &'a self,
    query: &'a SendQuery,
  ) -> impl Future<Output = Result<Vec<ScheduledSend>, Self::Error>> + Send + 'a;

  /// Up to `limit` pending sends with `due_at <= now` that carry no live
  /// claim. A read only; callers must still [`claim_send`](Self::claim_send).
  fn due_sends(
    &self,
    now: DateTime<Utc>,
    stale_before: DateTime<Utc>,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<ScheduledSend>, Self::Error>> + Send + '_;

  /// Atomically claim a pending send. Exactly one of any number of
  /// concurrent callers observes `true`.
  fn claim_send(
    &self,
    claim: ClaimRequest,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Stamp `sent_at` on a send still held under `token`. Returns `false` if
  /// the claim was lost in the meantime.
  fn complete_send(
    &self,
    id: Uuid,
    token: Uuid,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Record a failed attempt on a send held under `token`: release it for a
  /// later sweep, or stamp it terminal once `max_attempts` is reached.
  fn fail_send(
    &self,
    id: Uuid,
    token: Uuid,
    error: String,
    max_attempts: u32,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<FailureOutcome, Self::Error>> + Send + '_;
}

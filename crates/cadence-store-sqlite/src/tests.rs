//! Integration tests for `SqliteStore` against an in-memory database.

use cadence_core::{
  account::{Account, AccountDirectory},
  contact::{Contact, ContactWrite},
  event::{EventQuery, EventType, Metadata, NewEvent},
  rule::{AutomationDraft, EmailContent, Sequence, SequenceDraft, StepDraft, TemplateDraft},
  schedule::{ClaimRequest, FailureOutcome, NewEnrollment, NewScheduledSend, PlannedStep, SendQuery},
  store::CrmStore,
};
use chrono::{DateTime, Duration, TimeZone as _, Utc};
use uuid::Uuid;

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() }

fn contact(email: &str, user_id: Option<&str>) -> Contact {
  Contact {
    contact_id: Uuid::new_v4(),
    email:      email.into(),
    user_id:    user_id.map(Into::into),
    name:       None,
    role:       None,
    created_at: t0(),
    updated_at: t0(),
  }
}

fn event(ty: EventType, contact_id: Option<Uuid>) -> NewEvent {
  NewEvent {
    event_type:       ty,
    actor_user_id:    None,
    subject_audio_id: None,
    contact_id,
    metadata:         Metadata::new(),
    created_at:       t0(),
  }
}

fn automation(trigger: EventType, delay_minutes: u32) -> AutomationDraft {
  AutomationDraft {
    name: format!("{trigger} after {delay_minutes}m"),
    trigger,
    delay_minutes,
    subject: "Hello".into(),
    body: "<p>Hello</p>".into(),
    template_id: None,
    active: true,
  }
}

fn step(days: u32, hours: u32, subject: &str) -> StepDraft {
  StepDraft {
    delay_days:  days,
    delay_hours: hours,
    subject:     subject.into(),
    body:        format!("<p>{subject}</p>"),
  }
}

fn sequence(trigger: EventType, steps: Vec<StepDraft>) -> SequenceDraft {
  SequenceDraft { name: "drip".into(), trigger, active: true, steps }
}

fn enrollment(seq: &Sequence, c: &Contact) -> NewEnrollment {
  NewEnrollment {
    sequence_id: seq.sequence_id,
    contact_id:  c.contact_id,
    to_email:    c.email.clone(),
    enrolled_at: t0(),
    steps:       seq
      .steps
      .iter()
      .map(|st| PlannedStep {
        step_order: st.order,
        content:    st.content(),
        due_at:     t0() + st.offset(),
      })
      .collect(),
  }
}

async fn due_send(s: &SqliteStore, due_at: DateTime<Utc>) -> Uuid {
  let c = s.write_contact(ContactWrite::Insert(contact(&format!("{}@x.com", Uuid::new_v4()), None))).await.unwrap();
  s.schedule_send(NewScheduledSend {
    automation_id: Uuid::new_v4(),
    contact_id:    c.contact_id,
    to_email:      c.email,
    content:       EmailContent { subject: "s".into(), body: "b".into() },
    due_at,
    created_at:    t0(),
  })
  .await
  .unwrap()
  .send_id
}

fn claim(send_id: Uuid, now: DateTime<Utc>) -> ClaimRequest {
  ClaimRequest {
    send_id,
    token: Uuid::new_v4(),
    now,
    stale_before: now - Duration::minutes(5),
  }
}

// ─── Event log ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn events_list_newest_first() {
  let s = store().await;
  let first = s.append_event(event(EventType::Signup, None)).await.unwrap();
  let second = s.append_event(event(EventType::Login, None)).await.unwrap();

  let all = s.list_events(&EventQuery::default()).await.unwrap();
  assert_eq!(all.len(), 2);
  assert_eq!(all[0].event_id, second.event_id);
  assert_eq!(all[1].event_id, first.event_id);
}

#[tokio::test]
async fn events_filter_by_type_and_contact() {
  let s = store().await;
  let c = s.write_contact(ContactWrite::Insert(contact("a@x.com", None))).await.unwrap();

  s.append_event(event(EventType::Play, Some(c.contact_id))).await.unwrap();
  s.append_event(event(EventType::Play, None)).await.unwrap();
  s.append_event(event(EventType::Signup, Some(c.contact_id))).await.unwrap();

  let plays = s
    .list_events(&EventQuery { event_type: Some(EventType::Play), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(plays.len(), 2);

  let mine = s
    .list_events(&EventQuery {
      event_type: Some(EventType::Play),
      contact_id: Some(c.contact_id),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(mine.len(), 1);
}

#[tokio::test]
async fn event_metadata_roundtrip() {
  let s = store().await;
  let mut input = event(EventType::FavoriteAdded, None);
  input.metadata.insert("audio".into(), serde_json::json!({ "id": "a1", "secs": 30 }));
  input.subject_audio_id = Some("a1".into());
  s.append_event(input).await.unwrap();

  let stored = s.list_events(&EventQuery::default()).await.unwrap().remove(0);
  assert_eq!(stored.metadata["audio"]["secs"], 30);
  assert_eq!(stored.subject_audio_id.as_deref(), Some("a1"));
  assert_eq!(stored.created_at, t0());
}

// ─── Contacts ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn contact_insert_and_lookup() {
  let s = store().await;
  let c = s
    .write_contact(ContactWrite::Insert(contact("a@x.com", Some("u1"))))
    .await
    .unwrap();

  assert_eq!(s.find_contact_by_email("a@x.com").await.unwrap(), Some(c.clone()));
  assert_eq!(s.find_contact_by_user("u1").await.unwrap(), Some(c.clone()));
  assert_eq!(s.get_contact(c.contact_id).await.unwrap(), Some(c));
  assert!(s.find_contact_by_user("u2").await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_email_insert_is_rejected() {
  let s = store().await;
  s.write_contact(ContactWrite::Insert(contact("a@x.com", None))).await.unwrap();
  let err = s
    .write_contact(ContactWrite::Insert(contact("a@x.com", None)))
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::EmailTaken(ref e) if e == "a@x.com"));
  assert_eq!(s.list_contacts(10, 0).await.unwrap().len(), 1);
}

#[tokio::test]
async fn absorb_repoints_history_and_removes_loser() {
  let s = store().await;
  let winner = s.write_contact(ContactWrite::Insert(contact("old@x.com", Some("u1")))).await.unwrap();
  let loser = s.write_contact(ContactWrite::Insert(contact("new@x.com", None))).await.unwrap();
  s.append_event(event(EventType::Play, Some(loser.contact_id))).await.unwrap();

  let mut updated = winner.clone();
  updated.email = "new@x.com".into();
  s.write_contact(ContactWrite::Absorb { winner: updated, absorbed: loser.contact_id })
    .await
    .unwrap();

  assert!(s.get_contact(loser.contact_id).await.unwrap().is_none());
  let found = s.find_contact_by_email("new@x.com").await.unwrap().unwrap();
  assert_eq!(found.contact_id, winner.contact_id);

  let events = s
    .list_events(&EventQuery { contact_id: Some(winner.contact_id), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn absorb_does_not_duplicate_shared_sequence_steps() {
  let s = store().await;
  let seq = s.create_sequence(sequence(EventType::Login, vec![step(1, 0, "d1")])).await.unwrap();
  let winner = s.write_contact(ContactWrite::Insert(contact("a@x.com", Some("u1")))).await.unwrap();
  let loser = s.write_contact(ContactWrite::Insert(contact("b@x.com", None))).await.unwrap();
  s.enroll(enrollment(&seq, &winner)).await.unwrap().unwrap();
  s.enroll(enrollment(&seq, &loser)).await.unwrap().unwrap();

  let mut updated = winner.clone();
  updated.email = "b@x.com".into();
  s.write_contact(ContactWrite::Absorb { winner: updated, absorbed: loser.contact_id })
    .await
    .unwrap();

  let pending = s
    .list_sends(&SendQuery { pending_only: true, ..Default::default() })
    .await
    .unwrap();
  assert_eq!(pending.len(), 1);
  assert_eq!(pending[0].contact_id, winner.contact_id);

  let all = s.list_sends(&SendQuery::default()).await.unwrap();
  assert_eq!(all.len(), 2);
  let superseded = all.iter().find(|send| send.sent_at.is_some()).unwrap();
  assert_eq!(superseded.contact_id, winner.contact_id);
  assert!(superseded.last_error.as_deref().unwrap().contains("merge"));
}

#[tokio::test]
async fn absorb_moves_enrollments_the_winner_lacks() {
  let s = store().await;
  let seq = s.create_sequence(sequence(EventType::Login, vec![step(0, 2, "only")])).await.unwrap();
  let winner = s.write_contact(ContactWrite::Insert(contact("a@x.com", Some("u1")))).await.unwrap();
  let loser = s.write_contact(ContactWrite::Insert(contact("b@x.com", None))).await.unwrap();
  s.enroll(enrollment(&seq, &loser)).await.unwrap().unwrap();

  let mut updated = winner.clone();
  updated.email = "b@x.com".into();
  s.write_contact(ContactWrite::Absorb { winner: updated, absorbed: loser.contact_id })
    .await
    .unwrap();

  let pending = s
    .list_sends(&SendQuery { pending_only: true, ..Default::default() })
    .await
    .unwrap();
  assert_eq!(pending.len(), 1);
  assert_eq!(pending[0].contact_id, winner.contact_id);
  // Already enrolled through the absorbed contact.
  assert!(s.enroll(enrollment(&seq, &winner)).await.unwrap().is_none());
}

// ─── Accounts ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn account_lookup() {
  let s = store().await;
  let account = Account {
    user_id: "u1".into(),
    email:   "u1@x.com".into(),
    name:    Some("Una".into()),
    role:    Some("listener".into()),
  };
  s.upsert_account(&account).await.unwrap();

  assert_eq!(s.lookup("u1").await.unwrap(), Some(account));
  assert!(s.lookup("nobody").await.unwrap().is_none());
}

// ─── Templates & automations ─────────────────────────────────────────────────

#[tokio::test]
async fn automation_with_missing_template_is_rejected() {
  let s = store().await;
  let mut draft = automation(EventType::Signup, 0);
  draft.template_id = Some(Uuid::new_v4());
  let err = s.create_automation(draft).await.unwrap_err();
  assert!(matches!(err, crate::Error::TemplateNotFound(_)));
}

#[tokio::test]
async fn automation_validation_runs_on_write() {
  let s = store().await;
  let mut draft = automation(EventType::Signup, 0);
  draft.body = String::new();
  let err = s.create_automation(draft).await.unwrap_err();
  assert!(matches!(err, crate::Error::Core(cadence_core::Error::Validation { .. })));
}

#[tokio::test]
async fn template_in_use_cannot_be_deleted() {
  let s = store().await;
  let template = s
    .create_template(TemplateDraft {
      name:    "welcome".into(),
      subject: "Welcome!".into(),
      body:    "<p>hi</p>".into(),
    })
    .await
    .unwrap();

  let mut draft = automation(EventType::Signup, 0);
  draft.template_id = Some(template.template_id);
  let a = s.create_automation(draft).await.unwrap();

  let err = s.delete_template(template.template_id).await.unwrap_err();
  assert!(matches!(err, Error::TemplateInUse { automations: 1, .. }));
  let reloaded = s.get_automation(a.automation_id).await.unwrap().unwrap();
  assert_eq!(reloaded.template_id, Some(template.template_id));

  assert!(s.delete_automation(a.automation_id).await.unwrap());
  assert!(s.delete_template(template.template_id).await.unwrap());
  assert!(!s.delete_template(template.template_id).await.unwrap());
}

#[tokio::test]
async fn active_automations_filters_trigger_and_active() {
  let s = store().await;
  s.create_automation(automation(EventType::Signup, 0)).await.unwrap();
  s.create_automation(automation(EventType::Signup, 60)).await.unwrap();
  s.create_automation(automation(EventType::Login, 0)).await.unwrap();
  let mut inactive = automation(EventType::Signup, 0);
  inactive.active = false;
  s.create_automation(inactive).await.unwrap();

  let matched = s.active_automations(EventType::Signup).await.unwrap();
  assert_eq!(matched.len(), 2);
  assert!(matched.iter().all(|a| a.active && a.trigger == EventType::Signup));
  assert_eq!(s.list_automations().await.unwrap().len(), 4);
}

#[tokio::test]
async fn update_automation_replaces_definition() {
  let s = store().await;
  let a = s.create_automation(automation(EventType::Signup, 0)).await.unwrap();

  let mut draft = automation(EventType::Play, 15);
  draft.active = false;
  let updated = s.update_automation(a.automation_id, draft).await.unwrap().unwrap();
  assert_eq!(updated.trigger, EventType::Play);
  assert_eq!(updated.delay_minutes, 15);
  assert!(!updated.active);

  assert!(s.update_automation(Uuid::new_v4(), automation(EventType::Play, 0)).await.unwrap().is_none());
  assert!(s.delete_automation(a.automation_id).await.unwrap());
  assert!(!s.delete_automation(a.automation_id).await.unwrap());
}

// ─── Sequences ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn sequence_steps_roundtrip_in_order() {
  let s = store().await;
  let created = s
    .create_sequence(sequence(EventType::Signup, vec![step(0, 1, "a"), step(2, 0, "b"), step(7, 0, "c")]))
    .await
    .unwrap();

  let loaded = s.get_sequence(created.sequence_id).await.unwrap().unwrap();
  let subjects: Vec<&str> = loaded.steps.iter().map(|st| st.subject.as_str()).collect();
  assert_eq!(subjects, ["a", "b", "c"]);
  assert_eq!(loaded.steps.iter().map(|st| st.order).collect::<Vec<_>>(), [0, 1, 2]);
}

#[tokio::test]
async fn replace_sequence_swaps_whole_step_list() {
  let s = store().await;
  let created = s
    .create_sequence(sequence(EventType::Signup, vec![step(0, 1, "a"), step(1, 0, "b"), step(2, 0, "c")]))
    .await
    .unwrap();

  let replaced = s
    .replace_sequence(created.sequence_id, sequence(EventType::Login, vec![step(0, 0, "only")]))
    .await
    .unwrap()
    .unwrap();

  assert_eq!(replaced.trigger, EventType::Login);
  assert_eq!(replaced.steps.len(), 1);
  assert_eq!(replaced.steps[0].order, 0);
  assert_eq!(replaced.steps[0].subject, "only");
}

#[tokio::test]
async fn invalid_replace_leaves_sequence_untouched() {
  let s = store().await;
  let created = s
    .create_sequence(sequence(EventType::Signup, vec![step(0, 1, "a")]))
    .await
    .unwrap();

  assert!(s.replace_sequence(created.sequence_id, sequence(EventType::Signup, vec![])).await.is_err());
  let loaded = s.get_sequence(created.sequence_id).await.unwrap().unwrap();
  assert_eq!(loaded.steps.len(), 1);
}

#[tokio::test]
async fn enrollment_is_unique_per_contact_and_sequence() {
  let s = store().await;
  let c = s.write_contact(ContactWrite::Insert(contact("a@x.com", None))).await.unwrap();
  let seq = s
    .create_sequence(sequence(EventType::Signup, vec![step(0, 1, "a"), step(1, 0, "b")]))
    .await
    .unwrap();

  let input = enrollment(&seq, &c);

  let (_, sends) = s.enroll(input.clone()).await.unwrap().expect("first enrollment");
  assert_eq!(sends.len(), 2);
  assert!(s.enroll(input).await.unwrap().is_none());

  let pending = s
    .list_sends(&SendQuery { pending_only: true, ..Default::default() })
    .await
    .unwrap();
  assert_eq!(pending.len(), 2);
}

// ─── Scheduled sends ─────────────────────────────────────────────────────────

#[tokio::test]
async fn due_sends_respects_due_time() {
  let s = store().await;
  let early = due_send(&s, t0() - Duration::minutes(1)).await;
  due_send(&s, t0() + Duration::minutes(1)).await;

  let due = s.due_sends(t0(), t0() - Duration::minutes(5), 20).await.unwrap();
  assert_eq!(due.len(), 1);
  assert_eq!(due[0].send_id, early);
}

#[tokio::test]
async fn concurrent_claims_have_one_winner() {
  let s = store().await;
  let id = due_send(&s, t0()).await;

  let claims = (0..8).map(|_| s.claim_send(claim(id, t0())));
  let results = futures::future::join_all(claims).await;
  let winners = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
  assert_eq!(winners, 1);
}

#[tokio::test]
async fn claimed_send_is_hidden_until_lease_expires() {
  let s = store().await;
  let id = due_send(&s, t0()).await;
  assert!(s.claim_send(claim(id, t0())).await.unwrap());

  let later = t0() + Duration::minutes(1);
  assert!(s.due_sends(later, later - Duration::minutes(5), 20).await.unwrap().is_empty());

  let much_later = t0() + Duration::minutes(10);
  assert_eq!(
    s.due_sends(much_later, much_later - Duration::minutes(5), 20).await.unwrap().len(),
    1
  );
  assert!(s.claim_send(claim(id, much_later)).await.unwrap());
}

#[tokio::test]
async fn complete_requires_current_claim() {
  let s = store().await;
  let id = due_send(&s, t0()).await;
  let c = claim(id, t0());
  assert!(s.claim_send(c).await.unwrap());

  assert!(!s.complete_send(id, Uuid::new_v4(), t0()).await.unwrap());
  assert!(s.complete_send(id, c.token, t0()).await.unwrap());
  assert!(!s.complete_send(id, c.token, t0()).await.unwrap());

  let sent = s.get_send(id).await.unwrap().unwrap();
  assert_eq!(sent.sent_at, Some(t0()));
  assert!(!s.claim_send(claim(id, t0() + Duration::hours(1))).await.unwrap());
}

#[tokio::test]
async fn failures_requeue_then_give_up() {
  let s = store().await;
  let id = due_send(&s, t0()).await;

  let first = claim(id, t0());
  assert!(s.claim_send(first).await.unwrap());
  let outcome = s.fail_send(id, first.token, "smtp down".into(), 2, t0()).await.unwrap();
  assert_eq!(outcome, FailureOutcome::Requeued { attempts: 1 });

  let pending = s.get_send(id).await.unwrap().unwrap();
  assert!(pending.is_pending());
  assert!(pending.claimed_at.is_none());
  assert_eq!(pending.last_error.as_deref(), Some("smtp down"));

  let second = claim(id, t0());
  assert!(s.claim_send(second).await.unwrap());
  let outcome = s.fail_send(id, second.token, "smtp still down".into(), 2, t0()).await.unwrap();
  assert_eq!(outcome, FailureOutcome::GaveUp { attempts: 2 });
  assert!(!s.get_send(id).await.unwrap().unwrap().is_pending());

  let stale = s.fail_send(id, second.token, "late".into(), 2, t0()).await.unwrap();
  assert_eq!(stale, FailureOutcome::NotOwned);
}

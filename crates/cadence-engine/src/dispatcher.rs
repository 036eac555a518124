//! Event dispatch: log the event, then run every rule it triggers.
//!
//! Only the event-log append can fail a dispatch. Contact resolution, the
//! analytics copy, rule matching and the trailing sweep are all best-effort:
//! their failures are logged and the caller still receives the stored event.

use std::sync::Arc;

use cadence_core::{
  account::AccountDirectory,
  analytics::AnalyticsSink,
  contact::{Contact, ContactClaim},
  event::{Event, EventType, Metadata, NewEvent},
  mail::{MailTransport, OutgoingMail},
  rule::{Automation, EmailContent},
  schedule::NewScheduledSend,
  store::CrmStore,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
  clock::{Clock, SystemClock},
  enrollment,
  error::DispatchError,
  fanout,
  resolver,
  sweeper::{SweepConfig, SweepReport, Sweeper},
};

/// Everything known about an event beyond its type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FireEvent {
  pub actor_user_id:    Option<String>,
  pub subject_audio_id: Option<String>,
  pub metadata:         Option<Metadata>,
  /// Contact email for flows without an account, such as a newsletter
  /// signup. Ignored when the actor's account supplies one.
  pub email:            Option<String>,
}

/// What a single dispatch did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
  pub contact_id:       Option<Uuid>,
  pub immediate_sent:   usize,
  pub immediate_failed: usize,
  /// Delayed automation sends queued; sequence steps are not counted.
  pub scheduled:        usize,
  /// Sequences the contact was newly enrolled into.
  pub enrolled:         usize,
  /// Automations matched but not run because they had nothing to send.
  pub skipped:          usize,
  pub sweep:            Option<SweepReport>,
}

pub struct Dispatcher<S, M, D, A> {
  store:     Arc<S>,
  mail:      Arc<M>,
  directory: Arc<D>,
  analytics: Arc<A>,
  clock:     Arc<dyn Clock>,
  sweeper:   Sweeper<S, M>,
}

impl<S, M, D, A> Clone for Dispatcher<S, M, D, A> {
  fn clone(&self) -> Self {
    Self {
      store:     self.store.clone(),
      mail:      self.mail.clone(),
      directory: self.directory.clone(),
      analytics: self.analytics.clone(),
      clock:     self.clock.clone(),
      sweeper:   self.sweeper.clone(),
    }
  }
}

impl<S, M, D, A> Dispatcher<S, M, D, A>
where
  S: CrmStore,
  M: MailTransport,
  D: AccountDirectory,
  A: AnalyticsSink,
{
  pub fn new(
    store: Arc<S>,
    mail: Arc<M>,
    directory: Arc<D>,
    analytics: Arc<A>,
    sweep: SweepConfig,
  ) -> Self {
    let sweeper = Sweeper::new(store.clone(), mail.clone(), sweep);
    Self { store, mail, directory, analytics, clock: Arc::new(SystemClock), sweeper }
  }

  /// Replace the clock for this dispatcher and its sweeper.
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.sweeper = self.sweeper.with_clock(clock.clone());
    self.clock = clock;
    self
  }

  pub fn sweeper(&self) -> &Sweeper<S, M> { &self.sweeper }

  pub fn store(&self) -> &Arc<S> { &self.store }

  /// Log an event and run its rules. Fails only if the event could not be
  /// appended.
  pub async fn fire_event(
    &self,
    event_type: EventType,
    request: FireEvent,
  ) -> Result<Event, DispatchError> {
    self.fire_event_with_report(event_type, request).await.map(|(event, _)| event)
  }

  pub async fn fire_event_with_report(
    &self,
    event_type: EventType,
    request: FireEvent,
  ) -> Result<(Event, DispatchReport), DispatchError> {
    let now = self.clock.now();
    let contact = self.resolve_actor(&request, now).await;

    let event = self
      .store
      .append_event(NewEvent {
        event_type,
        actor_user_id: request.actor_user_id,
        subject_audio_id: request.subject_audio_id,
        contact_id: contact.as_ref().map(|c| c.contact_id),
        metadata: request.metadata.unwrap_or_default(),
        created_at: now,
      })
      .await
      .map_err(|e| {
        error!(%event_type, error = %e, "failed to append event");
        DispatchError::EventLog(Box::new(e))
      })?;

    info!(event_id = %event.event_id, %event_type, contact_id = ?event.contact_id, "event logged");

    self.notify_analytics(&event).await;

    let mut report = DispatchReport { contact_id: event.contact_id, ..Default::default() };
    if let Some(contact) = &contact {
      self.run_automations(event_type, contact, now, &mut report).await;
      self.enroll_sequences(event_type, contact, now, &mut report).await;
    } else {
      debug!(event_id = %event.event_id, "no contact; rule matching skipped");
    }

    match self.sweeper.run().await {
      Ok(sweep) => report.sweep = Some(sweep),
      Err(e) => warn!(error = %e, "post-dispatch sweep failed"),
    }

    debug!(event_id = %event.event_id, ?report, "dispatch finished");
    Ok((event, report))
  }

  async fn resolve_actor(&self, request: &FireEvent, now: DateTime<Utc>) -> Option<Contact> {
    let mut claim = ContactClaim::default();

    if let Some(user_id) = &request.actor_user_id {
      match self.directory.lookup(user_id).await {
        Ok(Some(account)) => {
          claim = ContactClaim {
            user_id: Some(account.user_id),
            email:   account.email,
            name:    account.name,
            role:    account.role,
          };
        }
        Ok(None) => debug!(%user_id, "actor has no account"),
        Err(e) => warn!(%user_id, error = %e, "account lookup failed"),
      }
    }

    if claim.normalized_email().is_none()
      && let Some(email) = &request.email
    {
      claim.email.clone_from(email);
    }

    if claim.normalized_email().is_none() {
      debug!(actor = ?request.actor_user_id, "no email for actor");
      return None;
    }
    resolver::resolve(self.store.as_ref(), &claim, now).await
  }

  /// Awaited in line; the sink is expected to bound its own latency.
  async fn notify_analytics(&self, event: &Event) {
    let payload = match serde_json::to_value(event) {
      Ok(v) => v,
      Err(e) => {
        warn!(event_id = %event.event_id, error = %e, "could not encode analytics payload");
        return;
      }
    };
    if let Err(e) = self.analytics.notify(event.event_type, &payload).await {
      warn!(event_id = %event.event_id, error = %e, "analytics notification failed");
    }
  }

  /// The content an automation sends: its template's when the template can
  /// be loaded, otherwise its own. `None` if that leaves nothing to send.
  async fn content_for(&self, automation: &Automation) -> Option<EmailContent> {
    let template = match automation.template_id {
      None => None,
      Some(template_id) => match self.store.get_template(template_id).await {
        Ok(Some(template)) => Some(template),
        Ok(None) => {
          warn!(automation_id = %automation.automation_id, %template_id, "template missing, using automation content");
          None
        }
        Err(e) => {
          warn!(automation_id = %automation.automation_id, %template_id, error = %e, "template lookup failed, using automation content");
          None
        }
      },
    };
    let content = automation.content_with(template.as_ref());
    if content.is_blank() {
      warn!(automation_id = %automation.automation_id, "automation has no subject or body; skipped");
      return None;
    }
    Some(content)
  }

  async fn run_automations(
    &self,
    event_type: EventType,
    contact: &Contact,
    now: DateTime<Utc>,
    report: &mut DispatchReport,
  ) {
    let automations = match self.store.active_automations(event_type).await {
      Ok(a) => a,
      Err(e) => {
        warn!(%event_type, error = %e, "failed to load automations");
        return;
      }
    };

    let (immediate, delayed): (Vec<_>, Vec<_>) =
      automations.into_iter().partition(Automation::is_immediate);

    let sends = immediate.iter().map(|automation| async move {
      let Some(content) = self.content_for(automation).await else {
        return Ok(None);
      };
      let mail = OutgoingMail::new(contact.email.clone(), content);
      self
        .mail
        .send(&mail)
        .await
        .map(|()| Some(automation.automation_id))
        .map_err(|e| (automation.automation_id, e))
    });
    let sent = fanout::settle(sends).await;
    for automation_id in sent.ok.iter().flatten() {
      debug!(%automation_id, to = %contact.email, "immediate send delivered");
    }
    for (automation_id, e) in &sent.failed {
      warn!(%automation_id, to = %contact.email, error = %e, "immediate send failed");
    }
    report.immediate_sent = sent.ok.iter().flatten().count();
    report.immediate_failed = sent.failed.len();
    report.skipped = sent.ok.iter().filter(|id| id.is_none()).count();

    let schedules = delayed.iter().map(|automation| async move {
      let Some(content) = self.content_for(automation).await else {
        return Ok(None);
      };
      self
        .store
        .schedule_send(NewScheduledSend {
          automation_id: automation.automation_id,
          contact_id:    contact.contact_id,
          to_email:      contact.email.clone(),
          content,
          due_at:        now + automation.delay(),
          created_at:    now,
        })
        .await
        .map(Some)
        .map_err(|e| (automation.automation_id, e))
    });
    let scheduled = fanout::settle(schedules).await;
    for send in scheduled.ok.iter().flatten() {
      debug!(send_id = %send.send_id, due_at = %send.due_at, "send scheduled");
    }
    for (automation_id, e) in &scheduled.failed {
      warn!(%automation_id, error = %e, "failed to schedule send");
    }
    report.scheduled = scheduled.ok.iter().flatten().count();
    report.skipped += scheduled.ok.iter().filter(|send| send.is_none()).count();
  }

  async fn enroll_sequences(
    &self,
    event_type: EventType,
    contact: &Contact,
    now: DateTime<Utc>,
    report: &mut DispatchReport,
  ) {
    let sequences = match self.store.active_sequences(event_type).await {
      Ok(s) => s,
      Err(e) => {
        warn!(%event_type, error = %e, "failed to load sequences");
        return;
      }
    };

    let enrollments = sequences.iter().map(|sequence| async move {
      enrollment::enroll(self.store.as_ref(), sequence, contact, now)
        .await
        .map_err(|e| (sequence.sequence_id, e))
    });
    let settled = fanout::settle(enrollments).await;
    for (sequence_id, e) in &settled.failed {
      warn!(%sequence_id, contact_id = %contact.contact_id, error = %e, "enrollment failed");
    }
    report.enrolled = settled.ok.iter().filter(|sends| !sends.is_empty()).count();
  }
}

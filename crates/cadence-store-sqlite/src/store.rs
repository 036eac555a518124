//! [`SqliteStore`]: the SQLite implementation of [`CrmStore`].

use std::path::Path;

use cadence_core::{
  contact::{Contact, ContactWrite},
  event::{Event, EventQuery, EventType, NewEvent},
  rule::{Automation, AutomationDraft, EmailTemplate, Sequence, SequenceDraft, TemplateDraft},
  schedule::{
    ClaimRequest, Enrollment, FailureOutcome, NewEnrollment, NewScheduledSend, ScheduledSend,
    SendOrigin, SendQuery,
  },
  store::CrmStore,
};
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    AUTOMATION_COLUMNS, CONTACT_COLUMNS, EVENT_COLUMNS, RawAutomation, RawContact, RawEvent,
    RawSend, RawSequence, RawStep, RawTemplate, SEND_COLUMNS, SEQUENCE_COLUMNS, STEP_COLUMNS,
    TEMPLATE_COLUMNS, encode_dt, encode_event_type, encode_metadata, encode_uuid, origin_columns,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Cadence CRM store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    tracing::debug!(path = %path.display(), "sqlite store ready");
    Ok(store)
  }

  /// Open an in-memory store for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn template_exists(&self, id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(id);
    let exists = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT 1 FROM templates WHERE template_id = ?1",
              rusqlite::params![id_str],
              |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false),
        )
      })
      .await?;
    Ok(exists)
  }

  async fn check_automation_draft(&self, draft: &AutomationDraft) -> Result<()> {
    draft.validate()?;
    if let Some(template_id) = draft.template_id
      && !self.template_exists(template_id).await?
    {
      return Err(Error::TemplateNotFound(template_id));
    }
    Ok(())
  }

  async fn query_automations(
    &self,
    trigger: Option<EventType>,
  ) -> Result<Vec<Automation>> {
    let trigger_str = trigger.map(encode_event_type);

    let raws: Vec<RawAutomation> = self
      .conn
      .call(move |conn| {
        let rows = if let Some(t) = trigger_str {
          let mut stmt = conn.prepare(&format!(
            "SELECT {AUTOMATION_COLUMNS} FROM automations
             WHERE trigger_type = ?1 AND active = 1
             ORDER BY created_at"
          ))?;
          stmt
            .query_map(rusqlite::params![t], RawAutomation::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
          let mut stmt = conn.prepare(&format!(
            "SELECT {AUTOMATION_COLUMNS} FROM automations ORDER BY created_at"
          ))?;
          stmt
            .query_map([], RawAutomation::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAutomation::into_automation).collect()
  }

  async fn query_sequences(
    &self,
    filter: SequenceFilter,
  ) -> Result<Vec<Sequence>> {
    let raws: Vec<RawSequence> = self
      .conn
      .call(move |conn| {
        let (sql, param) = match filter {
          SequenceFilter::All => (
            format!("SELECT {SEQUENCE_COLUMNS} FROM sequences ORDER BY created_at"),
            None,
          ),
          SequenceFilter::Id(id) => (
            format!("SELECT {SEQUENCE_COLUMNS} FROM sequences WHERE sequence_id = ?1"),
            Some(encode_uuid(id)),
          ),
          SequenceFilter::ActiveFor(t) => (
            format!(
              "SELECT {SEQUENCE_COLUMNS} FROM sequences
               WHERE trigger_type = ?1 AND active = 1
               ORDER BY created_at"
            ),
            Some(encode_event_type(t).to_owned()),
          ),
        };

        let mut stmt = conn.prepare(&sql)?;
        let mut sequences = match param {
          Some(p) => stmt
            .query_map(rusqlite::params![p], RawSequence::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?,
          None => stmt
            .query_map([], RawSequence::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?,
        };

        for seq in &mut sequences {
          seq.steps = load_steps(conn, &seq.sequence_id)?;
        }
        Ok(sequences)
      })
      .await?;

    raws.into_iter().map(RawSequence::into_sequence).collect()
  }
}

#[derive(Clone, Copy)]
enum SequenceFilter {
  All,
  Id(Uuid),
  ActiveFor(EventType),
}

fn load_steps(conn: &rusqlite::Connection, sequence_id: &str) -> rusqlite::Result<Vec<RawStep>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {STEP_COLUMNS} FROM sequence_steps WHERE sequence_id = ?1 ORDER BY step_order"
  ))?;
  stmt
    .query_map(rusqlite::params![sequence_id], RawStep::from_row)?
    .collect()
}

fn insert_steps(
  tx: &rusqlite::Transaction<'_>,
  sequence_id: &str,
  steps: &[cadence_core::rule::SequenceStep],
) -> rusqlite::Result<()> {
  let mut stmt = tx.prepare(
    "INSERT INTO sequence_steps (sequence_id, step_order, delay_days, delay_hours, subject, body)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
  )?;
  for step in steps {
    stmt.execute(rusqlite::params![
      sequence_id,
      step.order,
      step.delay_days,
      step.delay_hours,
      step.subject,
      step.body,
    ])?;
  }
  Ok(())
}

fn insert_send(tx: &rusqlite::Connection, send: &ScheduledSend) -> rusqlite::Result<()> {
  let (automation_id, enrollment_id, sequence_id, step_order) = origin_columns(&send.origin);
  tx.execute(
    "INSERT INTO scheduled_sends (
       send_id, automation_id, enrollment_id, sequence_id, step_order,
       contact_id, to_email, subject, body, due_at, attempts, created_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11)",
    rusqlite::params![
      encode_uuid(send.send_id),
      automation_id,
      enrollment_id,
      sequence_id,
      step_order,
      encode_uuid(send.contact_id),
      send.to_email,
      send.subject,
      send.body,
      encode_dt(send.due_at),
      encode_dt(send.created_at),
    ],
  )?;
  Ok(())
}

fn update_contact_row(conn: &rusqlite::Connection, c: &Contact) -> rusqlite::Result<usize> {
  conn.execute(
    "UPDATE contacts
     SET email = ?2, user_id = ?3, name = ?4, role = ?5, updated_at = ?6
     WHERE contact_id = ?1",
    rusqlite::params![
      encode_uuid(c.contact_id),
      c.email,
      c.user_id,
      c.name,
      c.role,
      encode_dt(c.updated_at),
    ],
  )
}

fn is_unique_violation(err: &tokio_rusqlite::Error) -> bool {
  matches!(
    err,
    tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _))
      if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
  )
}

// ─── CrmStore impl ───────────────────────────────────────────────────────────

impl CrmStore for SqliteStore {
  type Error = Error;

  // ── Event log ─────────────────────────────────────────────────────────────

  async fn append_event(&self, input: NewEvent) -> Result<Event> {
    let event = Event {
      event_id:         Uuid::new_v4(),
      event_type:       input.event_type,
      actor_user_id:    input.actor_user_id,
      subject_audio_id: input.subject_audio_id,
      contact_id:       input.contact_id,
      metadata:         input.metadata,
      created_at:       input.created_at,
    };

    let id_str       = encode_uuid(event.event_id);
    let type_str     = encode_event_type(event.event_type);
    let actor        = event.actor_user_id.clone();
    let audio        = event.subject_audio_id.clone();
    let contact_str  = event.contact_id.map(encode_uuid);
    let metadata_str = encode_metadata(&event.metadata)?;
    let at_str       = encode_dt(event.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO events (
             event_id, seq, event_type, actor_user_id, subject_audio_id,
             contact_id, metadata, created_at
           ) VALUES (
             ?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM events),
             ?2, ?3, ?4, ?5, ?6, ?7
           )",
          rusqlite::params![id_str, type_str, actor, audio, contact_str, metadata_str, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(event)
  }

  async fn list_events(&self, query: &EventQuery) -> Result<Vec<Event>> {
    let type_str    = query.event_type.map(encode_event_type);
    let contact_str = query.contact_id.map(encode_uuid);
    let limit_val   = query.limit.unwrap_or(100) as i64;
    let offset_val  = query.offset.unwrap_or(0) as i64;

    let raws: Vec<RawEvent> = self
      .conn
      .call(move |conn| {
        let mut conds: Vec<&'static str> = vec![];
        if type_str.is_some() {
          conds.push("event_type = ?1");
        }
        if contact_str.is_some() {
          conds.push("contact_id = ?2");
        }

        let where_clause = if conds.is_empty() {
          String::new()
        } else {
          format!("WHERE {}", conds.join(" AND "))
        };

        let sql = format!(
          "SELECT {EVENT_COLUMNS} FROM events
           {where_clause}
           ORDER BY seq DESC
           LIMIT ?3 OFFSET ?4"
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(
            rusqlite::params![type_str, contact_str.as_deref(), limit_val, offset_val],
            RawEvent::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawEvent::into_event).collect()
  }

  // ── Contacts ──────────────────────────────────────────────────────────────

  async fn get_contact(&self, id: Uuid) -> Result<Option<Contact>> {
    let id_str = encode_uuid(id);
    let raw: Option<RawContact> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE contact_id = ?1"),
              rusqlite::params![id_str],
              RawContact::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawContact::into_contact).transpose()
  }

  async fn find_contact_by_user(&self, user_id: &str) -> Result<Option<Contact>> {
    let user_id = user_id.to_owned();
    let raw: Option<RawContact> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE user_id = ?1"),
              rusqlite::params![user_id],
              RawContact::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawContact::into_contact).transpose()
  }

  async fn find_contact_by_email(&self, email: &str) -> Result<Option<Contact>> {
    let email = email.to_owned();
    let raw: Option<RawContact> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE email = ?1"),
              rusqlite::params![email],
              RawContact::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawContact::into_contact).transpose()
  }

  async fn list_contacts(&self, limit: usize, offset: usize) -> Result<Vec<Contact>> {
    let (limit, offset) = (limit as i64, offset as i64);
    let raws: Vec<RawContact> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {CONTACT_COLUMNS} FROM contacts ORDER BY created_at LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![limit, offset], RawContact::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawContact::into_contact).collect()
  }

  async fn write_contact(&self, write: ContactWrite) -> Result<Contact> {
    let planned = write.clone();

    let result = self
      .conn
      .call(move |conn| {
        match planned {
          ContactWrite::Insert(c) => {
            conn.execute(
              &format!("INSERT INTO contacts ({CONTACT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
              rusqlite::params![
                encode_uuid(c.contact_id),
                c.email,
                c.user_id,
                c.name,
                c.role,
                encode_dt(c.created_at),
                encode_dt(c.updated_at),
              ],
            )?;
          }
          ContactWrite::Update(c) => {
            update_contact_row(conn, &c)?;
          }
          ContactWrite::Absorb { winner, absorbed } => {
            let winner_str   = encode_uuid(winner.contact_id);
            let absorbed_str = encode_uuid(absorbed);
            let tx = conn.transaction()?;
            tx.execute(
              "UPDATE events SET contact_id = ?1 WHERE contact_id = ?2",
              rusqlite::params![winner_str, absorbed_str],
            )?;
            // Pending steps of a sequence both contacts are enrolled in would
            // be sent twice; the winner's enrollment already covers them.
            tx.execute(
              "UPDATE scheduled_sends
               SET sent_at = ?3, claimed_at = NULL, claim_token = NULL,
                   last_error = 'superseded by contact merge'
               WHERE contact_id = ?2
                 AND sent_at IS NULL
                 AND enrollment_id IN (
                   SELECT a.enrollment_id
                   FROM enrollments a
                   JOIN enrollments w
                     ON w.sequence_id = a.sequence_id AND w.contact_id = ?1
                   WHERE a.contact_id = ?2
                 )",
              rusqlite::params![winner_str, absorbed_str, encode_dt(winner.updated_at)],
            )?;
            tx.execute(
              "UPDATE scheduled_sends SET contact_id = ?1 WHERE contact_id = ?2",
              rusqlite::params![winner_str, absorbed_str],
            )?;
            // Enrollments the winner already has stay with the winner.
            tx.execute(
              "UPDATE OR IGNORE enrollments SET contact_id = ?1 WHERE contact_id = ?2",
              rusqlite::params![winner_str, absorbed_str],
            )?;
            tx.execute(
              "DELETE FROM enrollments WHERE contact_id = ?1",
              rusqlite::params![absorbed_str],
            )?;
            tx.execute(
              "DELETE FROM contacts WHERE contact_id = ?1",
              rusqlite::params![absorbed_str],
            )?;
            update_contact_row(&tx, &winner)?;
            tx.commit()?;
          }
        }
        Ok(())
      })
      .await;

    match result {
      Ok(()) => Ok(write.into_contact()),
      Err(e) if is_unique_violation(&e) => Err(Error::EmailTaken(write.contact().email.clone())),
      Err(e) => Err(e.into()),
    }
  }

  // ── Templates ─────────────────────────────────────────────────────────────

  async fn create_template(&self, draft: TemplateDraft) -> Result<EmailTemplate> {
    draft.validate()?;
    let now = Utc::now();
    let template = EmailTemplate {
      template_id: Uuid::new_v4(),
      name:        draft.name,
      subject:     draft.subject,
      body:        draft.body,
      created_at:  now,
      updated_at:  now,
    };

    let row = (
      encode_uuid(template.template_id),
      template.name.clone(),
      template.subject.clone(),
      template.body.clone(),
      encode_dt(now),
    );

    self
      .conn
      .call(move |conn| {
        let (id, name, subject, body, at) = row;
        conn.execute(
          &format!("INSERT INTO templates ({TEMPLATE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?5)"),
          rusqlite::params![id, name, subject, body, at],
        )?;
        Ok(())
      })
      .await?;

    Ok(template)
  }

  async fn get_template(&self, id: Uuid) -> Result<Option<EmailTemplate>> {
    let id_str = encode_uuid(id);
    let raw: Option<RawTemplate> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE template_id = ?1"),
              rusqlite::params![id_str],
              RawTemplate::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawTemplate::into_template).transpose()
  }

  async fn list_templates(&self) -> Result<Vec<EmailTemplate>> {
    let raws: Vec<RawTemplate> = self
      .conn
      .call(|conn| {
        let mut stmt =
          conn.prepare(&format!("SELECT {TEMPLATE_COLUMNS} FROM templates ORDER BY name"))?;
        let rows = stmt
          .query_map([], RawTemplate::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawTemplate::into_template).collect()
  }

  async fn update_template(
    &self,
    id: Uuid,
    draft: TemplateDraft,
  ) -> Result<Option<EmailTemplate>> {
    draft.validate()?;
    let id_str = encode_uuid(id);
    let at_str = encode_dt(Utc::now());

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE templates SET name = ?2, subject = ?3, body = ?4, updated_at = ?5
           WHERE template_id = ?1",
          rusqlite::params![id_str, draft.name, draft.subject, draft.body, at_str],
        )?)
      })
      .await?;

    if changed == 0 {
      return Ok(None);
    }
    self.get_template(id).await
  }

  async fn delete_template(&self, id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(id);
    let (in_use, deleted) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let in_use: i64 = tx.query_row(
          "SELECT COUNT(*) FROM automations WHERE template_id = ?1",
          rusqlite::params![id_str],
          |row| row.get(0),
        )?;
        if in_use > 0 {
          return Ok((in_use, 0));
        }
        let deleted = tx.execute(
          "DELETE FROM templates WHERE template_id = ?1",
          rusqlite::params![id_str],
        )?;
        tx.commit()?;
        Ok((0, deleted))
      })
      .await?;
    if in_use > 0 {
      return Err(Error::TemplateInUse { template_id: id, automations: in_use as usize });
    }
    Ok(deleted > 0)
  }

  // ── Automations ───────────────────────────────────────────────────────────

  async fn create_automation(&self, draft: AutomationDraft) -> Result<Automation> {
    self.check_automation_draft(&draft).await?;

    let now = Utc::now();
    let automation = Automation {
      automation_id: Uuid::new_v4(),
      name:          draft.name,
      trigger:       draft.trigger,
      delay_minutes: draft.delay_minutes,
      subject:       draft.subject,
      body:          draft.body,
      template_id:   draft.template_id,
      active:        draft.active,
      created_at:    now,
      updated_at:    now,
    };

    let a = automation.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          &format!(
            "INSERT INTO automations ({AUTOMATION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)"
          ),
          rusqlite::params![
            encode_uuid(a.automation_id),
            a.name,
            encode_event_type(a.trigger),
            a.delay_minutes,
            a.subject,
            a.body,
            a.template_id.map(encode_uuid),
            a.active,
            encode_dt(a.created_at),
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(automation)
  }

  async fn get_automation(&self, id: Uuid) -> Result<Option<Automation>> {
    let id_str = encode_uuid(id);
    let raw: Option<RawAutomation> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {AUTOMATION_COLUMNS} FROM automations WHERE automation_id = ?1"),
              rusqlite::params![id_str],
              RawAutomation::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawAutomation::into_automation).transpose()
  }

  async fn list_automations(&self) -> Result<Vec<Automation>> {
    self.query_automations(None).await
  }

  async fn update_automation(
    &self,
    id: Uuid,
    draft: AutomationDraft,
  ) -> Result<Option<Automation>> {
    self.check_automation_draft(&draft).await?;
    let id_str = encode_uuid(id);
    let at_str = encode_dt(Utc::now());

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE automations
           SET name = ?2, trigger_type = ?3, delay_minutes = ?4, subject = ?5, body = ?6,
               template_id = ?7, active = ?8, updated_at = ?9
           WHERE automation_id = ?1",
          rusqlite::params![
            id_str,
            draft.name,
            encode_event_type(draft.trigger),
            draft.delay_minutes,
            draft.subject,
            draft.body,
            draft.template_id.map(encode_uuid),
            draft.active,
            at_str,
          ],
        )?)
      })
      .await?;

    if changed == 0 {
      return Ok(None);
    }
    self.get_automation(id).await
  }

  async fn delete_automation(&self, id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(id);
    let deleted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM automations WHERE automation_id = ?1",
          rusqlite::params![id_str],
        )?)
      })
      .await?;
    Ok(deleted > 0)
  }

  async fn active_automations(&self, trigger: EventType) -> Result<Vec<Automation>> {
    self.query_automations(Some(trigger)).await
  }

  // ── Sequences ─────────────────────────────────────────────────────────────

  async fn create_sequence(&self, draft: SequenceDraft) -> Result<Sequence> {
    draft.validate()?;
    let now = Utc::now();
    let sequence = Sequence {
      sequence_id: Uuid::new_v4(),
      steps:       draft.numbered_steps(),
      name:        draft.name,
      trigger:     draft.trigger,
      active:      draft.active,
      created_at:  now,
      updated_at:  now,
    };

    let s = sequence.clone();
    self
      .conn
      .call(move |conn| {
        let id_str = encode_uuid(s.sequence_id);
        let tx = conn.transaction()?;
        tx.execute(
          &format!("INSERT INTO sequences ({SEQUENCE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?5)"),
          rusqlite::params![
            id_str,
            s.name,
            encode_event_type(s.trigger),
            s.active,
            encode_dt(s.created_at),
          ],
        )?;
        insert_steps(&tx, &id_str, &s.steps)?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(sequence)
  }

  async fn get_sequence(&self, id: Uuid) -> Result<Option<Sequence>> {
    Ok(self.query_sequences(SequenceFilter::Id(id)).await?.into_iter().next())
  }

  async fn list_sequences(&self) -> Result<Vec<Sequence>> {
    self.query_sequences(SequenceFilter::All).await
  }

  async fn replace_sequence(&self, id: Uuid, draft: SequenceDraft) -> Result<Option<Sequence>> {
    draft.validate()?;
    let steps  = draft.numbered_steps();
    let id_str = encode_uuid(id);
    let at_str = encode_dt(Utc::now());

    let found = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let changed = tx.execute(
          "UPDATE sequences SET name = ?2, trigger_type = ?3, active = ?4, updated_at = ?5
           WHERE sequence_id = ?1",
          rusqlite::params![
            id_str,
            draft.name,
            encode_event_type(draft.trigger),
            draft.active,
            at_str,
          ],
        )?;
        if changed == 0 {
          return Ok(false);
        }
        tx.execute(
          "DELETE FROM sequence_steps WHERE sequence_id = ?1",
          rusqlite::params![id_str],
        )?;
        insert_steps(&tx, &id_str, &steps)?;
        tx.commit()?;
        Ok(true)
      })
      .await?;

    if !found {
      return Ok(None);
    }
    self.get_sequence(id).await
  }

  async fn delete_sequence(&self, id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(id);
    let deleted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM sequences WHERE sequence_id = ?1",
          rusqlite::params![id_str],
        )?)
      })
      .await?;
    Ok(deleted > 0)
  }

  async fn active_sequences(&self, trigger: EventType) -> Result<Vec<Sequence>> {
    self.query_sequences(SequenceFilter::ActiveFor(trigger)).await
  }

  // ── Enrollment ────────────────────────────────────────────────────────────

  async fn enroll(
    &self,
    input: NewEnrollment,
  ) -> Result<Option<(Enrollment, Vec<ScheduledSend>)>> {
    let enrollment = Enrollment {
      enrollment_id: Uuid::new_v4(),
      sequence_id:   input.sequence_id,
      contact_id:    input.contact_id,
      enrolled_at:   input.enrolled_at,
    };

    let sends: Vec<ScheduledSend> = input
      .steps
      .into_iter()
      .map(|step| ScheduledSend {
        send_id:    Uuid::new_v4(),
        origin:     SendOrigin::Sequence {
          enrollment_id: enrollment.enrollment_id,
          sequence_id:   enrollment.sequence_id,
          step_order:    step.step_order,
        },
        contact_id: enrollment.contact_id,
        to_email:   input.to_email.clone(),
        subject:    step.content.subject,
        body:       step.content.body,
        due_at:     step.due_at,
        sent_at:    None,
        claimed_at: None,
        attempts:   0,
        last_error: None,
        created_at: enrollment.enrolled_at,
      })
      .collect();

    let e = enrollment.clone();
    let to_insert = sends.clone();
    let inserted = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let fresh = tx.execute(
          "INSERT OR IGNORE INTO enrollments (enrollment_id, sequence_id, contact_id, enrolled_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![
            encode_uuid(e.enrollment_id),
            encode_uuid(e.sequence_id),
            encode_uuid(e.contact_id),
            encode_dt(e.enrolled_at),
          ],
        )?;
        if fresh == 0 {
          return Ok(false);
        }
        for send in &to_insert {
          insert_send(&tx, send)?;
        }
        tx.commit()?;
        Ok(true)
      })
      .await?;

    Ok(inserted.then_some((enrollment, sends)))
  }

  // ── Scheduled send queue ──────────────────────────────────────────────────

  async fn schedule_send(&self, input: NewScheduledSend) -> Result<ScheduledSend> {
    let send = ScheduledSend {
      send_id:    Uuid::new_v4(),
      origin:     SendOrigin::Automation { automation_id: input.automation_id },
      contact_id: input.contact_id,
      to_email:   input.to_email,
      subject:    input.content.subject,
      body:       input.content.body,
      due_at:     input.due_at,
      sent_at:    None,
      claimed_at: None,
      attempts:   0,
      last_error: None,
      created_at: input.created_at,
    };

    let s = send.clone();
    self
      .conn
      .call(move |conn| {
        insert_send(conn, &s)?;
        Ok(())
      })
      .await?;

    Ok(send)
  }

  async fn get_send(&self, id: Uuid) -> Result<Option<ScheduledSend>> {
    let id_str = encode_uuid(id);
    let raw: Option<RawSend> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {SEND_COLUMNS} FROM scheduled_sends WHERE send_id = ?1"),
              rusqlite::params![id_str],
              RawSend::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawSend::into_send).transpose()
  }

  async fn list_sends(&self, query: &SendQuery) -> Result<Vec<ScheduledSend>> {
    let pending_only = query.pending_only;
    let contact_str  = query.contact_id.map(encode_uuid);
    let limit_val    = query.limit.unwrap_or(100) as i64;
    let offset_val   = query.offset.unwrap_or(0) as i64;

    let raws: Vec<RawSend> = self
      .conn
      .call(move |conn| {
        let mut conds: Vec<&'static str> = vec![];
        if pending_only {
          conds.push("sent_at IS NULL");
        }
        if contact_str.is_some() {
          conds.push("contact_id = ?1");
        }

        let where_clause = if conds.is_empty() {
          String::new()
        } else {
          format!("WHERE {}", conds.join(" AND "))
        };

        let sql = format!(
          "SELECT {SEND_COLUMNS} FROM scheduled_sends
           {where_clause}
           ORDER BY due_at
           LIMIT ?2 OFFSET ?3"
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(
            rusqlite::params![contact_str.as_deref(), limit_val, offset_val],
            RawSend::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSend::into_send).collect()
  }

  async fn due_sends(
    &self,
    now: DateTime<Utc>,
    stale_before: DateTime<Utc>,
    limit: usize,
  ) -> Result<Vec<ScheduledSend>> {
    let now_str   = encode_dt(now);
    let stale_str = encode_dt(stale_before);
    let limit_val = limit as i64;

    let raws: Vec<RawSend> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {SEND_COLUMNS} FROM scheduled_sends
           WHERE sent_at IS NULL
             AND due_at <= ?1
             AND (claimed_at IS NULL OR claimed_at <= ?2)
           ORDER BY due_at
           LIMIT ?3"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![now_str, stale_str, limit_val], RawSend::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSend::into_send).collect()
  }

  async fn claim_send(&self, claim: ClaimRequest) -> Result<bool> {
    let id_str    = encode_uuid(claim.send_id);
    let token_str = encode_uuid(claim.token);
    let now_str   = encode_dt(claim.now);
    let stale_str = encode_dt(claim.stale_before);

    // The conditional UPDATE is the claim: SQLite serialises writers, so at
    // most one caller sees a changed row.
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE scheduled_sends
           SET claimed_at = ?3, claim_token = ?2
           WHERE send_id = ?1
             AND sent_at IS NULL
             AND due_at <= ?3
             AND (claimed_at IS NULL OR claimed_at <= ?4)",
          rusqlite::params![id_str, token_str, now_str, stale_str],
        )?)
      })
      .await?;

    Ok(changed == 1)
  }

  async fn complete_send(&self, id: Uuid, token: Uuid, at: DateTime<Utc>) -> Result<bool> {
    let id_str    = encode_uuid(id);
    let token_str = encode_uuid(token);
    let at_str    = encode_dt(at);

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE scheduled_sends
           SET sent_at = ?3, claim_token = NULL
           WHERE send_id = ?1 AND claim_token = ?2 AND sent_at IS NULL",
          rusqlite::params![id_str, token_str, at_str],
        )?)
      })
      .await?;

    Ok(changed == 1)
  }

  async fn fail_send(
    &self,
    id: Uuid,
    token: Uuid,
    error: String,
    max_attempts: u32,
    at: DateTime<Utc>,
  ) -> Result<FailureOutcome> {
    let id_str    = encode_uuid(id);
    let token_str = encode_uuid(token);
    let at_str    = encode_dt(at);

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let attempts: Option<i64> = tx
          .query_row(
            "SELECT attempts FROM scheduled_sends
             WHERE send_id = ?1 AND claim_token = ?2 AND sent_at IS NULL",
            rusqlite::params![id_str, token_str],
            |r| r.get(0),
          )
          .optional()?;

        let Some(attempts) = attempts else {
          return Ok(FailureOutcome::NotOwned);
        };
        let attempts = u32::try_from(attempts + 1).unwrap_or(u32::MAX);

        let outcome = if attempts >= max_attempts {
          tx.execute(
            "UPDATE scheduled_sends
             SET attempts = ?2, last_error = ?3, sent_at = ?4, claim_token = NULL
             WHERE send_id = ?1",
            rusqlite::params![id_str, attempts, error, at_str],
          )?;
          FailureOutcome::GaveUp { attempts }
        } else {
          tx.execute(
            "UPDATE scheduled_sends
             SET attempts = ?2, last_error = ?3, claimed_at = NULL, claim_token = NULL
             WHERE send_id = ?1",
            rusqlite::params![id_str, attempts, error],
          )?;
          FailureOutcome::Requeued { attempts }
        };
        tx.commit()?;
        Ok(outcome)
      })
      .await?;

    Ok(outcome)
  }
}

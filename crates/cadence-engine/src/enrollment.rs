//! Sequence enrollment: one scheduled send per step, due relative to the
//! enrollment instant.

use cadence_core::{
  contact::Contact,
  rule::Sequence,
  schedule::{NewEnrollment, PlannedStep, ScheduledSend},
  store::CrmStore,
};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Compute the enrollment and the due time of every step.
pub fn plan(sequence: &Sequence, contact: &Contact, now: DateTime<Utc>) -> NewEnrollment {
  NewEnrollment {
    sequence_id: sequence.sequence_id,
    contact_id:  contact.contact_id,
    to_email:    contact.email.clone(),
    enrolled_at: now,
    steps:       sequence
      .steps
      .iter()
      .map(|step| PlannedStep {
        step_order: step.order,
        content:    step.content(),
        due_at:     now + step.offset(),
      })
      .collect(),
  }
}

/// Enroll `contact` into `sequence`, returning the scheduled sends created.
///
/// A contact is enrolled at most once per sequence; repeating the call for an
/// enrolled contact writes nothing and returns an empty vector.
pub async fn enroll<S: CrmStore>(
  store: &S,
  sequence: &Sequence,
  contact: &Contact,
  now: DateTime<Utc>,
) -> Result<Vec<ScheduledSend>, S::Error> {
  match store.enroll(plan(sequence, contact, now)).await? {
    Some((enrollment, sends)) => {
      debug!(
        enrollment_id = %enrollment.enrollment_id,
        sequence_id = %sequence.sequence_id,
        contact_id = %contact.contact_id,
        steps = sends.len(),
        "enrolled contact"
      );
      Ok(sends)
    }
    None => {
      debug!(
        sequence_id = %sequence.sequence_id,
        contact_id = %contact.contact_id,
        "contact already enrolled"
      );
      Ok(Vec::new())
    }
  }
}

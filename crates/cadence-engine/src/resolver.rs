//! Contact resolution: map whatever is known about an actor onto exactly one
//! CRM contact.
//!
//! Resolution is split in two. [`plan`] is a pure function from the claim and
//! the two candidate lookups to a [`ContactWrite`]; [`resolve`] performs the
//! lookups and hands the plan to the store, which applies it in one write.

use cadence_core::{
  contact::{Contact, ContactClaim, ContactWrite},
  store::CrmStore,
};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

/// Decide the write for `claim`, given the contact currently linked to the
/// claim's user id (`by_user`) and the one currently holding its email
/// (`by_email`).
///
/// `email` must already be normalised. Fields the claim leaves empty never
/// erase what the contact already has.
pub fn plan(
  claim: &ContactClaim,
  email: String,
  by_user: Option<Contact>,
  by_email: Option<Contact>,
  now: DateTime<Utc>,
) -> ContactWrite {
  match (by_user, by_email) {
    (Some(mut contact), holder) => {
      contact.email = email;
      merge_profile(&mut contact, claim, now);
      match holder {
        Some(other) if other.contact_id != contact.contact_id => {
          ContactWrite::Absorb { winner: contact, absorbed: other.contact_id }
        }
        _ => ContactWrite::Update(contact),
      }
    }
    (None, Some(mut contact)) => {
      if contact.user_id.is_none() {
        contact.user_id.clone_from(&claim.user_id);
      }
      merge_profile(&mut contact, claim, now);
      ContactWrite::Update(contact)
    }
    (None, None) => ContactWrite::Insert(Contact {
      contact_id: Uuid::new_v4(),
      email,
      user_id: claim.user_id.clone(),
      name: claim.name.clone(),
      role: claim.role.clone(),
      created_at: now,
      updated_at: now,
    }),
  }
}

fn merge_profile(contact: &mut Contact, claim: &ContactClaim, now: DateTime<Utc>) {
  if claim.name.is_some() {
    contact.name.clone_from(&claim.name);
  }
  if claim.role.is_some() {
    contact.role.clone_from(&claim.role);
  }
  contact.updated_at = now;
}

/// Attempts per resolution. A concurrent first event for the same actor can
/// insert the contact between our lookups and our write; the second attempt
/// then sees that row and updates it.
const ATTEMPTS: usize = 2;

/// Find or create the contact for `claim`.
///
/// Returns `None` when the claim carries no usable email, or when the store
/// keeps failing; failures are logged and never propagated.
pub async fn resolve<S: CrmStore>(
  store: &S,
  claim: &ContactClaim,
  now: DateTime<Utc>,
) -> Option<Contact> {
  let email = claim.normalized_email()?;

  for attempt in 1..=ATTEMPTS {
    match resolve_once(store, claim, &email, now).await {
      Ok(contact) => return Some(contact),
      Err(e) if attempt < ATTEMPTS => {
        debug!(%email, attempt, error = %e, "contact resolution conflicted, retrying");
      }
      Err(e) => warn!(%email, error = %e, "contact resolution failed"),
    }
  }
  None
}

async fn resolve_once<S: CrmStore>(
  store: &S,
  claim: &ContactClaim,
  email: &str,
  now: DateTime<Utc>,
) -> Result<Contact, S::Error> {
  let by_user = match &claim.user_id {
    Some(user_id) => store.find_contact_by_user(user_id).await?,
    None => None,
  };
  let by_email = store.find_contact_by_email(email).await?;

  if let (Some(user), Some(holder)) = (&by_user, &by_email)
    && user.contact_id != holder.contact_id
    && holder.user_id.as_ref().is_some_and(|other| Some(other) != claim.user_id.as_ref())
  {
    warn!(
      winner = %user.contact_id,
      absorbed = %holder.contact_id,
      "absorbing a contact linked to a different user"
    );
  }

  let write = plan(claim, email.to_owned(), by_user, by_email, now);
  debug!(contact_id = %write.contact().contact_id, ?write, "resolved contact");
  store.write_contact(write).await
}

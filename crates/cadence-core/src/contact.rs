//! CRM contacts and the write plan produced by contact resolution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A CRM identity, unique by email and optionally linked to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
  pub contact_id: Uuid,
  /// Lowercased, trimmed; unique across contacts.
  pub email:      String,
  /// Weak back-reference to the host application's account.
  pub user_id:    Option<String>,
  pub name:       Option<String>,
  pub role:       Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// What a caller knows about the actor behind an event.
#[derive(Debug, Clone, Default)]
pub struct ContactClaim {
  pub user_id: Option<String>,
  pub email:   String,
  pub name:    Option<String>,
  pub role:    Option<String>,
}

impl ContactClaim {
  pub fn new(email: impl Into<String>) -> Self {
    Self { email: email.into(), ..Self::default() }
  }

  /// The email as stored: trimmed and lowercased. `None` if blank.
  pub fn normalized_email(&self) -> Option<String> {
    let email = self.email.trim().to_lowercase();
    (!email.is_empty()).then_some(email)
  }
}

/// A single contact write, decided by the resolver and applied atomically by
/// the store.
#[derive(Debug, Clone)]
pub enum ContactWrite {
  Insert(Contact),
  Update(Contact),
  /// `winner` takes over the email currently held by `absorbed`; everything
  /// referencing `absorbed` is re-pointed to `winner` and `absorbed` is
  /// removed.
  Absorb { winner: Contact, absorbed: Uuid },
}

impl ContactWrite {
  /// The contact as it will exist after the write.
  pub fn contact(&self) -> &Contact {
    match self {
      Self::Insert(c) | Self::Update(c) => c,
      Self::Absorb { winner, .. } => winner,
    }
  }

  pub fn into_contact(self) -> Contact {
    match self {
      Self::Insert(c) | Self::Update(c) => c,
      Self::Absorb { winner, .. } => winner,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn normalized_email_trims_and_lowercases() {
    let claim = ContactClaim::new("  Alice@Example.COM ");
    assert_eq!(claim.normalized_email().as_deref(), Some("alice@example.com"));
  }

  #[test]
  fn blank_email_normalizes_to_none() {
    assert!(ContactClaim::new("   ").normalized_email().is_none());
  }
}

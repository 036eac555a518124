//! Domain events: the append-only input to the automation engine.
//!
//! An event records that something happened to (or was done by) a user. The
//! event type doubles as the trigger vocabulary for automations and
//! sequences, so the set is closed and validated wherever a rule is written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::{Error, Result};

/// Free-form key/value payload attached to an event.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

// ─── EventType ───────────────────────────────────────────────────────────────

/// The closed set of lifecycle events that may trigger a rule.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  EnumIter,
  IntoStaticStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
  Signup,
  EmailVerified,
  Play,
  FavoriteAdded,
  FavoriteRemoved,
  CommentCreated,
  PlaylistCreated,
  EmailOpened,
  Login,
}

impl EventType {
  /// The string stored in `event_type` / `trigger` columns.
  pub fn as_str(self) -> &'static str { self.into() }

  /// Parse a trigger supplied by an administrator.
  ///
  /// This is the write-path validation point; the dispatcher never re-checks
  /// triggers it reads back from the store.
  pub fn parse_trigger(raw: &str) -> Result<Self> {
    raw
      .trim()
      .parse()
      .map_err(|_| Error::UnknownTrigger(raw.to_owned()))
  }
}

// ─── Event ───────────────────────────────────────────────────────────────────

/// An immutable record in the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
  pub event_id:         Uuid,
  pub event_type:       EventType,
  pub actor_user_id:    Option<String>,
  pub subject_audio_id: Option<String>,
  /// The CRM contact the actor resolved to, if resolution succeeded.
  pub contact_id:       Option<Uuid>,
  pub metadata:         Metadata,
  pub created_at:       DateTime<Utc>,
}

/// Input to [`crate::store::CrmStore::append_event`].
#[derive(Debug, Clone)]
pub struct NewEvent {
  pub event_type:       EventType,
  pub actor_user_id:    Option<String>,
  pub subject_audio_id: Option<String>,
  pub contact_id:       Option<Uuid>,
  pub metadata:         Metadata,
  /// Supplied by the dispatcher's clock so that scheduled due times can be
  /// derived from the same instant.
  pub created_at:       DateTime<Utc>,
}

/// Parameters for [`crate::store::CrmStore::list_events`].
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
  pub event_type: Option<EventType>,
  pub contact_id: Option<Uuid>,
  pub limit:      Option<usize>,
  pub offset:     Option<usize>,
}

#[cfg(test)]
mod tests {
  use strum::IntoEnumIterator as _;

  use super::*;

  #[test]
  fn trigger_strings_round_trip() {
    for ty in EventType::iter() {
      assert_eq!(EventType::parse_trigger(ty.as_str()).unwrap(), ty);
    }
    assert_eq!(EventType::FavoriteAdded.as_str(), "FAVORITE_ADDED");
    assert_eq!(EventType::iter().count(), 9);
  }

  #[test]
  fn unknown_trigger_is_rejected() {
    let err = EventType::parse_trigger("PURCHASE").unwrap_err();
    assert!(matches!(err, Error::UnknownTrigger(ref s) if s == "PURCHASE"));
  }

  #[test]
  fn serde_matches_column_encoding() {
    let json = serde_json::to_string(&EventType::EmailVerified).unwrap();
    assert_eq!(json, "\"EMAIL_VERIFIED\"");
  }
}

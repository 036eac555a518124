//! Error type for `cadence-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] cadence_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A column held a value outside its closed vocabulary.
  #[error("corrupt column {column}: {value:?}")]
  Decode {
    column: &'static str,
    value:  String,
  },

  #[error("template not found: {0}")]
  TemplateNotFound(uuid::Uuid),

  #[error("template {template_id} is used by {automations} automation(s)")]
  TemplateInUse {
    template_id: uuid::Uuid,
    automations: usize,
  },

  #[error("email {0:?} already belongs to another contact")]
  EmailTaken(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

//! Handlers for `/sequences` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/sequences` | Each with its ordered steps |
//! | `POST`   | `/sequences` | Body: [`SequenceBody`]; returns 201 |
//! | `GET`    | `/sequences/:id` | 404 if not found |
//! | `PUT`    | `/sequences/:id` | Replaces the definition and the whole step list atomically |
//! | `DELETE` | `/sequences/:id` | 204 |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use cadence_core::{
  rule::{Sequence, SequenceDraft, StepDraft},
  store::CrmStore,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{error::ApiError, parse_trigger};

fn default_active() -> bool { true }

#[derive(Debug, Deserialize)]
pub struct StepBody {
  #[serde(default)]
  pub delay_days:  u32,
  #[serde(default)]
  pub delay_hours: u32,
  pub subject:     String,
  pub body:        String,
}

/// Steps are numbered by their position in `steps`.
#[derive(Debug, Deserialize)]
pub struct SequenceBody {
  pub name:    String,
  pub trigger: String,
  #[serde(default = "default_active")]
  pub active:  bool,
  pub steps:   Vec<StepBody>,
}

impl SequenceBody {
  fn into_draft(self) -> Result<SequenceDraft, ApiError> {
    let draft = SequenceDraft {
      name:    self.name,
      trigger: parse_trigger(&self.trigger)?,
      active:  self.active,
      steps:   self
        .steps
        .into_iter()
        .map(|s| StepDraft {
          delay_days:  s.delay_days,
          delay_hours: s.delay_hours,
          subject:     s.subject,
          body:        s.body,
        })
        .collect(),
    };
    draft.validate()?;
    Ok(draft)
  }
}

/// `GET /sequences`
pub async fn list<S>(State(store): State<Arc<S>>) -> Result<Json<Vec<Sequence>>, ApiError>
where
  S: CrmStore,
{
  let sequences = store
    .list_sequences()
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(sequences))
}

/// `POST /sequences`
pub async fn create<S>(
  State(store): State<Arc<S>>,
  Json(body): Json<SequenceBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: CrmStore,
{
  let sequence = store
    .create_sequence(body.into_draft()?)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  tracing::info!(
    sequence_id = %sequence.sequence_id,
    steps = sequence.steps.len(),
    "sequence created"
  );
  Ok((StatusCode::CREATED, Json(sequence)))
}

/// `GET /sequences/:id`
pub async fn get_one<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Sequence>, ApiError>
where
  S: CrmStore,
{
  let sequence = store
    .get_sequence(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or_else(|| ApiError::NotFound(format!("sequence {id} not found")))?;
  Ok(Json(sequence))
}

/// `PUT /sequences/:id`
pub async fn replace<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
  Json(body): Json<SequenceBody>,
) -> Result<Json<Sequence>, ApiError>
where
  S: CrmStore,
{
  let sequence = store
    .replace_sequence(id, body.into_draft()?)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or_else(|| ApiError::NotFound(format!("sequence {id} not found")))?;
  Ok(Json(sequence))
}

/// `DELETE /sequences/:id`
pub async fn delete<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError>
where
  S: CrmStore,
{
  let deleted = store
    .delete_sequence(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  if !deleted {
    return Err(ApiError::NotFound(format!("sequence {id} not found")));
  }
  Ok(StatusCode::NO_CONTENT)
}

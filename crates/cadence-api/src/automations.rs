//! Handlers for `/automations` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/automations` | All automations, active or not |
//! | `POST`   | `/automations` | Body: [`AutomationBody`]; returns 201 |
//! | `GET`    | `/automations/:id` | 404 if not found |
//! | `PUT`    | `/automations/:id` | Replaces the definition; queued sends are kept |
//! | `DELETE` | `/automations/:id` | 204 |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use cadence_core::{
  rule::{Automation, AutomationDraft},
  store::CrmStore,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{error::ApiError, parse_trigger};

fn default_active() -> bool { true }

#[derive(Debug, Deserialize)]
pub struct AutomationBody {
  pub name:          String,
  pub trigger:       String,
  #[serde(default)]
  pub delay_minutes: u32,
  /// May be omitted when `template_id` is set.
  #[serde(default)]
  pub subject:       String,
  #[serde(default)]
  pub body:          String,
  pub template_id:   Option<Uuid>,
  #[serde(default = "default_active")]
  pub active:        bool,
}

/// Turn a request body into a validated draft, including the check that a
/// referenced template exists.
async fn into_draft<S: CrmStore>(
  store: &S,
  body: AutomationBody,
) -> Result<AutomationDraft, ApiError> {
  let draft = AutomationDraft {
    name:          body.name,
    trigger:       parse_trigger(&body.trigger)?,
    delay_minutes: body.delay_minutes,
    subject:       body.subject,
    body:          body.body,
    template_id:   body.template_id,
    active:        body.active,
  };
  draft.validate()?;

  if let Some(template_id) = draft.template_id {
    let found = store
      .get_template(template_id)
      .await
      .map_err(|e| ApiError::Store(Box::new(e)))?;
    if found.is_none() {
      return Err(ApiError::BadRequest(format!("template {template_id} does not exist")));
    }
  }
  Ok(draft)
}

/// `GET /automations`
pub async fn list<S>(State(store): State<Arc<S>>) -> Result<Json<Vec<Automation>>, ApiError>
where
  S: CrmStore,
{
  let automations = store
    .list_automations()
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(automations))
}

/// `POST /automations`
pub async fn create<S>(
  State(store): State<Arc<S>>,
  Json(body): Json<AutomationBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: CrmStore,
{
  let draft = into_draft(store.as_ref(), body).await?;
  let automation = store
    .create_automation(draft)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  tracing::info!(automation_id = %automation.automation_id, trigger = %automation.trigger, "automation created");
  Ok((StatusCode::CREATED, Json(automation)))
}

/// `GET /automations/:id`
pub async fn get_one<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Automation>, ApiError>
where
  S: CrmStore,
{
  let automation = store
    .get_automation(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or_else(|| ApiError::NotFound(format!("automation {id} not found")))?;
  Ok(Json(automation))
}

/// `PUT /automations/:id`
pub async fn update<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
  Json(body): Json<AutomationBody>,
) -> Result<Json<Automation>, ApiError>
where
  S: CrmStore,
{
  let draft = into_draft(store.as_ref(), body).await?;
  let automation = store
    .update_automation(id, draft)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or_else(|| ApiError::NotFound(format!("automation {id} not found")))?;
  Ok(Json(automation))
}

/// `DELETE /automations/:id`
pub async fn delete<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError>
where
  S: CrmStore,
{
  let deleted = store
    .delete_automation(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  if !deleted {
    return Err(ApiError::NotFound(format!("automation {id} not found")));
  }
  Ok(StatusCode::NO_CONTENT)
}

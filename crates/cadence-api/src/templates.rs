//! Handlers for `/templates` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/templates` | Sorted by name |
//! | `POST`   | `/templates` | Body: [`TemplateBody`]; returns 201 |
//! | `GET`    | `/templates/:id` | 404 if not found |
//! | `PUT`    | `/templates/:id` | Full replacement |
//! | `DELETE` | `/templates/:id` | 204; 400 while any automation references it |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use cadence_core::{
  rule::{EmailTemplate, TemplateDraft},
  store::CrmStore,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct TemplateBody {
  pub name:    String,
  pub subject: String,
  pub body:    String,
}

impl TemplateBody {
  fn into_draft(self) -> Result<TemplateDraft, ApiError> {
    let draft = TemplateDraft { name: self.name, subject: self.subject, body: self.body };
    draft.validate()?;
    Ok(draft)
  }
}

/// `GET /templates`
pub async fn list<S>(State(store): State<Arc<S>>) -> Result<Json<Vec<EmailTemplate>>, ApiError>
where
  S: CrmStore,
{
  let templates = store
    .list_templates()
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(templates))
}

/// `POST /templates`
pub async fn create<S>(
  State(store): State<Arc<S>>,
  Json(body): Json<TemplateBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: CrmStore,
{
  let template = store
    .create_template(body.into_draft()?)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok((StatusCode::CREATED, Json(template)))
}

/// `GET /templates/:id`
pub async fn get_one<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<EmailTemplate>, ApiError>
where
  S: CrmStore,
{
  let template = store
    .get_template(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or_else(|| ApiError::NotFound(format!("template {id} not found")))?;
  Ok(Json(template))
}

/// `PUT /templates/:id`
pub async fn update<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
  Json(body): Json<TemplateBody>,
) -> Result<Json<EmailTemplate>, ApiError>
where
  S: CrmStore,
{
  let template = store
    .update_template(id, body.into_draft()?)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or_else(|| ApiError::NotFound(format!("template {id} not found")))?;
  Ok(Json(template))
}

/// `DELETE /templates/:id`
pub async fn delete<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError>
where
  S: CrmStore,
{
  let users = store
    .list_automations()
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .into_iter()
    .filter(|a| a.template_id == Some(id))
    .count();
  if users > 0 {
    return Err(ApiError::BadRequest(format!(
      "template {id} is used by {users} automation(s); detach or delete them first"
    )));
  }

  let deleted = store
    .delete_template(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  if !deleted {
    return Err(ApiError::NotFound(format!("template {id} not found")));
  }
  Ok(StatusCode::NO_CONTENT)
}

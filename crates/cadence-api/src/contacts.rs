//! Handlers for `/contacts` endpoints. Contacts are written only by event
//! dispatch; this surface is read-only.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/contacts` | `?email=` looks up one address; otherwise paged by `limit`/`offset` |
//! | `GET`  | `/contacts/:id` | 404 if not found |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State},
};
use cadence_core::{contact::Contact, store::CrmStore};
use serde::Deserialize;
use uuid::Uuid;

use crate::{error::ApiError, page};

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub email:  Option<String>,
  pub limit:  Option<usize>,
  pub offset: Option<usize>,
}

/// `GET /contacts[?email=..]`
pub async fn list<S>(
  State(store): State<Arc<S>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Contact>>, ApiError>
where
  S: CrmStore,
{
  let contacts = match params.email {
    Some(email) => store
      .find_contact_by_email(&email.trim().to_lowercase())
      .await
      .map_err(|e| ApiError::Store(Box::new(e)))?
      .into_iter()
      .collect(),
    None => store
      .list_contacts(page(params.limit), params.offset.unwrap_or(0))
      .await
      .map_err(|e| ApiError::Store(Box::new(e)))?,
  };
  Ok(Json(contacts))
}

/// `GET /contacts/:id`
pub async fn get_one<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Contact>, ApiError>
where
  S: CrmStore,
{
  let contact = store
    .get_contact(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or_else(|| ApiError::NotFound(format!("contact {id} not found")))?;
  Ok(Json(contact))
}

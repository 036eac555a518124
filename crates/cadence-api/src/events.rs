//! Handlers for `/events` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/events` | Body: [`FireBody`]; returns 201 + stored event |
//! | `GET`  | `/events` | Optional `?type`, `contact_id`, `limit`, `offset`; newest first |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use cadence_core::{
  account::AccountDirectory,
  analytics::AnalyticsSink,
  event::{Event, EventQuery},
  mail::MailTransport,
  store::CrmStore,
};
use cadence_engine::{Dispatcher, FireEvent};
use serde::Deserialize;
use uuid::Uuid;

use crate::{error::ApiError, page, parse_trigger};

// ─── Fire ────────────────────────────────────────────────────────────────────

/// `{"type":"SIGNUP","actor_user_id":"u1","metadata":{...}}`
#[derive(Debug, Deserialize)]
pub struct FireBody {
  #[serde(rename = "type")]
  pub event_type: String,
  #[serde(flatten)]
  pub fire:       FireEvent,
}

/// `POST /events`
pub async fn fire<S, M, D, A>(
  State(dispatcher): State<Dispatcher<S, M, D, A>>,
  Json(body): Json<FireBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: CrmStore,
  M: MailTransport,
  D: AccountDirectory,
  A: AnalyticsSink,
{
  let event_type = parse_trigger(&body.event_type)?;
  let event = dispatcher.fire_event(event_type, body.fire).await?;
  Ok((StatusCode::CREATED, Json(event)))
}

// ─── List ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  #[serde(rename = "type")]
  pub event_type: Option<String>,
  pub contact_id: Option<Uuid>,
  pub limit:      Option<usize>,
  pub offset:     Option<usize>,
}

/// `GET /events[?type=PLAY][&contact_id=..][&limit=..][&offset=..]`
pub async fn list<S>(
  State(store): State<Arc<S>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Event>>, ApiError>
where
  S: CrmStore,
{
  let query = EventQuery {
    event_type: params.event_type.as_deref().map(parse_trigger).transpose()?,
    contact_id: params.contact_id,
    limit:      Some(page(params.limit)),
    offset:     params.offset,
  };
  let events = store
    .list_events(&query)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(events))
}

//! Handlers for `/scheduled-sends` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/scheduled-sends` | Optional `?pending=true`, `contact_id`, `limit`, `offset`; ordered by due time |
//! | `POST` | `/scheduled-sends/run` | Runs one sweep now; optional `?limit`; returns the sweep report |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Query, State},
};
use cadence_core::{
  account::AccountDirectory,
  analytics::AnalyticsSink,
  mail::MailTransport,
  schedule::{ScheduledSend, SendQuery},
  store::CrmStore,
};
use cadence_engine::{Dispatcher, SweepReport};
use serde::Deserialize;
use uuid::Uuid;

use crate::{error::ApiError, page};

#[derive(Debug, Deserialize)]
pub struct ListParams {
  #[serde(default)]
  pub pending:    bool,
  pub contact_id: Option<Uuid>,
  pub limit:      Option<usize>,
  pub offset:     Option<usize>,
}

/// `GET /scheduled-sends[?pending=true]`
pub async fn list<S>(
  State(store): State<Arc<S>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<ScheduledSend>>, ApiError>
where
  S: CrmStore,
{
  let query = SendQuery {
    pending_only: params.pending,
    contact_id:   params.contact_id,
    limit:        Some(page(params.limit)),
    offset:       params.offset,
  };
  let sends = store
    .list_sends(&query)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(sends))
}

#[derive(Debug, Deserialize)]
pub struct RunParams {
  pub limit: Option<usize>,
}

/// `POST /scheduled-sends/run[?limit=N]`
pub async fn run<S, M, D, A>(
  State(dispatcher): State<Dispatcher<S, M, D, A>>,
  Query(params): Query<RunParams>,
) -> Result<Json<SweepReport>, ApiError>
where
  S: CrmStore,
  M: MailTransport,
  D: AccountDirectory,
  A: AnalyticsSink,
{
  let sweeper = dispatcher.sweeper();
  let limit = params.limit.unwrap_or(sweeper.config().batch_size);
  Ok(Json(sweeper.process_due(limit).await?))
}

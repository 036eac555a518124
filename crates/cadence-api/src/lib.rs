//! JSON REST API for Cadence.
//!
//! Exposes an axum [`Router`] over a [`Dispatcher`] and the
//! [`CrmStore`] behind it: event ingestion, rule administration, and a view
//! of the scheduled-send queue. Auth, TLS, and transport concerns are the
//! caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", cadence_api::api_router(dispatcher.clone()))
//! ```

pub mod automations;
pub mod contacts;
pub mod error;
pub mod events;
pub mod sends;
pub mod sequences;
pub mod templates;

use std::sync::Arc;

use axum::{
  Router,
  extract::FromRef,
  routing::{get, post},
};
use cadence_core::{
  account::AccountDirectory, analytics::AnalyticsSink, event::EventType, mail::MailTransport,
  store::CrmStore,
};
use cadence_engine::Dispatcher;

pub use error::ApiError;

/// Largest page any list endpoint returns.
pub const MAX_PAGE: usize = 500;

pub(crate) fn page(limit: Option<usize>) -> usize { limit.unwrap_or(100).min(MAX_PAGE) }

pub(crate) fn parse_trigger(raw: &str) -> Result<EventType, ApiError> {
  Ok(EventType::parse_trigger(raw)?)
}

// ─── State ───────────────────────────────────────────────────────────────────

/// Router state. Rule and query handlers extract only `State<Arc<S>>`;
/// event and sweep handlers extract the whole [`Dispatcher`].
pub struct ApiState<S, M, D, A> {
  pub store:      Arc<S>,
  pub dispatcher: Dispatcher<S, M, D, A>,
}

impl<S, M, D, A> Clone for ApiState<S, M, D, A> {
  fn clone(&self) -> Self {
    Self { store: self.store.clone(), dispatcher: self.dispatcher.clone() }
  }
}

impl<S, M, D, A> FromRef<ApiState<S, M, D, A>> for Arc<S> {
  fn from_ref(state: &ApiState<S, M, D, A>) -> Self { state.store.clone() }
}

impl<S, M, D, A> FromRef<ApiState<S, M, D, A>> for Dispatcher<S, M, D, A> {
  fn from_ref(state: &ApiState<S, M, D, A>) -> Self { state.dispatcher.clone() }
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build a fully-materialised API router around `dispatcher`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S, M, D, A>(dispatcher: Dispatcher<S, M, D, A>) -> Router<()>
where
  S: CrmStore + 'static,
  M: MailTransport + 'static,
  D: AccountDirectory + 'static,
  A: AnalyticsSink + 'static,
{
  let state = ApiState { store: dispatcher.store().clone(), dispatcher };

  Router::new()
    // Events
    .route("/events", get(events::list::<S>).post(events::fire::<S, M, D, A>))
    // Contacts
    .route("/contacts", get(contacts::list::<S>))
    .route("/contacts/{id}", get(contacts::get_one::<S>))
    // Templates
    .route("/templates", get(templates::list::<S>).post(templates::create::<S>))
    .route(
      "/templates/{id}",
      get(templates::get_one::<S>)
        .put(templates::update::<S>)
        .delete(templates::delete::<S>),
    )
    // Automations
    .route("/automations", get(automations::list::<S>).post(automations::create::<S>))
    .route(
      "/automations/{id}",
      get(automations::get_one::<S>)
        .put(automations::update::<S>)
        .delete(automations::delete::<S>),
    )
    // Sequences
    .route("/sequences", get(sequences::list::<S>).post(sequences::create::<S>))
    .route(
      "/sequences/{id}",
      get(sequences::get_one::<S>)
        .put(sequences::replace::<S>)
        .delete(sequences::delete::<S>),
    )
    // Scheduled sends
    .route("/scheduled-sends", get(sends::list::<S>))
    .route("/scheduled-sends/run", post(sends::run::<S, M, D, A>))
    .with_state(state)
}

#[cfg(test)]
mod tests;

//! Cadence HTTP server.
//!
//! Wires the SQLite store, the concrete mail and analytics backends, and the
//! JSON API into one axum [`Router`], and owns the periodic send sweep.

pub mod analytics;
pub mod auth;
pub mod error;
pub mod mail;

pub use error::Error;

use std::{path::PathBuf, sync::Arc, time::Duration};

use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use axum::{Json, Router, middleware, routing::get};
use cadence_core::{
  account::AccountDirectory, analytics::AnalyticsSink, mail::MailTransport, store::CrmStore,
};
use cadence_engine::{Dispatcher, SweepConfig, Sweeper};
use cadence_store_sqlite::SqliteStore;
use rand_core::OsRng;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tower_http::trace::TraceLayer;

use analytics::Analytics;
use auth::{AuthConfig, require_auth};
use mail::Mailer;

// ─── Configuration ────────────────────────────────────────────────────────────

fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 8080 }
fn default_store_path() -> PathBuf { PathBuf::from("cadence.db") }
fn default_smtp_port() -> u16 { 587 }
fn default_analytics_timeout_ms() -> u64 { 750 }

/// Runtime server configuration, deserialised from `config.toml` and
/// `CADENCE_*` environment variables.
#[derive(Deserialize, Clone)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:               String,
  #[serde(default = "default_port")]
  pub port:               u16,
  #[serde(default = "default_store_path")]
  pub store_path:         PathBuf,
  pub auth_username:      String,
  pub auth_password_hash: String,
  #[serde(default)]
  pub sweep:              SweepConfig,
  /// Without a relay, mail is logged and counted as sent.
  pub smtp:               Option<SmtpConfig>,
  pub analytics:          Option<AnalyticsConfig>,
}

#[derive(Deserialize, Clone)]
pub struct SmtpConfig {
  pub host:     String,
  #[serde(default = "default_smtp_port")]
  pub port:     u16,
  pub username: String,
  pub password: String,
  /// Sender mailbox, e.g. `Cadence <hello@example.com>`.
  pub from:     String,
}

/// The dispatcher awaits each notification inside the request that fired the
/// event, so `timeout_ms` bounds the latency a slow collector can add.
#[derive(Deserialize, Clone)]
pub struct AnalyticsConfig {
  pub endpoint:   String,
  #[serde(default = "default_analytics_timeout_ms")]
  pub timeout_ms: u64,
}

// ─── Wiring ──────────────────────────────────────────────────────────────────

/// The dispatcher as deployed: SQLite doubles as the account directory.
pub type AppDispatcher = Dispatcher<SqliteStore, Mailer, SqliteStore, Analytics>;

/// Build the production dispatcher around an opened store.
pub fn build_dispatcher(store: SqliteStore, config: &ServerConfig) -> Result<AppDispatcher, Error> {
  let store = Arc::new(store);
  let mail = Mailer::from_config(config.smtp.as_ref())?;
  let analytics = Analytics::from_config(config.analytics.as_ref())?;
  Ok(Dispatcher::new(
    store.clone(),
    Arc::new(mail),
    store,
    Arc::new(analytics),
    config.sweep,
  ))
}

/// Produce an argon2 PHC string for `password`.
pub fn hash_password(password: &str) -> Result<String, Error> {
  let salt = SaltString::generate(&mut OsRng);
  Argon2::default()
    .hash_password(password.as_bytes(), &salt)
    .map(|h| h.to_string())
    .map_err(|e| Error::Hash(e.to_string()))
}

// ─── Router ───────────────────────────────────────────────────────────────────

async fn health() -> Json<Value> { Json(json!({ "status": "ok" })) }

/// `/health` is open; everything under `/api` requires Basic auth.
pub fn router<S, M, D, A>(dispatcher: Dispatcher<S, M, D, A>, auth: Arc<AuthConfig>) -> Router
where
  S: CrmStore + 'static,
  M: MailTransport + 'static,
  D: AccountDirectory + 'static,
  A: AnalyticsSink + 'static,
{
  let api = cadence_api::api_router(dispatcher)
    .layer(middleware::from_fn_with_state(auth, require_auth));

  Router::new()
    .route("/health", get(health))
    .nest("/api", api)
    .layer(TraceLayer::new_for_http())
}

// ─── Background sweep ─────────────────────────────────────────────────────────

/// Run the sweeper every `interval_secs` until the task is aborted.
pub fn spawn_sweeper(sweeper: Sweeper<SqliteStore, Mailer>) -> JoinHandle<()> {
  let period = Duration::from_secs(sweeper.config().interval_secs.max(1));
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
      ticker.tick().await;
      match sweeper.run().await {
        Ok(report) if report.claimed > 0 => tracing::info!(
          claimed = report.claimed,
          sent = report.sent,
          failed = report.failed,
          skipped = report.skipped,
          "sweep finished"
        ),
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "sweep failed"),
      }
    }
  })
}

// ─── Integration tests ────────────────────────────────────────────────────────

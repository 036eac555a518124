//! Router tests driven through `tower::ServiceExt::oneshot`.

use std::sync::{Arc, Mutex};

use axum::{
  Router,
  body::Body,
  http::{Request, StatusCode, header},
};
use cadence_core::{
  account::Account,
  analytics::NoopAnalytics,
  mail::{MailError, MailTransport, OutgoingMail},
  store::CrmStore,
};
use cadence_engine::{Dispatcher, ManualClock, SweepConfig};
use cadence_store_sqlite::SqliteStore;
use chrono::{Duration, TimeZone as _, Utc};
use serde_json::{Value, json};
use tower::ServiceExt as _;

use crate::api_router;

#[derive(Default)]
struct Outbox(Mutex<Vec<OutgoingMail>>);

impl MailTransport for Outbox {
  async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
    self.0.lock().unwrap().push(mail.clone());
    Ok(())
  }
}

struct Fixture {
  router: Router,
  store:  Arc<SqliteStore>,
  outbox: Arc<Outbox>,
  clock:  ManualClock,
}

async fn fixture() -> Fixture {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  store
    .upsert_account(&Account {
      user_id: "u1".into(),
      email:   "listener@x.com".into(),
      name:    Some("Lis".into()),
      role:    None,
    })
    .await
    .unwrap();

  let outbox = Arc::new(Outbox::default());
  let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap());
  let dispatcher = Dispatcher::new(
    store.clone(),
    outbox.clone(),
    store.clone(),
    Arc::new(NoopAnalytics),
    SweepConfig::default(),
  )
  .with_clock(Arc::new(clock.clone()));

  Fixture { router: api_router(dispatcher), store, outbox, clock }
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
  let mut builder = Request::builder().method(method).uri(uri);
  let body = match body {
    Some(json) => {
      builder = builder.header(header::CONTENT_TYPE, "application/json");
      Body::from(json.to_string())
    }
    None => Body::empty(),
  };
  let resp = router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
  let status = resp.status();
  let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
  let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
  (status, value)
}

// ── Events ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fire_event_runs_immediate_automation() {
  let f = fixture().await;
  let (status, _) = call(&f.router, "POST", "/automations", Some(json!({
    "name": "welcome",
    "trigger": "SIGNUP",
    "subject": "Welcome",
    "body": "<p>hi</p>"
  })))
  .await;
  assert_eq!(status, StatusCode::CREATED);

  let (status, event) = call(&f.router, "POST", "/events", Some(json!({
    "type": "SIGNUP",
    "actor_user_id": "u1",
    "metadata": { "source": "web" }
  })))
  .await;
  assert_eq!(status, StatusCode::CREATED);
  assert_eq!(event["event_type"], "SIGNUP");
  assert_eq!(event["metadata"]["source"], "web");
  assert!(event["contact_id"].is_string());

  let sent = f.outbox.0.lock().unwrap().clone();
  assert_eq!(sent.len(), 1);
  assert_eq!(sent[0].to, "listener@x.com");
}

#[tokio::test]
async fn unknown_event_type_is_rejected() {
  let f = fixture().await;
  let (status, body) = call(&f.router, "POST", "/events", Some(json!({ "type": "PURCHASE" }))).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body["error"].as_str().unwrap().contains("PURCHASE"));

  let (_, events) = call(&f.router, "GET", "/events", None).await;
  assert_eq!(events.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn events_filter_by_type() {
  let f = fixture().await;
  for ty in ["PLAY", "PLAY", "LOGIN"] {
    call(&f.router, "POST", "/events", Some(json!({ "type": ty }))).await;
  }
  let (status, plays) = call(&f.router, "GET", "/events?type=PLAY", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(plays.as_array().unwrap().len(), 2);

  let (status, _) = call(&f.router, "GET", "/events?type=nope", None).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ── Contacts ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn newsletter_signup_creates_contact() {
  let f = fixture().await;
  call(&f.router, "POST", "/events", Some(json!({ "type": "SIGNUP", "email": " Fan@X.com " }))).await;

  let (status, found) = call(&f.router, "GET", "/contacts?email=FAN@x.com", None).await;
  assert_eq!(status, StatusCode::OK);
  let found = found.as_array().unwrap();
  assert_eq!(found.len(), 1);
  assert_eq!(found[0]["email"], "fan@x.com");

  let id = found[0]["contact_id"].as_str().unwrap();
  let (status, one) = call(&f.router, "GET", &format!("/contacts/{id}"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(one["contact_id"], id);
}

#[tokio::test]
async fn missing_contact_is_404() {
  let f = fixture().await;
  let (status, body) =
    call(&f.router, "GET", &format!("/contacts/{}", uuid::Uuid::new_v4()), None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert!(body["error"].is_string());
}

// ── Rules ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn automation_validation_is_400() {
  let f = fixture().await;
  let (status, _) = call(&f.router, "POST", "/automations", Some(json!({
    "name": "x", "trigger": "BOGUS", "subject": "s", "body": "b"
  })))
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let (status, _) = call(&f.router, "POST", "/automations", Some(json!({
    "name": "x", "trigger": "PLAY"
  })))
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let (status, body) = call(&f.router, "POST", "/automations", Some(json!({
    "name": "x", "trigger": "PLAY", "template_id": uuid::Uuid::new_v4()
  })))
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body["error"].as_str().unwrap().contains("template"));
}

#[tokio::test]
async fn template_backed_automation_round_trip() {
  let f = fixture().await;
  let (status, template) = call(&f.router, "POST", "/templates", Some(json!({
    "name": "welcome", "subject": "From template", "body": "<p>t</p>"
  })))
  .await;
  assert_eq!(status, StatusCode::CREATED);
  let template_id = template["template_id"].as_str().unwrap().to_owned();

  let (status, automation) = call(&f.router, "POST", "/automations", Some(json!({
    "name": "welcome", "trigger": "SIGNUP", "template_id": template_id
  })))
  .await;
  assert_eq!(status, StatusCode::CREATED);
  assert_eq!(automation["active"], true);
  let id = automation["automation_id"].as_str().unwrap().to_owned();

  let (status, updated) = call(&f.router, "PUT", &format!("/automations/{id}"), Some(json!({
    "name": "welcome", "trigger": "SIGNUP", "template_id": template_id, "active": false
  })))
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(updated["active"], false);

  let (status, body) =
    call(&f.router, "DELETE", &format!("/templates/{template_id}"), None).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body["error"].as_str().unwrap().contains("automation"));
  let (_, reloaded) = call(&f.router, "GET", &format!("/automations/{id}"), None).await;
  assert_eq!(reloaded["template_id"], template_id.as_str());

  let (status, _) = call(&f.router, "DELETE", &format!("/automations/{id}"), None).await;
  assert_eq!(status, StatusCode::NO_CONTENT);
  let (status, _) = call(&f.router, "GET", &format!("/automations/{id}"), None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);

  let (status, _) = call(&f.router, "DELETE", &format!("/templates/{template_id}"), None).await;
  assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn sequence_put_replaces_steps() {
  let f = fixture().await;
  let (status, created) = call(&f.router, "POST", "/sequences", Some(json!({
    "name": "onboarding",
    "trigger": "EMAIL_VERIFIED",
    "steps": [
      { "delay_hours": 1, "subject": "one", "body": "1" },
      { "delay_days": 2, "subject": "two", "body": "2" }
    ]
  })))
  .await;
  assert_eq!(status, StatusCode::CREATED);
  assert_eq!(created["steps"].as_array().unwrap().len(), 2);
  let id = created["sequence_id"].as_str().unwrap().to_owned();

  let (status, replaced) = call(&f.router, "PUT", &format!("/sequences/{id}"), Some(json!({
    "name": "onboarding v2",
    "trigger": "EMAIL_VERIFIED",
    "steps": [{ "delay_days": 7, "subject": "week", "body": "w" }]
  })))
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(replaced["steps"][0]["order"], 0);
  assert_eq!(replaced["steps"][0]["subject"], "week");
  assert_eq!(replaced["steps"].as_array().unwrap().len(), 1);

  let (status, _) = call(&f.router, "PUT", &format!("/sequences/{id}"), Some(json!({
    "name": "empty", "trigger": "EMAIL_VERIFIED", "steps": []
  })))
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ── Scheduled sends ─────────────────────────────────────────────────────────

#[tokio::test]
async fn manual_sweep_drains_due_sends() {
  let f = fixture().await;
  call(&f.router, "POST", "/automations", Some(json!({
    "name": "nudge", "trigger": "PLAY", "delay_minutes": 10, "subject": "Nudge", "body": "n"
  })))
  .await;
  call(&f.router, "POST", "/events", Some(json!({ "type": "PLAY", "actor_user_id": "u1" }))).await;

  let (_, pending) = call(&f.router, "GET", "/scheduled-sends?pending=true", None).await;
  assert_eq!(pending.as_array().unwrap().len(), 1);
  assert_eq!(pending[0]["origin"]["kind"], "automation");

  let (status, report) = call(&f.router, "POST", "/scheduled-sends/run", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(report["claimed"], 0);

  f.clock.advance(Duration::minutes(10));
  let (_, report) = call(&f.router, "POST", "/scheduled-sends/run?limit=5", None).await;
  assert_eq!(report["sent"], 1);

  let (_, pending) = call(&f.router, "GET", "/scheduled-sends?pending=true", None).await;
  assert!(pending.as_array().unwrap().is_empty());
  let (_, all) = call(&f.router, "GET", "/scheduled-sends", None).await;
  assert!(all[0]["sent_at"].is_string());
  assert_eq!(f.outbox.0.lock().unwrap().len(), 1);
  assert_eq!(f.store.list_contacts(10, 0).await.unwrap().len(), 1);
}

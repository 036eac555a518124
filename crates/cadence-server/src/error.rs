//! Error types and axum `IntoResponse` implementation.

use axum::{
  Json,
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unauthorized")]
  Unauthorized,
  #[error("smtp configuration: {0}")]
  Smtp(String),
  #[error("password hashing: {0}")]
  Hash(String),
  #[error("http client: {0}")]
  Http(#[from] reqwest::Error),
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    match self {
      Error::Unauthorized => {
        let mut res =
          (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthorized" }))).into_response();
        res.headers_mut().insert(
          header::WWW_AUTHENTICATE,
          HeaderValue::from_static("Basic realm=\"cadence\""),
        );
        res
      }
      other => (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": other.to_string() })),
      )
        .into_response(),
    }
  }
}

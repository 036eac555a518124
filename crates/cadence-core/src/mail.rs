//! The outbound email contract.
//!
//! The engine only needs "send this message to this address"; SMTP, API-based
//! providers, or test fakes all sit behind [`MailTransport`].

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rule::EmailContent;

/// A fully-rendered message ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMail {
  pub to:        String,
  pub subject:   String,
  pub html_body: String,
}

impl OutgoingMail {
  pub fn new(to: impl Into<String>, content: EmailContent) -> Self {
    Self { to: to.into(), subject: content.subject, html_body: content.body }
  }
}

#[derive(Debug, Error)]
pub enum MailError {
  #[error("invalid address: {0}")]
  InvalidAddress(String),

  #[error("could not build message: {0}")]
  Message(String),

  #[error("transport error: {0}")]
  Transport(String),
}

/// Delivers one message. Implementations must not retry internally: a failed
/// send is reported once and the caller decides what happens next.
pub trait MailTransport: Send + Sync {
  fn send<'a>(
    &'a self,
    mail: &'a OutgoingMail,
  ) -> impl Future<Output = Result<(), MailError>> + Send + 'a;
}

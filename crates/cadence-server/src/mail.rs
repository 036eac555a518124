//! Concrete [`MailTransport`]s: SMTP via lettre, and a log-only fallback for
//! deployments without an SMTP relay.

use cadence_core::mail::{MailError, MailTransport, OutgoingMail};
use lettre::{
  AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
  message::{Mailbox, header::ContentType},
  transport::smtp::authentication::Credentials,
};

use crate::{SmtpConfig, error::Error};

/// Sends through an authenticated STARTTLS relay.
#[derive(Clone)]
pub struct SmtpMailer {
  from:      Mailbox,
  transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
  pub fn new(config: &SmtpConfig) -> Result<Self, Error> {
    let from: Mailbox = config
      .from
      .parse()
      .map_err(|e| Error::Smtp(format!("invalid from address {:?}: {e}", config.from)))?;

    let creds = Credentials::new(config.username.clone(), config.password.clone());
    let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
      .map_err(|e| Error::Smtp(format!("relay {}: {e}", config.host)))?
      .port(config.port)
      .credentials(creds)
      .build();

    Ok(Self { from, transport })
  }

  fn build(&self, mail: &OutgoingMail) -> Result<Message, MailError> {
    let to: Mailbox = mail
      .to
      .parse()
      .map_err(|_| MailError::InvalidAddress(mail.to.clone()))?;

    Message::builder()
      .from(self.from.clone())
      .to(to)
      .subject(mail.subject.clone())
      .header(ContentType::TEXT_HTML)
      .body(mail.html_body.clone())
      .map_err(|e| MailError::Message(e.to_string()))
  }
}

impl MailTransport for SmtpMailer {
  async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
    let message = self.build(mail)?;
    self
      .transport
      .send(message)
      .await
      .map_err(|e| MailError::Transport(e.to_string()))?;
    tracing::debug!(to = %mail.to, subject = %mail.subject, "smtp accepted message");
    Ok(())
  }
}

/// Writes each message to the log instead of delivering it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

impl MailTransport for LogMailer {
  async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
    tracing::info!(
      to = %mail.to,
      subject = %mail.subject,
      bytes = mail.html_body.len(),
      "mail not delivered: no smtp relay configured"
    );
    Ok(())
  }
}

/// The transport chosen at startup.
#[derive(Clone)]
pub enum Mailer {
  Smtp(SmtpMailer),
  Log(LogMailer),
}

impl Mailer {
  pub fn from_config(smtp: Option<&SmtpConfig>) -> Result<Self, Error> {
    match smtp {
      Some(config) => Ok(Self::Smtp(SmtpMailer::new(config)?)),
      None => Ok(Self::Log(LogMailer)),
    }
  }
}

impl MailTransport for Mailer {
  async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
    match self {
      Self::Smtp(m) => m.send(mail).await,
      Self::Log(m) => m.send(mail).await,
    }
  }
}

//! The Cadence automation engine.
//!
//! Everything here is generic over the collaborator traits in `cadence-core`
//! ([`CrmStore`](cadence_core::store::CrmStore),
//! [`MailTransport`](cadence_core::mail::MailTransport),
//! [`AccountDirectory`](cadence_core::account::AccountDirectory) and
//! [`AnalyticsSink`](cadence_core::analytics::AnalyticsSink)). The HTTP layer
//! and the server binary pick the concrete implementations.
//!
//! - [`resolver`] maps an actor onto a CRM contact.
//! - [`dispatcher`] logs an event and runs every matching rule.
//! - [`enrollment`] materialises a sequence into scheduled sends.
//! - [`sweeper`] drains due scheduled sends under an atomic claim.

pub mod clock;
pub mod dispatcher;
pub mod enrollment;
pub mod error;
pub mod fanout;
pub mod resolver;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{DispatchReport, Dispatcher, FireEvent};
pub use error::{DispatchError, SweepError};
pub use sweeper::{SweepConfig, SweepReport, Sweeper};

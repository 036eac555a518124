//! Lookup of the host application's user accounts.

use std::future::Future;

use serde::{Deserialize, Serialize};

/// What the host application knows about a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
  pub user_id: String,
  pub email:   String,
  pub name:    Option<String>,
  pub role:    Option<String>,
}

/// Resolves a user id to an [`Account`]. Returns `None` for unknown users.
pub trait AccountDirectory: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn lookup<'a>(
    &'a self,
    user_id: &'a str,
  ) -> impl Future<Output = Result<Option<Account>, Self::Error>> + Send + 'a;
}

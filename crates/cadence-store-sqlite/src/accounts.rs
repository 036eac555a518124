//! [`AccountDirectory`] over the host application's `accounts` table.

use cadence_core::account::{Account, AccountDirectory};
use rusqlite::OptionalExtension as _;

use crate::{Error, Result, SqliteStore};

impl SqliteStore {
  /// Insert or replace an account row. The host application normally owns
  /// this table; this exists for seeding and tests.
  pub async fn upsert_account(&self, account: &Account) -> Result<()> {
    let a = account.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO accounts (user_id, email, name, role) VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (user_id) DO UPDATE
           SET email = excluded.email, name = excluded.name, role = excluded.role",
          rusqlite::params![a.user_id, a.email, a.name, a.role],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

impl AccountDirectory for SqliteStore {
  type Error = Error;

  async fn lookup(&self, user_id: &str) -> Result<Option<Account>> {
    let user_id = user_id.to_owned();
    let account = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT user_id, email, name, role FROM accounts WHERE user_id = ?1",
              rusqlite::params![user_id],
              |row| {
                Ok(Account {
                  user_id: row.get(0)?,
                  email:   row.get(1)?,
                  name:    row.get(2)?,
                  role:    row.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;
    Ok(account)
  }
}

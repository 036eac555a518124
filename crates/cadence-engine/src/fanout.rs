//! Launch all, await all, collect per-item outcomes.

use std::future::Future;

/// The outcomes of a settled batch, split by success.
#[derive(Debug)]
pub struct Settled<T, E> {
  pub ok:     Vec<T>,
  pub failed: Vec<E>,
}

impl<T, E> Settled<T, E> {
  pub fn total(&self) -> usize { self.ok.len() + self.failed.len() }
}

/// Drive every future to completion concurrently. One item failing never
/// prevents the others from running.
pub async fn settle<I, F, T, E>(tasks: I) -> Settled<T, E>
where
  I: IntoIterator<Item = F>,
  F: Future<Output = Result<T, E>>,
{
  let mut settled = Settled { ok: Vec::new(), failed: Vec::new() };
  for outcome in futures::future::join_all(tasks).await {
    match outcome {
      Ok(v) => settled.ok.push(v),
      Err(e) => settled.failed.push(e),
    }
  }
  settled
}

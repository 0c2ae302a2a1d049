//! The batch loop: eligible users, one at a time, history → due items → cart.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use restock_core::{
  history::{self, LastPurchasedIndex},
  item::SubscriptionRecord,
  resolve::{self, DueBundle},
  store::{DocumentStore, USERS_COLLECTION, user_collection},
};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{Error, Result, RunOptions, upsert::UpsertWriter};

pub const HISTORY_COLLECTION: &str = "history";
pub const SUBSCRIPTIONS_COLLECTION: &str = "subscriptions";
pub const CART_COLLECTION: &str = "cart";

// ─── Summaries ───────────────────────────────────────────────────────────────

/// What happened for one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
  pub uid:             String,
  pub history_entries: usize,
  pub index_keys:      usize,
  pub subscriptions:   usize,
  pub bundles:         usize,
  pub due_items:       usize,
  pub written:         usize,
  pub failed:          usize,
}

/// Totals over a whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
  pub dry_run:         bool,
  pub users_processed: usize,
  /// Users whose store reads failed; their carts were not touched.
  pub users_failed:    usize,
  pub due_items:       usize,
  pub written:         usize,
  pub failed:          usize,
  pub users:           Vec<UserSummary>,
}

impl RunSummary {
  fn add(&mut self, user: UserSummary) {
    self.users_processed += 1;
    self.due_items += user.due_items;
    self.written += user.written;
    self.failed += user.failed;
    self.users.push(user);
  }
}

// ─── Runner ──────────────────────────────────────────────────────────────────

/// Drives one run of the reorder job against a store.
pub struct Runner<S> {
  store:   Arc<S>,
  options: RunOptions,
}

impl<S: DocumentStore> Runner<S> {
  pub fn new(store: Arc<S>, options: RunOptions) -> Self { Self { store, options } }

  async fn has_subscriptions(&self, uid: &str) -> Result<bool> {
    let subs = self
      .store
      .list(&user_collection(uid, SUBSCRIPTIONS_COLLECTION))
      .await
      .map_err(Error::store)?;
    Ok(!subs.is_empty())
  }

  /// Users with at least one subscription, in store order, capped by the
  /// run's limit. With `only_user` set, just that user, or nobody when it is
  /// missing or has no subscriptions.
  pub async fn eligible_users(&self) -> Result<Vec<String>> {
    if let Some(uid) = &self.options.only_user {
      if self.store.get(USERS_COLLECTION, uid).await.map_err(Error::store)?.is_none() {
        warn!(%uid, "user not found; nothing to do");
        return Ok(Vec::new());
      }
      if !self.has_subscriptions(uid).await? {
        warn!(%uid, "user has no subscriptions; nothing to do");
        return Ok(Vec::new());
      }
      return Ok(vec![uid.clone()]);
    }

    let users = self.store.list(USERS_COLLECTION).await.map_err(Error::store)?;
    let limit = self.options.limit.unwrap_or(usize::MAX);
    let mut eligible = Vec::new();

    for user in users {
      if eligible.len() >= limit {
        break;
      }
      match self.has_subscriptions(&user.id).await {
        Ok(true) => eligible.push(user.id),
        Ok(false) => debug!(uid = %user.id, "no subscriptions; skipping"),
        Err(e) => error!(uid = %user.id, error = %e, "failed to read subscriptions; skipping"),
      }
    }
    Ok(eligible)
  }

  /// Build the last-purchased index from a user's history.
  pub async fn load_index(&self, uid: &str) -> Result<(LastPurchasedIndex, usize)> {
    let entries = self
      .store
      .list(&user_collection(uid, HISTORY_COLLECTION))
      .await
      .map_err(Error::store)?;
    Ok((history::build_index(&entries), entries.len()))
  }

  pub async fn load_subscriptions(&self, uid: &str) -> Result<Vec<SubscriptionRecord>> {
    let docs = self
      .store
      .list(&user_collection(uid, SUBSCRIPTIONS_COLLECTION))
      .await
      .map_err(Error::store)?;
    Ok(docs.iter().map(SubscriptionRecord::from_document).collect())
  }

  /// Resolve and write one user's due items.
  pub async fn process_user(&self, uid: &str, now: DateTime<Utc>) -> Result<UserSummary> {
    let (index, history_entries) = self.load_index(uid).await?;
    let subscriptions = self.load_subscriptions(uid).await?;

    let bundles = resolve::resolve_due(&subscriptions, &index, &self.options.policy, now);
    log_decisions(uid, &bundles);

    let writer = UpsertWriter::new(Arc::clone(&self.store), user_collection(uid, CART_COLLECTION));
    let report = writer.write_due(&bundles, self.options.dry_run, now).await;

    Ok(UserSummary {
      uid: uid.to_owned(),
      history_entries,
      index_keys: index.len(),
      subscriptions: subscriptions.len(),
      bundles: bundles.len(),
      due_items: bundles.iter().map(|b| b.items.len()).sum(),
      written: report.written,
      failed: report.failed,
    })
  }

  /// Process every eligible user in turn. Only a failure to enumerate users
  /// ends the run early; per-user failures are logged and counted.
  pub async fn run(&self, now: DateTime<Utc>) -> Result<RunSummary> {
    let users = self.eligible_users().await?;
    info!(users = users.len(), dry_run = self.options.dry_run, "starting run");

    let mut summary = RunSummary { dry_run: self.options.dry_run, ..RunSummary::default() };

    for (i, uid) in users.iter().enumerate() {
      if i > 0 && !self.options.delay.is_zero() {
        tokio::time::sleep(self.options.delay).await;
      }

      match self.process_user(uid, now).await {
        Ok(user) => {
          info!(
            uid = %user.uid,
            history = user.history_entries,
            subscriptions = user.subscriptions,
            due = user.due_items,
            written = user.written,
            failed = user.failed,
            "processed user"
          );
          summary.add(user);
        }
        Err(e) => {
          error!(%uid, error = %e, "user failed");
          summary.users_failed += 1;
        }
      }
    }

    info!(
      users = summary.users_processed,
      users_failed = summary.users_failed,
      due = summary.due_items,
      written = summary.written,
      failed = summary.failed,
      dry_run = summary.dry_run,
      "run complete"
    );
    Ok(summary)
  }
}

fn log_decisions(uid: &str, bundles: &[DueBundle]) {
  for bundle in bundles {
    for due in &bundle.items {
      let d = &due.diagnostics;
      let label = due.item.label();
      let matched = d.matched_key.as_ref().map_or_else(|| "-".to_owned(), ToString::to_string);
      debug!(
        %uid,
        subscription = %bundle.subscription_id,
        item = %label,
        matched_key = %matched,
        strategy = ?d.strategy,
        days = d.days_since_last_purchase,
        threshold = d.threshold_days,
        quantity = due.quantity,
        "due"
      );
    }
  }
}
